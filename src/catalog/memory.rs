//! In-memory catalog with scriptable rate limiting.
//!
//! Serves a fixed library and can be told to answer with HTTP 429 a given
//! number of times per track, per page, or per multi-track feature request.

use super::{CatalogClient, CatalogError, SavedTracksPage};
use crate::track::{RawAudioFeatures, TrackId, TrackRecord};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

struct Entry {
    id: TrackId,
    record: TrackRecord,
    features: Option<RawAudioFeatures>,
}

#[derive(Default)]
struct Script {
    track_rate_limits: HashMap<TrackId, u32>,
    page_rate_limits: u32,
    batch_feature_rate_limits: u32,
    missing: HashSet<TrackId>,
    repeated_cursor: Option<String>,
    track_calls: Vec<TrackId>,
    feature_calls: Vec<Vec<TrackId>>,
}

#[derive(Default)]
pub struct InMemoryCatalog {
    entries: Vec<Entry>,
    script: Mutex<Script>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a saved track. Library order is insertion order.
    pub fn with_track(
        mut self,
        id: &str,
        record: TrackRecord,
        features: Option<RawAudioFeatures>,
    ) -> Self {
        self.entries.push(Entry { id: TrackId::new(id), record, features });
        self
    }

    /// The next `times` metadata requests for `id` answer 429.
    pub fn rate_limit_track(self, id: &str, times: u32) -> Self {
        self.lock().track_rate_limits.insert(TrackId::new(id), times);
        self
    }

    /// The next `times` saved-tracks page requests answer 429.
    pub fn rate_limit_pages(self, times: u32) -> Self {
        self.lock().page_rate_limits = times;
        self
    }

    /// The next `times` feature requests covering more than one track answer 429.
    pub fn rate_limit_batch_features(self, times: u32) -> Self {
        self.lock().batch_feature_rate_limits = times;
        self
    }

    /// Metadata requests for `id` answer 404.
    pub fn missing_track(self, id: &str) -> Self {
        self.lock().missing.insert(TrackId::new(id));
        self
    }

    /// Every page names `cursor` as its successor, so paging never ends.
    pub fn repeat_cursor(self, cursor: &str) -> Self {
        self.lock().repeated_cursor = Some(cursor.to_string());
        self
    }

    /// Ids of every metadata request, in call order.
    pub fn track_calls(&self) -> Vec<TrackId> {
        self.lock().track_calls.clone()
    }

    /// Ids of every feature request, in call order.
    pub fn feature_calls(&self) -> Vec<Vec<TrackId>> {
        self.lock().feature_calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        // A poisoned script only means an earlier test assertion panicked.
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn take_one(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

impl CatalogClient for InMemoryCatalog {
    fn saved_tracks(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<SavedTracksPage, CatalogError> {
        if take_one(&mut self.lock().page_rate_limits) {
            return Err(CatalogError::RateLimited { retry_after: None });
        }

        let offset = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| CatalogError::Malformed(format!("bad cursor `{c}`")))?,
            None => 0,
        };
        let end = (offset + limit.max(1)).min(self.entries.len());
        let ids = self.entries[offset.min(end)..end]
            .iter()
            .map(|e| e.id.clone())
            .collect();
        let next = match &self.lock().repeated_cursor {
            Some(repeated) => Some(repeated.clone()),
            None => (end < self.entries.len()).then(|| end.to_string()),
        };

        Ok(SavedTracksPage { ids, next })
    }

    fn track(&self, id: &TrackId) -> Result<TrackRecord, CatalogError> {
        let mut script = self.lock();
        script.track_calls.push(id.clone());

        if script.missing.contains(id) {
            return Err(CatalogError::NotFound(format!("tracks/{id}")));
        }
        if let Some(remaining) = script.track_rate_limits.get_mut(id) {
            if take_one(remaining) {
                return Err(CatalogError::RateLimited { retry_after: None });
            }
        }

        self.entries
            .iter()
            .find(|e| &e.id == id)
            .map(|e| e.record.clone())
            .ok_or_else(|| CatalogError::NotFound(format!("tracks/{id}")))
    }

    fn audio_features(
        &self,
        ids: &[TrackId],
    ) -> Result<Vec<Option<RawAudioFeatures>>, CatalogError> {
        let mut script = self.lock();
        script.feature_calls.push(ids.to_vec());

        if ids.len() > 1 && take_one(&mut script.batch_feature_rate_limits) {
            return Err(CatalogError::RateLimited { retry_after: None });
        }

        Ok(ids
            .iter()
            .map(|id| {
                self.entries
                    .iter()
                    .find(|e| &e.id == id)
                    .and_then(|e| e.features.clone())
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> TrackRecord {
        TrackRecord {
            name: name.to_string(),
            album: "Album".to_string(),
            artist: "Artist".to_string(),
            release_date: "2020".to_string(),
            length_ms: 1000,
            popularity: 10,
        }
    }

    #[test]
    fn test_pages_follow_cursor() {
        let catalog = InMemoryCatalog::new()
            .with_track("a", record("a"), None)
            .with_track("b", record("b"), None)
            .with_track("c", record("c"), None);

        let first = catalog.saved_tracks(None, 2).unwrap();
        assert_eq!(first.ids.len(), 2);
        let second = catalog.saved_tracks(first.next.as_deref(), 2).unwrap();
        assert_eq!(second.ids, vec![TrackId::new("c")]);
        assert!(second.next.is_none());
    }

    #[test]
    fn test_scripted_rate_limit_runs_out() {
        let catalog = InMemoryCatalog::new()
            .with_track("a", record("a"), None)
            .rate_limit_track("a", 1);
        let id = TrackId::new("a");

        assert!(catalog.track(&id).unwrap_err().is_rate_limited());
        assert_eq!(catalog.track(&id).unwrap().name, "a");
        assert_eq!(catalog.track_calls().len(), 2);
    }
}
