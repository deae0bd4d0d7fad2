//! Batched metadata + audio-feature fetching.
//!
//! For every batch: metadata one track at a time, then all feature vectors in
//! one request. Metadata and features are joined on the track id, so a track
//! dropped anywhere in the batch cannot shift another track's features.

use crate::catalog::{CatalogClient, CatalogError, MAX_FEATURE_BATCH};
use crate::retry::RequestScheduler;
use crate::track::{
    AudioFeatures, Exclusion, ExclusionReason, RawAudioFeatures, TrackId, TrackRecord, TrackRow,
};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};

/// Outcome of one fetch run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FetchReport {
    /// Joined rows in input order.
    pub rows: Vec<TrackRow>,
    /// Tracks that produced no row, with the reason.
    pub exclusions: Vec<Exclusion>,
    pub batches: usize,
}

/// Per-track outcome of a feature request.
type FeatureLookup = HashMap<TrackId, Result<AudioFeatures, ExclusionReason>>;

pub struct BatchFeatureFetcher<'a> {
    client: &'a dyn CatalogClient,
    scheduler: &'a RequestScheduler,
}

impl<'a> BatchFeatureFetcher<'a> {
    pub fn new(client: &'a dyn CatalogClient, scheduler: &'a RequestScheduler) -> Self {
        Self { client, scheduler }
    }

    /// Fetches rows for `ids[start..start + count]` in batches of `batch_size`.
    ///
    /// The window is clamped to the id list. Rate limiting only ever drops
    /// single tracks; any other remote error aborts the fetch.
    pub fn fetch(
        &self,
        ids: &[TrackId],
        start: usize,
        count: usize,
        batch_size: usize,
    ) -> Result<FetchReport> {
        if batch_size == 0 || batch_size > MAX_FEATURE_BATCH {
            anyhow::bail!("batch size must be between 1 and {MAX_FEATURE_BATCH}, got {batch_size}");
        }

        let begin = start.min(ids.len());
        let end = start.saturating_add(count).min(ids.len());
        let window = &ids[begin..end];
        let total_batches = window.len().div_ceil(batch_size);
        info!(
            "Fetching {} tracks [{begin}, {end}) in {total_batches} batches of {batch_size}",
            window.len()
        );

        let mut report = FetchReport::default();
        let mut seen = HashSet::new();

        for (index, batch) in window.chunks(batch_size).enumerate() {
            let unique: Vec<&TrackId> = batch.iter().filter(|id| seen.insert((*id).clone())).collect();
            self.fetch_batch(&unique, &mut report)
                .with_context(|| format!("Batch {}/{total_batches} failed", index + 1))?;
            report.batches += 1;

            info!(
                "Batch {}/{total_batches} done: {} rows so far, {} excluded",
                index + 1,
                report.rows.len(),
                report.exclusions.len()
            );
            self.scheduler.after_batch();
        }

        Ok(report)
    }

    fn fetch_batch(&self, batch: &[&TrackId], report: &mut FetchReport) -> Result<()> {
        let mut metadata: Vec<(TrackId, TrackRecord)> = Vec::with_capacity(batch.len());

        for &id in batch {
            let what = format!("metadata for track {id}");
            let record = self
                .scheduler
                .call(&what, || self.client.track(id))
                .with_context(|| format!("Failed to fetch {what}"))?;
            self.scheduler.after_track();

            match record {
                Some(record) => {
                    debug!("Processed metadata for track {id}");
                    metadata.push((id.clone(), record));
                }
                None => exclude(report, id.clone(), ExclusionReason::MetadataUnavailable),
            }
        }

        if metadata.is_empty() {
            return Ok(());
        }

        let wanted: Vec<TrackId> = metadata.iter().map(|(id, _)| id.clone()).collect();
        let mut features = self.fetch_features(&wanted)?;

        for (id, record) in metadata {
            match features.remove(&id) {
                Some(Ok(features)) => report.rows.push(TrackRow { id, record, features }),
                Some(Err(reason)) => exclude(report, id, reason),
                None => exclude(report, id, ExclusionReason::FeaturesUnavailable),
            }
        }

        Ok(())
    }

    /// One request for the whole batch; if that stays rate limited, one
    /// request per track so a single stubborn batch loses as little as possible.
    fn fetch_features(&self, ids: &[TrackId]) -> Result<FeatureLookup> {
        let what = format!("audio features for {} tracks", ids.len());
        let response = self
            .scheduler
            .call(&what, || self.client.audio_features(ids))
            .with_context(|| format!("Failed to fetch {what}"))?;

        if let Some(entries) = response {
            return Ok(index_features(entries));
        }

        warn!("Batch feature request exhausted its retries, falling back to per-track requests");
        let mut lookup = FeatureLookup::new();
        for id in ids {
            let what = format!("audio features for track {id}");
            let single = self
                .scheduler
                .call(&what, || self.client.audio_features(std::slice::from_ref(id)))
                .with_context(|| format!("Failed to fetch {what}"))?;
            self.scheduler.after_track();

            if let Some(entries) = single {
                lookup.extend(index_features(entries));
            }
        }
        Ok(lookup)
    }
}

fn exclude(report: &mut FetchReport, id: TrackId, reason: ExclusionReason) {
    warn!("Skipping track {id}: {reason}");
    report.exclusions.push(Exclusion::new(id, reason));
}

/// Keys returned vectors by the track they describe and validates them.
/// Null entries carry no id and are simply absent from the result.
fn index_features(entries: Vec<Option<RawAudioFeatures>>) -> FeatureLookup {
    entries
        .into_iter()
        .flatten()
        .filter_map(|raw| {
            let id = raw.track_id()?;
            let outcome = raw
                .validate()
                .map_err(|field| ExclusionReason::NullFeature(field.to_string()));
            Some((id, outcome))
        })
        .collect()
}

/// Whether an error from this module is a permanent catalog failure.
pub fn is_permanent(error: &anyhow::Error) -> bool {
    error
        .chain()
        .filter_map(|e| e.downcast_ref::<CatalogError>())
        .any(|e| !e.is_rate_limited())
}
