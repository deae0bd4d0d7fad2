//! Saved-library listing.

use crate::catalog::{CatalogClient, SAVED_TRACKS_PAGE_SIZE};
use crate::retry::RequestScheduler;
use crate::store::{ArtifactStore, TRACK_IDS_FILE};
use crate::track::TrackId;
use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use std::collections::HashSet;

/// Pages through the user's saved tracks and returns every identifier in
/// library order.
pub struct TrackIdCollector<'a> {
    client: &'a dyn CatalogClient,
    scheduler: &'a RequestScheduler,
    page_size: usize,
}

impl<'a> TrackIdCollector<'a> {
    pub fn new(client: &'a dyn CatalogClient, scheduler: &'a RequestScheduler) -> Self {
        Self {
            client,
            scheduler,
            page_size: SAVED_TRACKS_PAGE_SIZE,
        }
    }

    /// Collects all saved-track ids and persists them to [`TRACK_IDS_FILE`].
    ///
    /// Any page that cannot be fetched, rate limited past the retry budget
    /// included, fails the whole collection.
    pub fn collect(&self, store: &ArtifactStore) -> Result<Vec<TrackId>> {
        let ids = self.collect_ids()?;
        let path = store
            .save(TRACK_IDS_FILE, &ids)
            .context("Failed to persist collected track ids")?;
        info!("Collected {} track ids into {}", ids.len(), path.display());
        Ok(ids)
    }

    /// Walks the pages without persisting anything.
    pub fn collect_ids(&self) -> Result<Vec<TrackId>> {
        let mut ids = Vec::new();
        let mut seen = HashSet::new();
        let mut seen_cursors = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut page_number = 0usize;

        loop {
            page_number += 1;
            let what = format!("saved tracks page {page_number}");
            let page = self
                .scheduler
                .call(&what, || self.client.saved_tracks(cursor.as_deref(), self.page_size))
                .with_context(|| format!("Failed to list {what}"))?
                .with_context(|| format!("Rate limit retries exhausted on {what}"))?;

            debug!("Page {page_number}: {} ids", page.ids.len());
            for id in page.ids {
                if seen.insert(id.clone()) {
                    ids.push(id);
                } else {
                    warn!("Track {id} listed twice, keeping first position");
                }
            }

            match page.next {
                Some(next) => {
                    if !seen_cursors.insert(next.clone()) {
                        bail!("Saved tracks page {page_number} repeats the cursor `{next}`");
                    }
                    cursor = Some(next);
                }
                None => break,
            }
        }

        Ok(ids)
    }
}
