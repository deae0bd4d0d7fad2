//! # Remote Catalog
//!
//! The streaming service is reached only through [`CatalogClient`]. Its
//! errors are split so that rate limiting, and nothing else, can be retried.
//!
//! - [`spotify`] - blocking HTTP client for the Spotify Web API
//! - [`memory`] - scripted catalog for tests and benchmarks

pub mod memory;
pub mod spotify;

use crate::track::{RawAudioFeatures, TrackId, TrackRecord};
use std::time::Duration;
use thiserror::Error;

/// Largest page the saved-tracks listing accepts.
pub const SAVED_TRACKS_PAGE_SIZE: usize = 50;

/// Largest number of ids accepted by one audio-features request.
pub const MAX_FEATURE_BATCH: usize = 100;

/// Remote catalog errors
#[derive(Debug, Error)]
pub enum CatalogError {
    /// HTTP 429, the only error that is retried.
    #[error("Rate limited by catalog (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Token missing, expired, or lacking scope
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other non-success status
    #[error("Catalog returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    /// Response body did not have the expected shape
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl CatalogError {
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// One page of the saved-tracks listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SavedTracksPage {
    pub ids: Vec<TrackId>,
    /// Continuation cursor, `None` on the last page.
    pub next: Option<String>,
}

/// The narrow surface of the streaming service the pipeline consumes.
pub trait CatalogClient {
    /// Lists one page of the user's saved tracks. `cursor` is `None` for the
    /// first page and the previous page's `next` afterwards.
    fn saved_tracks(&self, cursor: Option<&str>, limit: usize)
        -> Result<SavedTracksPage, CatalogError>;

    /// Fetches metadata for a single track.
    fn track(&self, id: &TrackId) -> Result<TrackRecord, CatalogError>;

    /// Fetches audio features for up to [`MAX_FEATURE_BATCH`] tracks. Entries
    /// are `None` where the catalog has no analysis for a track.
    fn audio_features(&self, ids: &[TrackId])
        -> Result<Vec<Option<RawAudioFeatures>>, CatalogError>;
}
