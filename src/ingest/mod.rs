//! # Ingestion
//!
//! Everything that talks to the remote catalog. All calls run on the
//! calling thread, one at a time, paced by a [`RequestScheduler`].
//!
//! - [`collector`] - saved-library identifiers
//! - [`fetcher`] - per-track metadata and batched audio features
//!
//! [`RequestScheduler`]: crate::retry::RequestScheduler

pub mod collector;
pub mod fetcher;

pub use collector::TrackIdCollector;
pub use fetcher::{BatchFeatureFetcher, FetchReport};
