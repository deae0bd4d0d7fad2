//! Clusters a listener's saved tracks by their audio features.
//!
//! Core modules:
//! - [`ingest`] - saved-library listing and batched feature fetching
//! - [`preprocess`] - cleaning, release-year derivation and min-max scaling
//! - [`cluster`] - k-means, elbow selection and the PCA projection
//! - [`pipeline`] - stage orchestration over durable artifacts
//!
//! ### Supporting Modules
//!
//! - [`catalog`] - the remote catalog interface and its Spotify client
//! - [`retry`] - rate-limit retry policy and request pacing
//! - [`clock`] - sleeping behind a trait so pacing can be tested
//! - [`store`] / [`db`] - JSON artifacts and the SQLite dataset
//! - [`track`] - identifiers, records and feature vectors
//! - [`config`] - explicit configuration
//! - [`cli`] / [`completion`] - command-line surface
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use sonica::catalog::spotify::SpotifyClient;
//! use sonica::clock::ThreadSleeper;
//! use sonica::config::PipelineConfig;
//! use sonica::pipeline::Pipeline;
//! use sonica::store::ArtifactStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = PipelineConfig::load(None)?;
//! let client = SpotifyClient::new(
//!     &config.api.base_url,
//!     "token",
//!     &config.api.user_agent,
//!     Duration::from_secs(config.api.timeout_secs),
//! )?;
//! let store = ArtifactStore::new(config.artifacts_dir()?);
//! let pipeline = Pipeline::new(&config, store, Arc::new(ThreadSleeper));
//!
//! let outcome = pipeline.run_all(&client)?;
//! println!("{} clusters", outcome.report.k);
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Rate Limits
//!
//! Only a rate-limited response is retried, with exponential backoff
//! (1s, 2s, 4s, ... by default). A track whose request stays rate limited is
//! left out of the dataset and reported; any other remote failure stops
//! the run with the operation and track id in the error.
//!
//! ## Reproducibility
//!
//! Every k-means fit is seeded from `clustering.seed`, so the same dataset
//! and configuration always produce the same clusters.

pub mod catalog;
pub mod cli;
pub mod clock;
pub mod cluster;
pub mod completion;
pub mod config;
pub mod db;
pub mod ingest;
pub mod pipeline;
pub mod preprocess;
pub mod retry;
pub mod store;
pub mod track;
