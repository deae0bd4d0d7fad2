//! # Clustering
//!
//! Groups the scaled feature rows by sonic similarity.
//!
//! - [`matrix`] - dense feature matrix shared with preprocessing
//! - [`kmeans`] - seeded k-means++ with Lloyd iterations
//! - [`elbow`] - picks k from the inertia curve
//! - [`pca`] - two-dimensional projection for inspection
//! - [`fitter`] - final model, assignments, projection and summaries
//!
//! Every fit is seeded, so the same matrix and configuration always give
//! the same clusters.

pub mod elbow;
pub mod fitter;
pub mod kmeans;
pub mod matrix;
pub mod pca;

pub use elbow::{ClusterSelector, ElbowResult, ElbowSelection};
pub use fitter::{ClusterFit, ClusterFitter, ClusterSummary, ProjectedPoint};
pub use kmeans::{KMeans, KMeansModel, KMeansParams};
pub use matrix::FeatureMatrix;
pub use pca::Projection;

use thiserror::Error;

/// Clustering errors
#[derive(Debug, Error, PartialEq)]
pub enum ClusterError {
    /// Nothing to cluster
    #[error("Cannot cluster an empty feature matrix")]
    EmptyMatrix,

    #[error("Invalid cluster count k={k} for {rows} rows")]
    InvalidK { k: usize, rows: usize },

    #[error("Row has {found} values, expected {expected}")]
    DimensionMismatch { expected: usize, found: usize },
}
