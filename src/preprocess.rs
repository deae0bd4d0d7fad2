//! # Feature Preprocessing
//!
//! Turns the stored dataset into the matrix the clustering stage consumes:
//!
//! 1. drop rows with any empty column
//! 2. replace `release_date` with an integer `release_year`
//! 3. label rows `"<name> - <artist>"`
//! 4. keep the twelve audio-feature columns for modelling
//! 5. min-max scale each of those columns to [0, 1]
//!
//! Identifying columns stay on [`PreparedTrack`] for lookup after clustering.

use crate::cluster::{ClusterError, FeatureMatrix};
use crate::db::DatasetRecord;
use crate::track::{Exclusion, ExclusionReason, TrackId, FEATURE_COLUMNS};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Columns of the labelled view (indexed by song label).
pub const PREPARED_COLUMNS: [&str; 17] = [
    "album",
    "length",
    "release_year",
    "popularity",
    "acousticness",
    "danceability",
    "energy",
    "instrumentalness",
    "liveness",
    "loudness",
    "speechiness",
    "tempo",
    "valence",
    "time_signature",
    "key",
    "mode",
    "uri",
];

/// Where `release_year` sits in [`PREPARED_COLUMNS`].
pub const RELEASE_YEAR_POSITION: usize = 2;

/// Preprocessing errors
#[derive(Debug, Error, PartialEq)]
pub enum PreprocessError {
    #[error("Release date `{0}` does not start with a year")]
    UnparseableReleaseDate(String),

    /// No row survived cleaning
    #[error("No complete rows left to cluster")]
    EmptyDataset,

    #[error(transparent)]
    Matrix(#[from] ClusterError),
}

/// Takes the text before the first `-` (or the whole string) as the year.
///
/// `"2001-05-12"` and `"2001"` both give `2001`.
pub fn derive_release_year(release_date: &str) -> Result<i32, PreprocessError> {
    let year = release_date
        .split_once('-')
        .map_or(release_date, |(year, _)| year)
        .trim();

    year.parse::<i32>()
        .map_err(|_| PreprocessError::UnparseableReleaseDate(release_date.to_string()))
}

/// One row of the labelled view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedTrack {
    pub id: TrackId,
    /// `"<name> - <artist>"`
    pub song: String,
    pub album: String,
    pub length: i64,
    pub release_year: i32,
    pub popularity: i64,
    /// Unscaled, in [`FEATURE_COLUMNS`] order.
    pub features: [f64; 12],
    pub uri: String,
}

/// Per-column min-max scaling fitted on one matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub columns: Vec<String>,
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

impl MinMaxScaler {
    /// Records the range of every column of `matrix`.
    pub fn fit(matrix: &FeatureMatrix, columns: &[&str]) -> Result<Self, ClusterError> {
        if matrix.is_empty() {
            return Err(ClusterError::EmptyMatrix);
        }
        if columns.len() != matrix.n_cols() {
            return Err(ClusterError::DimensionMismatch {
                expected: matrix.n_cols(),
                found: columns.len(),
            });
        }

        let mut min = vec![f64::INFINITY; matrix.n_cols()];
        let mut max = vec![f64::NEG_INFINITY; matrix.n_cols()];
        for row in matrix.rows() {
            for (j, &value) in row.iter().enumerate() {
                min[j] = min[j].min(value);
                max[j] = max[j].max(value);
            }
        }

        Ok(Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            min,
            max,
        })
    }

    /// Scales one row with the fitted ranges. Zero-range columns become 0.0;
    /// values outside the fitted range are not clipped.
    pub fn transform_row(&self, row: &[f64]) -> Result<Vec<f64>, ClusterError> {
        if row.len() != self.min.len() {
            return Err(ClusterError::DimensionMismatch {
                expected: self.min.len(),
                found: row.len(),
            });
        }

        Ok(row
            .iter()
            .zip(self.min.iter().zip(&self.max))
            .map(|(&value, (&lo, &hi))| {
                let range = hi - lo;
                if range.abs() <= f64::EPSILON * hi.abs().max(1.0) {
                    0.0
                } else {
                    (value - lo) / range
                }
            })
            .collect())
    }

    pub fn transform(&self, matrix: &FeatureMatrix) -> Result<FeatureMatrix, ClusterError> {
        let mut scaled = FeatureMatrix::new(self.min.len());
        for row in matrix.rows() {
            scaled.push_row(&self.transform_row(row)?)?;
        }
        Ok(scaled)
    }
}

/// Everything the clustering stage needs, plus what was left out.
#[derive(Debug, Clone)]
pub struct PreparedDataset {
    pub tracks: Vec<PreparedTrack>,
    /// Unscaled feature rows, same order as `tracks`.
    pub features: FeatureMatrix,
    /// Scaled feature rows, same order as `tracks`.
    pub matrix: FeatureMatrix,
    pub scaler: MinMaxScaler,
    pub exclusions: Vec<Exclusion>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FeaturePreprocessor;

impl FeaturePreprocessor {
    pub fn new() -> Self {
        Self
    }

    pub fn prepare(&self, records: &[DatasetRecord]) -> Result<PreparedDataset, PreprocessError> {
        let mut exclusions = Vec::new();
        let mut tracks = Vec::with_capacity(records.len());
        let mut complete_rows = 0usize;

        for record in records {
            let Some(track) = complete(record) else {
                warn!("Skipping track {}: missing value", record.id);
                exclusions.push(Exclusion::new(
                    TrackId::new(record.id.clone()),
                    ExclusionReason::MissingValue,
                ));
                continue;
            };
            complete_rows += 1;

            match track {
                Ok(track) => tracks.push(track),
                Err(PreprocessError::UnparseableReleaseDate(value)) => {
                    warn!("Skipping track {}: unparseable release date `{value}`", record.id);
                    exclusions.push(Exclusion::new(
                        TrackId::new(record.id.clone()),
                        ExclusionReason::UnparseableReleaseDate(value),
                    ));
                }
                Err(e) => return Err(e),
            }
        }

        if complete_rows < records.len() {
            info!(
                "Missing values found, dropped {} rows. Data shape: {} -> {} rows",
                records.len() - complete_rows,
                records.len(),
                complete_rows
            );
        } else {
            info!("No missing values found. Data shape: {} rows", records.len());
        }

        if tracks.is_empty() {
            return Err(PreprocessError::EmptyDataset);
        }

        let rows: Vec<[f64; 12]> = tracks.iter().map(|t| t.features).collect();
        let features = FeatureMatrix::from_rows(&rows)?;
        let scaler = MinMaxScaler::fit(&features, &FEATURE_COLUMNS)?;
        let matrix = scaler.transform(&features)?;
        debug!("Scaled {} x {} feature matrix", matrix.n_rows(), matrix.n_cols());

        Ok(PreparedDataset { tracks, features, matrix, scaler, exclusions })
    }
}

/// `None` when any column is empty; otherwise the labelled row, or the
/// release-date error.
fn complete(r: &DatasetRecord) -> Option<Result<PreparedTrack, PreprocessError>> {
    let name = r.name.as_deref()?;
    let artist = r.artist.as_deref()?;
    let album = r.album.as_deref()?;
    let release_date = r.release_date.as_deref()?;
    let length = r.length?;
    let popularity = r.popularity?;
    let uri = r.uri.as_deref()?;
    let features = [
        r.acousticness?,
        r.danceability?,
        r.energy?,
        r.instrumentalness?,
        r.liveness?,
        r.loudness?,
        r.speechiness?,
        r.tempo?,
        r.valence?,
        r.time_signature? as f64,
        r.key? as f64,
        r.mode? as f64,
    ];

    Some(derive_release_year(release_date).map(|release_year| PreparedTrack {
        id: TrackId::new(r.id.clone()),
        song: format!("{name} - {artist}"),
        album: album.to_string(),
        length,
        release_year,
        popularity,
        features,
        uri: uri.to_string(),
    }))
}
