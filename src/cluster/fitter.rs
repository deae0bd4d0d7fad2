//! Final k-means fit at the chosen k.

use super::kmeans::{KMeans, KMeansModel, KMeansParams};
use super::matrix::FeatureMatrix;
use super::pca::Projection;
use super::ClusterError;
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy)]
pub struct ClusterFitter {
    params: KMeansParams,
}

/// Assignments and the inspection projection for one fit.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterFit {
    pub model: KMeansModel,
    /// One cluster index per matrix row.
    pub assignments: Vec<usize>,
    pub projection: Projection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub cluster: usize,
    pub size: usize,
    pub mean_features: Vec<f64>,
}

/// A row of the scatter export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedPoint {
    pub song: String,
    pub cluster: usize,
    pub x: f64,
    pub y: f64,
}

impl ClusterFitter {
    pub fn new(params: KMeansParams) -> Self {
        Self { params }
    }

    pub fn fit(&self, matrix: &FeatureMatrix, k: usize) -> Result<ClusterFit, ClusterError> {
        let model = KMeans::new(k, self.params).fit(matrix)?;
        let assignments = model.assign(matrix)?;
        let projection = Projection::project_2d(matrix)?;

        info!(
            "Fitted {k} clusters over {} rows (inertia {:.4}, PCA variance {:.1}% + {:.1}%)",
            matrix.n_rows(),
            model.inertia,
            projection.explained_variance_ratio[0] * 100.0,
            projection.explained_variance_ratio[1] * 100.0
        );

        Ok(ClusterFit {
            model,
            assignments,
            projection,
        })
    }
}

impl ClusterFit {
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.model.k];
        for &cluster in &self.assignments {
            sizes[cluster] += 1;
        }
        sizes
    }

    /// Size and per-column mean of `features` for each cluster. `features`
    /// is row-aligned with the fitted matrix, typically the unscaled values.
    pub fn summaries(&self, features: &FeatureMatrix) -> Result<Vec<ClusterSummary>, ClusterError> {
        if features.n_rows() != self.assignments.len() {
            return Err(ClusterError::DimensionMismatch {
                expected: self.assignments.len(),
                found: features.n_rows(),
            });
        }

        let mut sums = vec![vec![0.0; features.n_cols()]; self.model.k];
        for (row, &cluster) in features.rows().zip(&self.assignments) {
            for (s, v) in sums[cluster].iter_mut().zip(row) {
                *s += v;
            }
        }

        Ok(sums
            .into_iter()
            .zip(self.sizes())
            .enumerate()
            .map(|(cluster, (mut mean_features, size))| {
                if size > 0 {
                    mean_features.iter_mut().for_each(|m| *m /= size as f64);
                }
                ClusterSummary {
                    cluster,
                    size,
                    mean_features,
                }
            })
            .collect())
    }

    /// Labels each projected row with its song and cluster.
    pub fn scatter<S: AsRef<str>>(&self, songs: &[S]) -> Vec<ProjectedPoint> {
        songs
            .iter()
            .zip(&self.assignments)
            .zip(&self.projection.points)
            .map(|((song, &cluster), point)| ProjectedPoint {
                song: song.as_ref().to_string(),
                cluster,
                x: point[0],
                y: point[1],
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaled() -> FeatureMatrix {
        FeatureMatrix::from_rows(&[[0.0, 0.0], [0.05, 0.0], [1.0, 1.0], [0.95, 1.0]]).unwrap()
    }

    #[test]
    fn test_fit_assigns_every_row() {
        let fit = ClusterFitter::new(KMeansParams::default())
            .fit(&scaled(), 2)
            .unwrap();
        assert_eq!(fit.assignments.len(), 4);
        assert_eq!(fit.assignments[0], fit.assignments[1]);
        assert_eq!(fit.assignments[2], fit.assignments[3]);
        assert_ne!(fit.assignments[0], fit.assignments[2]);
        assert_eq!(fit.projection.points.len(), 4);
        assert_eq!(fit.sizes(), vec![2, 2]);
    }

    #[test]
    fn test_predictions_match_assignments() {
        let matrix = scaled();
        let fit = ClusterFitter::new(KMeansParams::default()).fit(&matrix, 2).unwrap();
        let predicted: Vec<usize> = matrix.rows().map(|row| fit.model.predict(row)).collect();
        assert_eq!(predicted, fit.assignments);
    }

    #[test]
    fn test_summaries_use_given_features() {
        let fit = ClusterFitter::new(KMeansParams::default())
            .fit(&scaled(), 2)
            .unwrap();
        let raw = FeatureMatrix::from_rows(&[[100.0], [110.0], [60.0], [70.0]]).unwrap();
        let summaries = fit.summaries(&raw).unwrap();

        let first = &summaries[fit.assignments[0]];
        let second = &summaries[fit.assignments[2]];
        assert_eq!(first.size, 2);
        assert_eq!(first.mean_features, vec![105.0]);
        assert_eq!(second.mean_features, vec![65.0]);

        let short = FeatureMatrix::from_rows(&[[1.0]]).unwrap();
        assert!(fit.summaries(&short).is_err());
    }

    #[test]
    fn test_scatter_labels_rows() {
        let fit = ClusterFitter::new(KMeansParams::default())
            .fit(&scaled(), 2)
            .unwrap();
        let songs = ["a - x", "b - x", "c - y", "d - y"];
        let points = fit.scatter(&songs);
        assert_eq!(points.len(), 4);
        assert_eq!(points[2].song, "c - y");
        assert_eq!(points[2].cluster, fit.assignments[2]);
        assert_eq!(points[2].x, fit.projection.points[2][0]);
    }

    #[test]
    fn test_k_larger_than_rows() {
        let err = ClusterFitter::new(KMeansParams::default())
            .fit(&scaled(), 5)
            .unwrap_err();
        assert_eq!(err, ClusterError::InvalidK { k: 5, rows: 4 });
    }
}
