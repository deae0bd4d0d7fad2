//! K-means clustering.
//!
//! k-means++ seeding from a seeded RNG, then Lloyd iterations. The best of
//! `n_init` independently seeded runs (lowest inertia) is kept.

use super::matrix::{squared_distance, FeatureMatrix};
use super::ClusterError;
use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KMeansParams {
    pub max_iterations: usize,
    /// Relative to the mean per-column variance of the data.
    pub tolerance: f64,
    pub n_init: usize,
    pub seed: u64,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            max_iterations: 300,
            tolerance: 1e-4,
            n_init: 10,
            seed: 42,
        }
    }
}

/// A fitted partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KMeansModel {
    pub k: usize,
    pub centroids: Vec<Vec<f64>>,
    /// Sum of squared distances from each row to its centroid.
    pub inertia: f64,
    pub iterations: usize,
    pub converged: bool,
    pub seed: u64,
}

impl KMeansModel {
    /// Index of the nearest centroid.
    pub fn predict(&self, row: &[f64]) -> usize {
        nearest(row, &self.centroids).0
    }

    /// Nearest centroid for every row of `matrix`.
    pub fn assign(&self, matrix: &FeatureMatrix) -> Result<Vec<usize>, ClusterError> {
        let dims = self.centroids.first().map_or(0, Vec::len);
        if matrix.n_cols() != dims {
            return Err(ClusterError::DimensionMismatch {
                expected: dims,
                found: matrix.n_cols(),
            });
        }
        Ok(matrix.rows().map(|row| self.predict(row)).collect())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KMeans {
    k: usize,
    params: KMeansParams,
}

struct Run {
    centroids: Vec<Vec<f64>>,
    inertia: f64,
    iterations: usize,
    converged: bool,
}

impl KMeans {
    pub fn new(k: usize, params: KMeansParams) -> Self {
        Self { k, params }
    }

    pub fn fit(&self, matrix: &FeatureMatrix) -> Result<KMeansModel, ClusterError> {
        let n = matrix.n_rows();
        if n == 0 {
            return Err(ClusterError::EmptyMatrix);
        }
        if self.k == 0 || self.k > n {
            return Err(ClusterError::InvalidK { k: self.k, rows: n });
        }

        let tolerance = self.params.tolerance * mean_variance(matrix);
        let mut best: Option<Run> = None;

        for run in 0..self.params.n_init.max(1) {
            let mut rng = StdRng::seed_from_u64(self.params.seed.wrapping_add(run as u64));
            let result = self.lloyd(matrix, &mut rng, tolerance);
            trace!(
                "k={} run {run}: inertia={:.6} after {} iterations",
                self.k,
                result.inertia,
                result.iterations
            );
            if best.as_ref().map_or(true, |b| result.inertia < b.inertia) {
                best = Some(result);
            }
        }

        let best = best.ok_or(ClusterError::EmptyMatrix)?;
        debug!(
            "k-means k={}: inertia={:.6}, iterations={}, converged={}",
            self.k, best.inertia, best.iterations, best.converged
        );

        Ok(KMeansModel {
            k: self.k,
            centroids: best.centroids,
            inertia: best.inertia,
            iterations: best.iterations,
            converged: best.converged,
            seed: self.params.seed,
        })
    }

    fn lloyd(&self, matrix: &FeatureMatrix, rng: &mut StdRng, tolerance: f64) -> Run {
        let mut centroids = kmeans_plus_plus(matrix, self.k, rng);
        let mut assignments = vec![0usize; matrix.n_rows()];
        let mut iterations = 0;
        let mut converged = false;

        for iter in 0..self.params.max_iterations {
            iterations = iter + 1;

            for (slot, row) in assignments.iter_mut().zip(matrix.rows()) {
                *slot = nearest(row, &centroids).0;
            }

            let updated = update_centroids(matrix, &assignments, &centroids);
            let shift: f64 = centroids
                .iter()
                .zip(&updated)
                .map(|(old, new)| squared_distance(old, new))
                .sum();
            centroids = updated;

            if shift <= tolerance {
                converged = true;
                break;
            }
        }

        let inertia = inertia(matrix, &centroids);
        Run { centroids, inertia, iterations, converged }
    }
}

/// Sum of squared distances from every row to its nearest centroid.
pub fn inertia(matrix: &FeatureMatrix, centroids: &[Vec<f64>]) -> f64 {
    matrix.rows().map(|row| nearest(row, centroids).1).sum()
}

/// (index, squared distance) of the closest centroid.
fn nearest(row: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, squared_distance(row, c)))
        .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best })
}

/// Picks initial centroids, each next one with probability proportional to
/// its squared distance from the closest centroid chosen so far.
fn kmeans_plus_plus(matrix: &FeatureMatrix, k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let n = matrix.n_rows();
    let mut centroids = Vec::with_capacity(k);
    centroids.push(matrix.row(rng.gen_range(0..n)).to_vec());

    let mut min_distances: Vec<f64> = matrix
        .rows()
        .map(|row| squared_distance(row, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = min_distances.iter().sum();
        let next = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut cumulative = 0.0;
            min_distances
                .iter()
                .position(|d| {
                    cumulative += d;
                    cumulative > target
                })
                .unwrap_or(n - 1)
        } else {
            // Every row sits on a centroid already.
            rng.gen_range(0..n)
        };

        let centroid = matrix.row(next).to_vec();
        for (d, row) in min_distances.iter_mut().zip(matrix.rows()) {
            *d = d.min(squared_distance(row, &centroid));
        }
        centroids.push(centroid);
    }

    centroids
}

/// Means of the assigned rows. A cluster that lost all its rows takes over
/// the row farthest from its current centroid.
fn update_centroids(
    matrix: &FeatureMatrix,
    assignments: &[usize],
    previous: &[Vec<f64>],
) -> Vec<Vec<f64>> {
    let k = previous.len();
    let dims = matrix.n_cols();
    let mut sums = vec![vec![0.0; dims]; k];
    let mut counts = vec![0usize; k];

    for (row, &cluster) in matrix.rows().zip(assignments) {
        counts[cluster] += 1;
        for (s, v) in sums[cluster].iter_mut().zip(row) {
            *s += v;
        }
    }

    let mut taken: Vec<usize> = Vec::new();
    sums.into_iter()
        .zip(counts)
        .enumerate()
        .map(|(cluster, (mut sum, count))| {
            if count > 0 {
                sum.iter_mut().for_each(|s| *s /= count as f64);
                return sum;
            }

            let farthest = matrix
                .rows()
                .enumerate()
                .filter(|(i, _)| !taken.contains(i))
                .map(|(i, row)| (i, squared_distance(row, &previous[assignments[i]])))
                .fold(None, |best: Option<(usize, f64)>, cur| match best {
                    Some(b) if b.1 >= cur.1 => Some(b),
                    _ => Some(cur),
                });

            match farthest {
                Some((i, _)) => {
                    taken.push(i);
                    matrix.row(i).to_vec()
                }
                None => previous[cluster].clone(),
            }
        })
        .collect()
}

fn mean_variance(matrix: &FeatureMatrix) -> f64 {
    let n = matrix.n_rows() as f64;
    if n == 0.0 || matrix.n_cols() == 0 {
        return 0.0;
    }
    let means = matrix.column_means();
    let total: f64 = (0..matrix.n_cols())
        .map(|j| matrix.column(j).map(|v| (v - means[j]).powi(2)).sum::<f64>() / n)
        .sum();
    total / matrix.n_cols() as f64
}
