//! Two-component principal projection, used only to inspect clusters.

use super::matrix::FeatureMatrix;
use super::ClusterError;
use serde::{Deserialize, Serialize};

const POWER_ITERATIONS: usize = 1000;
const CONVERGENCE: f64 = 1e-20;
/// Variance below this share of the total counts as numerical noise.
const NOISE_FLOOR: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    /// Unit principal axes, strongest first.
    pub components: Vec<Vec<f64>>,
    pub explained_variance_ratio: Vec<f64>,
    /// One `[pc1, pc2]` pair per input row.
    pub points: Vec<[f64; 2]>,
}

impl Projection {
    /// Projects the centred rows of `matrix` onto its two leading principal
    /// axes. Axes beyond the data's rank come out as zero vectors.
    pub fn project_2d(matrix: &FeatureMatrix) -> Result<Self, ClusterError> {
        let n = matrix.n_rows();
        if n == 0 {
            return Err(ClusterError::EmptyMatrix);
        }
        let dims = matrix.n_cols();
        let means = matrix.column_means();

        let mut covariance = vec![vec![0.0; dims]; dims];
        for row in matrix.rows() {
            for i in 0..dims {
                let di = row[i] - means[i];
                for j in i..dims {
                    covariance[i][j] += di * (row[j] - means[j]);
                }
            }
        }
        let denominator = if n > 1 { (n - 1) as f64 } else { 1.0 };
        for i in 0..dims {
            for j in i..dims {
                covariance[i][j] /= denominator;
                covariance[j][i] = covariance[i][j];
            }
        }

        let total_variance: f64 = (0..dims).map(|i| covariance[i][i]).sum();
        let floor = (total_variance * NOISE_FLOOR).max(f64::EPSILON);

        let mut components: Vec<Vec<f64>> = Vec::with_capacity(2);
        let mut ratios = Vec::with_capacity(2);
        for _ in 0..2.min(dims) {
            let (eigenvalue, vector) = leading_eigenpair(&covariance, &components, floor);
            ratios.push(if total_variance > 0.0 {
                eigenvalue / total_variance
            } else {
                0.0
            });
            deflate(&mut covariance, eigenvalue, &vector);
            components.push(vector);
        }
        while components.len() < 2 {
            components.push(vec![0.0; dims]);
            ratios.push(0.0);
        }

        let points = matrix
            .rows()
            .map(|row| {
                let mut point = [0.0; 2];
                for (p, axis) in point.iter_mut().zip(&components) {
                    *p = row
                        .iter()
                        .zip(&means)
                        .zip(axis)
                        .map(|((v, m), a)| (v - m) * a)
                        .sum();
                }
                point
            })
            .collect();

        Ok(Self {
            components,
            explained_variance_ratio: ratios,
            points,
        })
    }
}

/// Power iteration on a symmetric positive semi-definite matrix, kept
/// orthogonal to the axes already found.
fn leading_eigenpair(matrix: &[Vec<f64>], found: &[Vec<f64>], floor: f64) -> (f64, Vec<f64>) {
    let dims = matrix.len();
    let mut vector = vec![1.0 / (dims as f64).sqrt(); dims];

    for _ in 0..POWER_ITERATIONS {
        let mut next = multiply(matrix, &vector);
        for axis in found {
            let overlap: f64 = next.iter().zip(axis).map(|(a, b)| a * b).sum();
            next.iter_mut().zip(axis).for_each(|(v, a)| *v -= overlap * a);
        }
        let norm = next.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm <= floor {
            return (0.0, vec![0.0; dims]);
        }
        let next: Vec<f64> = next.iter().map(|v| v / norm).collect();
        let delta: f64 = next.iter().zip(&vector).map(|(a, b)| (a - b).powi(2)).sum();
        vector = next;
        if delta < CONVERGENCE {
            break;
        }
    }

    orient(&mut vector);
    let eigenvalue = vector
        .iter()
        .zip(multiply(matrix, &vector))
        .map(|(v, mv)| v * mv)
        .sum::<f64>()
        .max(0.0);
    (eigenvalue, vector)
}

fn multiply(matrix: &[Vec<f64>], vector: &[f64]) -> Vec<f64> {
    matrix
        .iter()
        .map(|row| row.iter().zip(vector).map(|(a, b)| a * b).sum())
        .collect()
}

fn deflate(matrix: &mut [Vec<f64>], eigenvalue: f64, vector: &[f64]) {
    for (i, row) in matrix.iter_mut().enumerate() {
        for (j, value) in row.iter_mut().enumerate() {
            *value -= eigenvalue * vector[i] * vector[j];
        }
    }
}

/// Largest-magnitude entry positive.
fn orient(vector: &mut [f64]) {
    let pivot = vector
        .iter()
        .copied()
        .fold(0.0_f64, |best, v| if v.abs() > best.abs() { v } else { best });
    if pivot < 0.0 {
        vector.iter_mut().for_each(|v| *v = -*v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collinear_data_has_one_component() {
        let rows: Vec<[f64; 3]> = (0..10)
            .map(|i| {
                let t = i as f64;
                [t, 2.0 * t, -t]
            })
            .collect();
        let matrix = FeatureMatrix::from_rows(&rows).unwrap();
        let projection = Projection::project_2d(&matrix).unwrap();

        assert!((projection.explained_variance_ratio[0] - 1.0).abs() < 1e-6);
        assert!(projection.explained_variance_ratio[1].abs() < 1e-6);
        assert_eq!(projection.points.len(), 10);
        for point in &projection.points {
            assert!(point[1].abs() < 1e-6);
        }
    }

    #[test]
    fn test_axes_are_orthonormal() {
        let matrix = FeatureMatrix::from_rows(&[
            [2.0, 0.1, 0.0],
            [-2.0, -0.1, 0.2],
            [0.5, 1.0, -0.3],
            [-0.5, -1.0, 0.1],
            [1.0, 0.4, 0.0],
        ])
        .unwrap();
        let projection = Projection::project_2d(&matrix).unwrap();
        let [a, b] = [&projection.components[0], &projection.components[1]];

        let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
        let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!(dot.abs() < 1e-9);
        assert!((norm_a - 1.0).abs() < 1e-6);
        assert!((norm_b - 1.0).abs() < 1e-6);
        assert!(projection.explained_variance_ratio[0] >= projection.explained_variance_ratio[1]);
    }

    #[test]
    fn test_sign_is_deterministic() {
        let forward = FeatureMatrix::from_rows(&[[0.0, 0.0], [1.0, 1.1], [2.0, 1.9]]).unwrap();
        let projection = Projection::project_2d(&forward).unwrap();
        let axis = &projection.components[0];
        let pivot = axis.iter().copied().fold(0.0_f64, |b, v| if v.abs() > b.abs() { v } else { b });
        assert!(pivot > 0.0);
    }

    #[test]
    fn test_constant_data() {
        let matrix = FeatureMatrix::from_rows(&[[1.0, 1.0], [1.0, 1.0]]).unwrap();
        let projection = Projection::project_2d(&matrix).unwrap();
        assert_eq!(projection.explained_variance_ratio, vec![0.0, 0.0]);
        assert_eq!(projection.points, vec![[0.0, 0.0], [0.0, 0.0]]);
    }

    #[test]
    fn test_single_column() {
        let matrix = FeatureMatrix::from_rows(&[[1.0], [3.0]]).unwrap();
        let projection = Projection::project_2d(&matrix).unwrap();
        assert_eq!(projection.points, vec![[-1.0, 0.0], [1.0, 0.0]]);
    }

    #[test]
    fn test_empty() {
        assert_eq!(
            Projection::project_2d(&FeatureMatrix::new(3)).unwrap_err(),
            ClusterError::EmptyMatrix
        );
    }
}
