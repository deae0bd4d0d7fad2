//! Cluster-count selection.
//!
//! Sweeps k over a range, records the k-means inertia of each fit and looks
//! for the elbow of the (k, inertia) curve with the Kneedle heuristic for
//! convex, decreasing curves.

use super::kmeans::{KMeans, KMeansParams};
use super::matrix::FeatureMatrix;
use super::ClusterError;
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Outcome of the knee search. Callers pick the k to use for
/// [`ElbowResult::Undetected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElbowResult {
    Detected(usize),
    Undetected,
}

impl ElbowResult {
    pub fn detected(self) -> Option<usize> {
        match self {
            ElbowResult::Detected(k) => Some(k),
            ElbowResult::Undetected => None,
        }
    }
}

/// The inertia curve and the elbow found on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElbowSelection {
    pub curve: Vec<(usize, f64)>,
    pub result: ElbowResult,
}

#[derive(Debug, Clone)]
pub struct ClusterSelector {
    k_range: RangeInclusive<usize>,
    params: KMeansParams,
    sensitivity: f64,
}

impl ClusterSelector {
    pub fn new(k_range: RangeInclusive<usize>, params: KMeansParams, sensitivity: f64) -> Self {
        Self {
            k_range,
            params,
            sensitivity,
        }
    }

    /// Candidate counts for a matrix with `rows` rows.
    pub fn candidates(&self, rows: usize) -> RangeInclusive<usize> {
        *self.k_range.start()..=(*self.k_range.end()).min(rows)
    }

    pub fn select_k(&self, matrix: &FeatureMatrix) -> Result<ElbowSelection, ClusterError> {
        let rows = matrix.n_rows();
        if rows == 0 {
            return Err(ClusterError::EmptyMatrix);
        }

        let candidates = self.candidates(rows);
        let (low, high) = (*candidates.start(), *candidates.end());
        if low == 0 || low > high {
            return Err(ClusterError::InvalidK { k: low, rows });
        }

        debug!("Sweeping k over {low}..={high} on {rows} rows");

        // Each fit is seeded, so the parallel sweep matches a sequential one.
        let curve = candidates
            .into_par_iter()
            .map(|k| {
                KMeans::new(k, self.params)
                    .fit(matrix)
                    .map(|model| (k, model.inertia))
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (k, inertia) in &curve {
            debug!("k={k}: inertia={inertia:.6}");
        }

        let xs: Vec<f64> = curve.iter().map(|(k, _)| *k as f64).collect();
        let ys: Vec<f64> = curve.iter().map(|(_, inertia)| *inertia).collect();

        let result = match find_knee(&xs, &ys, self.sensitivity) {
            Some(index) => ElbowResult::Detected(curve[index].0),
            None => ElbowResult::Undetected,
        };

        match result {
            ElbowResult::Detected(k) => info!("Elbow detected at k={k}"),
            ElbowResult::Undetected => info!("No elbow detected for k in {low}..={high}"),
        }

        Ok(ElbowSelection { curve, result })
    }
}

/// Kneedle for a convex, decreasing curve. Returns the index of the knee.
pub fn find_knee(xs: &[f64], ys: &[f64], sensitivity: f64) -> Option<usize> {
    let n = xs.len();
    if n < 2 || ys.len() != n {
        return None;
    }

    let x_norm = normalize(xs)?;
    let y_norm = normalize(ys)?;

    // Flip so the knee becomes a local maximum of the difference curve.
    let diff: Vec<f64> = y_norm
        .iter()
        .zip(&x_norm)
        .map(|(y, x)| (1.0 - y) - x)
        .collect();

    let maxima = extrema(&diff, |centre, neighbour| centre >= neighbour);
    let minima = extrema(&diff, |centre, neighbour| centre <= neighbour);
    let first_maximum = *maxima.first()?;

    let mean_step = x_norm.windows(2).map(|w| (w[1] - w[0]).abs()).sum::<f64>() / (n - 1) as f64;

    let mut threshold = 0.0;
    let mut threshold_index = 0;

    for i in first_maximum..n - 1 {
        if maxima.contains(&i) {
            threshold = diff[i] - sensitivity * mean_step;
            threshold_index = i;
        }
        if minima.contains(&i) {
            threshold = 0.0;
        }
        if diff[i + 1] < threshold {
            return Some(threshold_index);
        }
    }

    None
}

fn normalize(values: &[f64]) -> Option<Vec<f64>> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if !range.is_finite() || range <= 0.0 {
        return None;
    }
    Some(values.iter().map(|v| (v - min) / range).collect())
}

/// Indices whose value beats both neighbours under `cmp`; the ends compare
/// against their only neighbour.
fn extrema(values: &[f64], cmp: impl Fn(f64, f64) -> bool) -> Vec<usize> {
    let last = values.len().saturating_sub(1);
    (0..values.len())
        .filter(|&i| {
            let left = values[i.saturating_sub(1)];
            let right = values[(i + 1).min(last)];
            cmp(values[i], left) && cmp(values[i], right)
        })
        .collect()
}
