//! # Pipeline
//!
//! Runs the stages in order, each one reading the previous stage's artifact
//! and writing its own:
//!
//! ```text
//! collect  -> track_ids.json
//! fetch    -> dataset.db
//! cluster  -> preprocessor.json, model.json, clusters.json
//! ```
//!
//! Because every stage starts from what is on disk, a failed or interrupted
//! run resumes from the last artifact that was written.

use crate::catalog::CatalogClient;
use crate::clock::Sleeper;
use crate::cluster::{
    ClusterFitter, ClusterSelector, ClusterSummary, ElbowSelection, KMeansModel,
    ProjectedPoint,
};
use crate::config::PipelineConfig;
use crate::db::{self, DatasetRecord};
use crate::ingest::{BatchFeatureFetcher, FetchReport, TrackIdCollector};
use crate::preprocess::{FeaturePreprocessor, PreparedDataset};
use crate::retry::RequestScheduler;
use crate::store::{
    ArtifactStore, CLUSTERS_FILE, DATASET_FILE, MODEL_FILE, PREPROCESSOR_FILE, TRACK_IDS_FILE,
};
use crate::track::{TrackId, FEATURE_COLUMNS};
use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Contents of `clusters.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterReport {
    pub k: usize,
    /// How k was chosen.
    pub selection: KSelection,
    /// Inertia curve of the sweep; empty when k was forced.
    pub elbow_curve: Vec<(usize, f64)>,
    pub feature_columns: Vec<String>,
    pub explained_variance_ratio: Vec<f64>,
    pub summaries: Vec<ClusterSummary>,
    pub points: Vec<ProjectedPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KSelection {
    Forced,
    Elbow,
    Fallback,
}

/// Everything the cluster stage produced.
#[derive(Debug, Clone)]
pub struct ClusterOutcome {
    pub prepared: PreparedDataset,
    pub model: KMeansModel,
    pub assignments: Vec<usize>,
    pub report: ClusterReport,
}

pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    store: ArtifactStore,
    scheduler: RequestScheduler,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a PipelineConfig, store: ArtifactStore, sleeper: Arc<dyn Sleeper>) -> Self {
        let scheduler = RequestScheduler::new(config.retry.policy(), config.fetch.pacing(), sleeper);
        Self {
            config,
            store,
            scheduler,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn collect(&self, client: &dyn CatalogClient) -> Result<Vec<TrackId>> {
        TrackIdCollector::new(client, &self.scheduler).collect(&self.store)
    }

    /// Fetches the configured window of collected ids into the dataset.
    ///
    /// A full fetch replaces the dataset. A windowed fetch (`start > 0` or an
    /// explicit `count`) merges into it: rows for ids already present are
    /// replaced in place and new rows are appended.
    pub fn fetch(&self, client: &dyn CatalogClient) -> Result<FetchReport> {
        let ids: Vec<TrackId> = if self.store.exists(TRACK_IDS_FILE) {
            self.store.load(TRACK_IDS_FILE)?
        } else {
            anyhow::bail!(
                "No collected track ids at {}. Run `sonica collect` first.",
                self.store.path(TRACK_IDS_FILE).display()
            );
        };

        let fetch = &self.config.fetch;
        let count = fetch.count.unwrap_or(usize::MAX);
        let report = BatchFeatureFetcher::new(client, &self.scheduler).fetch(
            &ids,
            fetch.start,
            count,
            fetch.batch_size,
        )?;

        let fetched: Vec<DatasetRecord> = report.rows.iter().map(DatasetRecord::from).collect();
        let windowed = fetch.start > 0 || fetch.count.is_some();
        let records = if windowed && self.store.exists(DATASET_FILE) {
            let existing = db::load_dataset(&self.store.path(DATASET_FILE))?;
            merge_records(existing, fetched)
        } else {
            fetched
        };

        let path = self
            .store
            .write_atomic_path(DATASET_FILE, |path| db::save_dataset(path, &records))?;
        info!(
            "Fetched {} tracks ({} excluded); dataset now holds {} rows at {}",
            report.rows.len(),
            report.exclusions.len(),
            records.len(),
            path.display()
        );

        Ok(report)
    }

    /// Loads the dataset and cleans and scales it. Nothing is written; the
    /// scaler is persisted by [`Pipeline::cluster`] together with the model.
    pub fn prepare(&self) -> Result<PreparedDataset> {
        let records = db::load_dataset(&self.store.path(DATASET_FILE))?;
        FeaturePreprocessor::new()
            .prepare(&records)
            .context("Failed to prepare the dataset for clustering")
    }

    /// Prepares the dataset, picks k (unless `forced_k` is given) and fits the
    /// clusters. The scaler, model and scatter export are written only once
    /// the fit has succeeded, so a failed run leaves the previous set intact.
    pub fn cluster(&self, forced_k: Option<usize>) -> Result<ClusterOutcome> {
        let prepared = self.prepare()?;
        let settings = &self.config.clustering;
        let params = settings.kmeans_params();
        let rows = prepared.matrix.n_rows();

        let (k, selection, curve) = match forced_k {
            Some(k) => (k, KSelection::Forced, Vec::new()),
            None => {
                let ElbowSelection { curve, result } =
                    ClusterSelector::new(settings.k_range(), params, settings.sensitivity)
                        .select_k(&prepared.matrix)
                        .context("Failed to select the number of clusters")?;
                match result.detected() {
                    Some(k) => (k, KSelection::Elbow, curve),
                    None => {
                        let k = settings.fallback_k.min(rows);
                        warn!("No elbow in the inertia curve, falling back to k={k}");
                        (k, KSelection::Fallback, curve)
                    }
                }
            }
        };

        let fit = ClusterFitter::new(params)
            .fit(&prepared.matrix, k)
            .with_context(|| format!("Failed to fit {k} clusters"))?;
        let summaries = fit.summaries(&prepared.features)?;
        let songs: Vec<&str> = prepared.tracks.iter().map(|t| t.song.as_str()).collect();

        let report = ClusterReport {
            k,
            selection,
            elbow_curve: curve,
            feature_columns: FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect(),
            explained_variance_ratio: fit.projection.explained_variance_ratio.clone(),
            summaries,
            points: fit.scatter(&songs),
        };

        self.store.save(PREPROCESSOR_FILE, &prepared.scaler)?;
        self.store.save(MODEL_FILE, &fit.model)?;
        let path = self.store.save(CLUSTERS_FILE, &report)?;
        info!("Wrote {k} clusters for {rows} tracks to {}", path.display());

        Ok(ClusterOutcome {
            prepared,
            model: fit.model,
            assignments: fit.assignments,
            report,
        })
    }

    /// Collect, fetch, cluster.
    pub fn run_all(&self, client: &dyn CatalogClient) -> Result<ClusterOutcome> {
        self.collect(client)?;
        self.fetch(client)?;
        self.cluster(None)
    }
}

fn merge_records(existing: Vec<DatasetRecord>, fetched: Vec<DatasetRecord>) -> Vec<DatasetRecord> {
    let mut merged = existing;
    let positions: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id.clone(), i))
        .collect();

    for record in fetched {
        match positions.get(&record.id) {
            Some(&i) => merged[i] = record,
            None => merged.push(record),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, name: &str) -> DatasetRecord {
        DatasetRecord {
            id: id.to_string(),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_replaces_and_appends() {
        let existing = vec![record("a", "old a"), record("b", "b")];
        let fetched = vec![record("c", "c"), record("a", "new a")];
        let merged = merge_records(existing, fetched);

        let ids: Vec<&str> = merged.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(merged[0].name.as_deref(), Some("new a"));
    }

    #[test]
    fn test_selection_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&KSelection::Fallback).unwrap(), "\"fallback\"");
    }
}
