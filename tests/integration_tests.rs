//! # Integration Tests for Sonica
//!
//! End-to-end runs of the pipeline against the scripted in-memory catalog,
//! artifact round trips in temporary directories, and the CLI binary.

use anyhow::Result;
use sonica::catalog::memory::InMemoryCatalog;
use sonica::clock::RecordingSleeper;
use sonica::cluster::KMeansModel;
use sonica::config::PipelineConfig;
use sonica::db;
use sonica::pipeline::{ClusterReport, KSelection, Pipeline};
use sonica::preprocess::MinMaxScaler;
use sonica::store::{
    ArtifactStore, CLUSTERS_FILE, DATASET_FILE, MODEL_FILE, PREPROCESSOR_FILE, TRACK_IDS_FILE,
};
use sonica::track::{ExclusionReason, RawAudioFeatures, TrackId, TrackRecord};
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

fn record(name: &str) -> TrackRecord {
    TrackRecord {
        name: name.to_string(),
        album: format!("{name} album"),
        artist: format!("{name} artist"),
        release_date: "1999-10-01".to_string(),
        length_ms: 180_000,
        popularity: 40,
    }
}

fn features(id: &str, energy: f64, danceability: f64, tempo: f64) -> RawAudioFeatures {
    RawAudioFeatures {
        id: Some(id.to_string()),
        acousticness: Some(0.2),
        danceability: Some(danceability),
        energy: Some(energy),
        instrumentalness: Some(0.0),
        liveness: Some(0.1),
        loudness: Some(-6.0),
        speechiness: Some(0.05),
        tempo: Some(tempo),
        valence: Some(0.5),
        time_signature: Some(4),
        key: Some(5),
        mode: Some(1),
        uri: Some(format!("spotify:track:{id}")),
    }
}

/// Thirty tracks in three clearly different sonic groups.
fn grouped_library() -> InMemoryCatalog {
    let groups = [(0.1, 0.1, 80.0), (0.5, 0.9, 120.0), (0.9, 0.5, 180.0)];
    let mut catalog = InMemoryCatalog::new();
    for (g, (energy, dance, tempo)) in groups.iter().enumerate() {
        for i in 0..10 {
            let id = format!("g{g}t{i}");
            let jitter = i as f64 * 0.004;
            catalog = catalog.with_track(
                &id,
                record(&id),
                Some(features(&id, energy + jitter, dance - jitter, tempo + i as f64 * 0.5)),
            );
        }
    }
    catalog
}

fn test_config(dir: &TempDir) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.artifacts.dir = dir.path().join("artifacts");
    config
}

fn store_for(config: &PipelineConfig) -> Result<ArtifactStore> {
    Ok(ArtifactStore::new(config.artifacts_dir()?))
}

#[cfg(test)]
mod pipeline_tests {
    use super::*;

    #[test]
    fn test_rate_limited_and_null_feature_tracks() -> Result<()> {
        let dir = TempDir::new()?;
        let config = test_config(&dir);
        let sleeper = Arc::new(RecordingSleeper::new());

        let mut catalog = InMemoryCatalog::new();
        for (i, id) in ["t1", "t2", "t3", "t4", "t5"].iter().enumerate() {
            let mut f = features(id, 0.2 * i as f64, 0.5, 100.0 + 10.0 * i as f64);
            if *id == "t4" {
                f.tempo = None;
            }
            catalog = catalog.with_track(id, record(id), Some(f));
        }
        let catalog = catalog.rate_limit_track("t3", 2);

        let pipeline = Pipeline::new(&config, store_for(&config)?, sleeper.clone());
        pipeline.collect(&catalog)?;
        let report = pipeline.fetch(&catalog)?;

        let ids: Vec<&str> = report.rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3", "t5"]);
        assert_eq!(report.exclusions.len(), 1);
        assert_eq!(report.exclusions[0].id, TrackId::new("t4"));
        assert_eq!(
            report.exclusions[0].reason,
            ExclusionReason::NullFeature("tempo".to_string())
        );

        let t3_calls = catalog.track_calls().iter().filter(|id| id.as_str() == "t3").count();
        assert_eq!(t3_calls, 3);
        assert!(!sleeper.sleeps().is_empty());

        let records = db::load_dataset(&pipeline.store().path(DATASET_FILE))?;
        assert_eq!(records.len(), 4);
        assert_eq!(records[2].id, "t3");
        Ok(())
    }

    #[test]
    fn test_run_all_finds_three_groups() -> Result<()> {
        let dir = TempDir::new()?;
        let config = test_config(&dir);
        let catalog = grouped_library();
        let pipeline = Pipeline::new(&config, store_for(&config)?, Arc::new(RecordingSleeper::new()));

        let outcome = pipeline.run_all(&catalog)?;
        let report = &outcome.report;

        assert_eq!(report.selection, KSelection::Elbow);
        assert!((2..=4).contains(&report.k), "k={}", report.k);
        assert_eq!(report.points.len(), 30);
        assert_eq!(report.summaries.iter().map(|s| s.size).sum::<usize>(), 30);
        assert_eq!(report.feature_columns.len(), 12);

        // Tracks of one group always share a cluster.
        if report.k == 3 {
            for group in outcome.assignments.chunks(10) {
                assert!(group.iter().all(|c| *c == group[0]));
            }
        }
        Ok(())
    }

    #[test]
    fn test_forced_k() -> Result<()> {
        let dir = TempDir::new()?;
        let config = test_config(&dir);
        let catalog = grouped_library();
        let pipeline = Pipeline::new(&config, store_for(&config)?, Arc::new(RecordingSleeper::new()));

        pipeline.collect(&catalog)?;
        pipeline.fetch(&catalog)?;
        let outcome = pipeline.cluster(Some(5))?;

        assert_eq!(outcome.report.k, 5);
        assert_eq!(outcome.report.selection, KSelection::Forced);
        assert!(outcome.report.elbow_curve.is_empty());
        assert_eq!(outcome.model.centroids.len(), 5);
        Ok(())
    }

    #[test]
    fn test_windowed_fetches_merge() -> Result<()> {
        let dir = TempDir::new()?;
        let catalog = grouped_library();

        let mut config = test_config(&dir);
        let store = store_for(&config)?;
        Pipeline::new(&config, store.clone(), Arc::new(RecordingSleeper::new())).collect(&catalog)?;

        config.fetch.count = Some(12);
        Pipeline::new(&config, store.clone(), Arc::new(RecordingSleeper::new())).fetch(&catalog)?;
        assert_eq!(db::load_dataset(&store.path(DATASET_FILE))?.len(), 12);

        config.fetch.start = 12;
        config.fetch.count = Some(100);
        let report =
            Pipeline::new(&config, store.clone(), Arc::new(RecordingSleeper::new())).fetch(&catalog)?;
        assert_eq!(report.rows.len(), 18);

        let records = db::load_dataset(&store.path(DATASET_FILE))?;
        assert_eq!(records.len(), 30);
        assert_eq!(records[0].id, "g0t0");
        assert_eq!(records[29].id, "g2t9");
        Ok(())
    }

    #[test]
    fn test_no_elbow_falls_back_to_configured_k() -> Result<()> {
        let dir = TempDir::new()?;
        let config = test_config(&dir);
        let catalog = InMemoryCatalog::new()
            .with_track("quiet", record("quiet"), Some(features("quiet", 0.1, 0.2, 70.0)))
            .with_track("loud", record("loud"), Some(features("loud", 0.9, 0.8, 170.0)));
        let pipeline = Pipeline::new(&config, store_for(&config)?, Arc::new(RecordingSleeper::new()));

        let outcome = pipeline.run_all(&catalog)?;
        let report = &outcome.report;

        assert_eq!(report.selection, KSelection::Fallback);
        assert_eq!(report.k, config.clustering.fallback_k.min(2));
        assert_eq!(report.elbow_curve.len(), 2);
        assert_eq!(outcome.model.centroids.len(), report.k);

        let stored: ClusterReport = pipeline.store().load(CLUSTERS_FILE)?;
        assert_eq!(stored.selection, KSelection::Fallback);
        Ok(())
    }

    #[test]
    fn test_fetch_without_collect_fails() -> Result<()> {
        let dir = TempDir::new()?;
        let config = test_config(&dir);
        let pipeline = Pipeline::new(&config, store_for(&config)?, Arc::new(RecordingSleeper::new()));

        let err = pipeline.fetch(&grouped_library()).unwrap_err();
        assert!(err.to_string().contains("sonica collect"));
        Ok(())
    }

    #[test]
    fn test_permanent_error_names_the_track() -> Result<()> {
        let dir = TempDir::new()?;
        let config = test_config(&dir);
        let catalog = grouped_library().missing_track("g1t3");
        let pipeline = Pipeline::new(&config, store_for(&config)?, Arc::new(RecordingSleeper::new()));

        pipeline.collect(&catalog)?;
        let err = pipeline.fetch(&catalog).unwrap_err();
        assert!(format!("{err:#}").contains("g1t3"));
        assert!(sonica::ingest::fetcher::is_permanent(&err));
        assert!(!pipeline.store().exists(DATASET_FILE));
        Ok(())
    }
}

#[cfg(test)]
mod artifact_tests {
    use super::*;

    #[test]
    fn test_artifacts_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        let config = test_config(&dir);
        let catalog = grouped_library();
        let pipeline = Pipeline::new(&config, store_for(&config)?, Arc::new(RecordingSleeper::new()));
        let outcome = pipeline.run_all(&catalog)?;
        let store = pipeline.store();

        let ids: Vec<TrackId> = store.load(TRACK_IDS_FILE)?;
        assert_eq!(ids.len(), 30);
        assert_eq!(ids[0], TrackId::new("g0t0"));

        let scaler: MinMaxScaler = store.load(PREPROCESSOR_FILE)?;
        let rescaled = scaler.transform(&outcome.prepared.features)?;
        assert_eq!(rescaled, outcome.prepared.matrix);

        let model: KMeansModel = store.load(MODEL_FILE)?;
        assert_eq!(model, outcome.model);
        assert_eq!(model.assign(&outcome.prepared.matrix)?, outcome.assignments);

        let report: ClusterReport = store.load(CLUSTERS_FILE)?;
        assert_eq!(report, outcome.report);

        // No temporary files are left next to the artifacts.
        let names: Vec<String> = std::fs::read_dir(store.dir())?
            .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<std::io::Result<_>>()?;
        assert_eq!(names.len(), 5, "{names:?}");
        Ok(())
    }

    #[test]
    fn test_failed_cluster_keeps_previous_artifacts() -> Result<()> {
        let dir = TempDir::new()?;
        let config = test_config(&dir);
        let pipeline = Pipeline::new(&config, store_for(&config)?, Arc::new(RecordingSleeper::new()));
        pipeline.run_all(&grouped_library())?;

        let store = pipeline.store();
        let snapshot = |name: &str| std::fs::read(store.path(name));
        let before = [
            snapshot(PREPROCESSOR_FILE)?,
            snapshot(MODEL_FILE)?,
            snapshot(CLUSTERS_FILE)?,
        ];

        // A louder library changes the fitted ranges.
        let louder = InMemoryCatalog::new()
            .with_track("l1", record("l1"), Some(features("l1", 0.2, 0.3, 60.0)))
            .with_track("l2", record("l2"), Some(features("l2", 30.0, 0.4, 210.0)))
            .with_track("l3", record("l3"), Some(features("l3", 0.8, 0.9, 140.0)));
        pipeline.collect(&louder)?;
        pipeline.fetch(&louder)?;

        assert!(pipeline.cluster(Some(9)).is_err());

        let after = [
            snapshot(PREPROCESSOR_FILE)?,
            snapshot(MODEL_FILE)?,
            snapshot(CLUSTERS_FILE)?,
        ];
        assert_eq!(before, after);

        let scaler: MinMaxScaler = store.load(PREPROCESSOR_FILE)?;
        let model: KMeansModel = store.load(MODEL_FILE)?;
        assert_eq!(scaler.min.len(), model.centroids[0].len());
        Ok(())
    }

    #[test]
    fn test_cluster_rerun_from_dataset() -> Result<()> {
        let dir = TempDir::new()?;
        let config = test_config(&dir);
        let catalog = grouped_library();
        let pipeline = Pipeline::new(&config, store_for(&config)?, Arc::new(RecordingSleeper::new()));
        let first = pipeline.run_all(&catalog)?;

        // A second pipeline needs only the stored dataset.
        let again = Pipeline::new(&config, store_for(&config)?, Arc::new(RecordingSleeper::new()));
        let second = again.cluster(None)?;
        assert_eq!(first.model, second.model);
        assert_eq!(first.assignments, second.assignments);
        Ok(())
    }
}

#[cfg(test)]
mod cli_tests {
    use super::*;

    #[test]
    fn test_cli_help_displays_correctly() {
        let output = Command::new(env!("CARGO_BIN_EXE_sonica"))
            .arg("--help")
            .output()
            .expect("Failed to execute sonica --help");

        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        for command in ["collect", "fetch", "cluster", "run", "completion"] {
            assert!(stdout.contains(command), "help is missing {command}");
        }
    }

    #[test]
    fn test_cli_version_flag() {
        let output = Command::new(env!("CARGO_BIN_EXE_sonica"))
            .arg("--version")
            .output()
            .expect("Failed to execute sonica --version");

        assert!(output.status.success());
        assert!(String::from_utf8_lossy(&output.stdout).contains("sonica"));
    }

    #[test]
    fn test_completion_ignores_configuration() -> Result<()> {
        let dir = TempDir::new()?;
        let output = Command::new(env!("CARGO_BIN_EXE_sonica"))
            .arg("--config")
            .arg(dir.path().join("absent.toml"))
            .args(["completion", "zsh"])
            .output()?;

        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        assert!(!output.stdout.is_empty());
        Ok(())
    }

    #[test]
    fn test_completion_generation() {
        let output = Command::new(env!("CARGO_BIN_EXE_sonica"))
            .args(["completion", "bash"])
            .output()
            .expect("Failed to execute sonica completion");

        assert!(output.status.success());
        assert!(!output.stdout.is_empty());
    }

    #[test]
    fn test_cluster_without_dataset_fails() -> Result<()> {
        let dir = TempDir::new()?;
        let missing_config = dir.path().join("none.toml");
        std::fs::write(&missing_config, "")?;

        let output = Command::new(env!("CARGO_BIN_EXE_sonica"))
            .args(["--config"])
            .arg(&missing_config)
            .arg("--artifacts")
            .arg(dir.path().join("artifacts"))
            .arg("cluster")
            .output()?;

        assert!(!output.status.success());
        assert!(String::from_utf8_lossy(&output.stderr).contains("sonica fetch"));
        Ok(())
    }
}
