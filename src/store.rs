//! # Artifact Store
//!
//! Durable storage for everything a run produces. Each artifact lives at a
//! fixed file name under one directory so that a failed stage can be re-run
//! from the last artifact that was written.
//!
//! Writes go to a temporary file in the same directory which is renamed
//! into place only once it is complete, so an artifact on disk is never
//! half written.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const TRACK_IDS_FILE: &str = "track_ids.json";
pub const DATASET_FILE: &str = "dataset.db";
pub const PREPROCESSOR_FILE: &str = "preprocessor.json";
pub const MODEL_FILE: &str = "model.json";
pub const CLUSTERS_FILE: &str = "clusters.json";

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    /// Serializes `value` as JSON to `name`.
    pub fn save<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<PathBuf> {
        self.write_atomic(name, |file| {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, value)?;
            writer.flush()?;
            Ok(())
        })
    }

    /// Reads back a JSON artifact written by [`save`](Self::save).
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.path(name);
        let file = fs::File::open(&path)
            .with_context(|| format!("Failed to open artifact {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Artifact {} is not valid JSON for this type", path.display()))
    }

    /// Creates the artifact through `write` on a temporary sibling file and
    /// renames it to `name` once `write` succeeds.
    pub fn write_atomic<F>(&self, name: &str, write: F) -> Result<PathBuf>
    where
        F: FnOnce(&mut fs::File) -> Result<()>,
    {
        fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create artifacts directory at {}", self.dir.display())
        })?;

        let target = self.path(name);
        let mut tmp = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("Failed to create temporary file in {}", self.dir.display()))?;

        write(tmp.as_file_mut()).with_context(|| format!("Failed to write {}", target.display()))?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target)
            .with_context(|| format!("Failed to move artifact into {}", target.display()))?;

        Ok(target)
    }

    /// Like [`write_atomic`](Self::write_atomic) for writers that need a
    /// path rather than an open file, such as SQLite.
    pub fn write_atomic_path<F>(&self, name: &str, write: F) -> Result<PathBuf>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create artifacts directory at {}", self.dir.display())
        })?;

        let target = self.path(name);
        let tmp = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("Failed to create temporary file in {}", self.dir.display()))?;
        let tmp_path = tmp.into_temp_path();

        write(&tmp_path).with_context(|| format!("Failed to write {}", target.display()))?;
        tmp_path
            .persist(&target)
            .with_context(|| format!("Failed to move artifact into {}", target.display()))?;

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        values: Vec<f64>,
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("artifacts"));
        let sample = Sample { name: "x".into(), values: vec![0.25, -3.5] };

        store.save("sample.json", &sample).unwrap();
        let loaded: Sample = store.load("sample.json").unwrap();

        assert_eq!(loaded, sample);
    }

    #[test]
    fn test_failed_write_leaves_previous_artifact() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.save("ids.json", &vec!["a", "b"]).unwrap();

        let result = store.write_atomic("ids.json", |file| {
            file.write_all(b"[\"partial")?;
            anyhow::bail!("interrupted")
        });
        assert!(result.is_err());

        let loaded: Vec<String> = store.load("ids.json").unwrap();
        assert_eq!(loaded, vec!["a", "b"]);
        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_load_missing_artifact_names_path() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let err = store.load::<Sample>("nope.json").unwrap_err();
        assert!(err.to_string().contains("nope.json"));
    }
}
