//! # Dataset Table
//!
//! The assembled dataset is one flat table, `tracks`, kept in a single-file
//! SQLite database. Data columns are nullable: a table edited by hand or by
//! another tool loads as-is, and incomplete rows are dealt with during
//! preprocessing rather than here.

use crate::track::TrackRow;
use anyhow::{Context, Result};
use log::{debug, info};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Dataset columns after the track id, in table order.
pub const DATASET_COLUMNS: [&str; 19] = [
    "name",
    "album",
    "artist",
    "release_date",
    "length",
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

/// How a track is stored in the dataset table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: String,
    pub name: Option<String>,
    pub album: Option<String>,
    pub artist: Option<String>,
    pub release_date: Option<String>,
    pub length: Option<i64>,
    pub popularity: Option<i64>,
    pub acousticness: Option<f64>,
    pub danceability: Option<f64>,
    pub energy: Option<f64>,
    pub instrumentalness: Option<f64>,
    pub liveness: Option<f64>,
    pub loudness: Option<f64>,
    pub speechiness: Option<f64>,
    pub tempo: Option<f64>,
    pub valence: Option<f64>,
    pub time_signature: Option<i64>,
    pub key: Option<i64>,
    pub mode: Option<i64>,
    pub uri: Option<String>,
}

impl From<&TrackRow> for DatasetRecord {
    fn from(row: &TrackRow) -> Self {
        let f = &row.features;
        Self {
            id: row.id.to_string(),
            name: Some(row.record.name.clone()),
            album: Some(row.record.album.clone()),
            artist: Some(row.record.artist.clone()),
            release_date: Some(row.record.release_date.clone()),
            length: i64::try_from(row.record.length_ms).ok(),
            popularity: Some(i64::from(row.record.popularity)),
            acousticness: Some(f.acousticness),
            danceability: Some(f.danceability),
            energy: Some(f.energy),
            instrumentalness: Some(f.instrumentalness),
            liveness: Some(f.liveness),
            loudness: Some(f.loudness),
            speechiness: Some(f.speechiness),
            tempo: Some(f.tempo),
            valence: Some(f.valence),
            time_signature: Some(i64::from(f.time_signature)),
            key: Some(i64::from(f.key)),
            mode: Some(i64::from(f.mode)),
            uri: Some(f.uri.clone()),
        }
    }
}

fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tracks (
            position         INTEGER PRIMARY KEY,
            id               TEXT    NOT NULL UNIQUE,
            name             TEXT,
            album            TEXT,
            artist           TEXT,
            release_date     TEXT,
            length           INTEGER,
            popularity       INTEGER,
            acousticness     REAL,
            danceability     REAL,
            energy           REAL,
            instrumentalness REAL,
            liveness         REAL,
            loudness         REAL,
            speechiness      REAL,
            tempo            REAL,
            valence          REAL,
            time_signature   INTEGER,
            key              INTEGER,
            mode             INTEGER,
            uri              TEXT
        )",
        (),
    )
    .context("Invalid SQL command when CREATEing tracks TABLE.")?;
    Ok(())
}

/// Writes `records` to a fresh `tracks` table at `path`, in order.
///
/// Meant for a new, empty database file; existing rows are replaced.
pub fn save_dataset(path: &Path, records: &[DatasetRecord]) -> Result<()> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("Rusqlite DB connection refused. DB location: {path:?}"))?;

    conn.execute("DROP TABLE IF EXISTS tracks", ())
        .context("Failed to DROP previous tracks TABLE.")?;
    create_table(&conn)?;

    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO tracks (position, id, name, album, artist, release_date, length,
                popularity, acousticness, danceability, energy, instrumentalness, liveness,
                loudness, speechiness, tempo, valence, time_signature, key, mode, uri)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18, ?19, ?20, ?21)",
        )?;

        for (position, r) in records.iter().enumerate() {
            stmt.execute(params![
                position as i64,
                r.id,
                r.name,
                r.album,
                r.artist,
                r.release_date,
                r.length,
                r.popularity,
                r.acousticness,
                r.danceability,
                r.energy,
                r.instrumentalness,
                r.liveness,
                r.loudness,
                r.speechiness,
                r.tempo,
                r.valence,
                r.time_signature,
                r.key,
                r.mode,
                r.uri,
            ])
            .with_context(|| format!("Invalid SQL statement when INSERTing track {}", r.id))?;
        }
    }
    tx.commit().context("Commiting SQL transaction failed.")?;

    info!("Saved {} tracks to {}", records.len(), path.display());
    Ok(())
}

/// Reads the whole `tracks` table at `path`, in stored order.
pub fn load_dataset(path: &Path) -> Result<Vec<DatasetRecord>> {
    if !path.is_file() {
        anyhow::bail!("Dataset not found at {}. Run `sonica fetch` first.", path.display());
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Rusqlite DB connection refused. DB location: {path:?}"))?;

    let mut stmt = conn
        .prepare(
            "SELECT id, name, album, artist, release_date, length, popularity, acousticness,
                danceability, energy, instrumentalness, liveness, loudness, speechiness,
                tempo, valence, time_signature, key, mode, uri
             FROM tracks ORDER BY position",
        )
        .context("Invalid SQL statement when SELECTing FROM tracks.")?;

    let rows = stmt
        .query_map([], |row| {
            Ok(DatasetRecord {
                id: row.get(0)?,
                name: row.get(1)?,
                album: row.get(2)?,
                artist: row.get(3)?,
                release_date: row.get(4)?,
                length: row.get(5)?,
                popularity: row.get(6)?,
                acousticness: row.get(7)?,
                danceability: row.get(8)?,
                energy: row.get(9)?,
                instrumentalness: row.get(10)?,
                liveness: row.get(11)?,
                loudness: row.get(12)?,
                speechiness: row.get(13)?,
                tempo: row.get(14)?,
                valence: row.get(15)?,
                time_signature: row.get(16)?,
                key: row.get(17)?,
                mode: row.get(18)?,
                uri: row.get(19)?,
            })
        })
        .context("Cannot query tracks.")?;

    let mut records = Vec::new();
    for record in rows {
        records.push(record.context("Queried track row could not be read.")?);
    }

    debug!("Loaded {} tracks from {}", records.len(), path.display());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str) -> DatasetRecord {
        DatasetRecord {
            id: id.to_string(),
            name: Some(format!("Song {id}")),
            album: Some("Album".into()),
            artist: Some("Artist".into()),
            release_date: Some("2001-05-12".into()),
            length: Some(180_000),
            popularity: Some(55),
            acousticness: Some(0.1),
            danceability: Some(0.2),
            energy: Some(0.3),
            instrumentalness: Some(0.4),
            liveness: Some(0.5),
            loudness: Some(-6.0),
            speechiness: Some(0.05),
            tempo: Some(128.0),
            valence: Some(0.7),
            time_signature: Some(4),
            key: Some(-1),
            mode: Some(0),
            uri: Some(format!("spotify:track:{id}")),
        }
    }

    #[test]
    fn test_dataset_round_trip_preserves_order_and_nulls() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dataset.db");
        let mut incomplete = record("b");
        incomplete.tempo = None;
        let records = vec![record("c"), incomplete, record("a")];

        save_dataset(&path, &records).unwrap();
        let loaded = load_dataset(&path).unwrap();

        assert_eq!(loaded, records);
        assert_eq!(loaded[1].tempo, None);
        assert_eq!(loaded[0].tempo, Some(128.0));
    }

    #[test]
    fn test_save_replaces_previous_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dataset.db");

        save_dataset(&path, &[record("a"), record("b")]).unwrap();
        save_dataset(&path, &[record("z")]).unwrap();

        let loaded = load_dataset(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "z");
    }

    #[test]
    fn test_load_missing_dataset_fails() {
        let dir = TempDir::new().unwrap();
        assert!(load_dataset(&dir.path().join("none.db")).is_err());
    }

    #[test]
    fn test_column_list_matches_record_fields() {
        assert_eq!(DATASET_COLUMNS[3], "release_date");
        assert_eq!(DATASET_COLUMNS.len(), 19);
    }
}
