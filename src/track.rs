//! Track data as it flows out of the remote catalog.
//!
//! A [`TrackRow`] is only ever built from a [`TrackRecord`] and a validated
//! [`AudioFeatures`] that share the same [`TrackId`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Names of the twelve numeric audio-feature columns, in modelling order.
pub const FEATURE_COLUMNS: [&str; 12] = [
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
];

/// Opaque catalog key of a track.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extracts the identifier from a `spotify:track:<id>` URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        uri.strip_prefix("spotify:track:")
            .filter(|id| !id.is_empty())
            .map(Self::new)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TrackId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Per-track metadata returned by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub name: String,
    pub album: String,
    /// First credited album artist.
    pub artist: String,
    /// `YYYY`, `YYYY-MM` or `YYYY-MM-DD`.
    pub release_date: String,
    pub length_ms: u64,
    /// 0 to 100.
    pub popularity: u8,
}

/// Audio-feature vector exactly as the catalog sends it: any field may be null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAudioFeatures {
    pub id: Option<String>,
    pub acousticness: Option<f64>,
    pub danceability: Option<f64>,
    pub energy: Option<f64>,
    pub instrumentalness: Option<f64>,
    pub liveness: Option<f64>,
    pub loudness: Option<f64>,
    pub speechiness: Option<f64>,
    pub tempo: Option<f64>,
    pub valence: Option<f64>,
    pub time_signature: Option<i32>,
    pub key: Option<i32>,
    pub mode: Option<i32>,
    pub uri: Option<String>,
}

impl RawAudioFeatures {
    /// The track this vector describes, from `id` or else from `uri`.
    pub fn track_id(&self) -> Option<TrackId> {
        match &self.id {
            Some(id) if !id.is_empty() => Some(TrackId::new(id.clone())),
            _ => self.uri.as_deref().and_then(TrackId::from_uri),
        }
    }

    /// Accepts the vector only if no field is null.
    ///
    /// On rejection returns the name of the first null field.
    pub fn validate(&self) -> Result<AudioFeatures, &'static str> {
        fn req<T: Clone>(value: &Option<T>, field: &'static str) -> Result<T, &'static str> {
            value.clone().ok_or(field)
        }

        Ok(AudioFeatures {
            acousticness: req(&self.acousticness, "acousticness")?,
            danceability: req(&self.danceability, "danceability")?,
            energy: req(&self.energy, "energy")?,
            instrumentalness: req(&self.instrumentalness, "instrumentalness")?,
            liveness: req(&self.liveness, "liveness")?,
            loudness: req(&self.loudness, "loudness")?,
            speechiness: req(&self.speechiness, "speechiness")?,
            tempo: req(&self.tempo, "tempo")?,
            valence: req(&self.valence, "valence")?,
            time_signature: req(&self.time_signature, "time_signature")?,
            key: req(&self.key, "key")?,
            mode: req(&self.mode, "mode")?,
            uri: req(&self.uri, "uri")?,
        })
    }
}

impl From<&AudioFeatures> for RawAudioFeatures {
    fn from(features: &AudioFeatures) -> Self {
        Self {
            id: TrackId::from_uri(&features.uri).map(|id| id.to_string()),
            acousticness: Some(features.acousticness),
            danceability: Some(features.danceability),
            energy: Some(features.energy),
            instrumentalness: Some(features.instrumentalness),
            liveness: Some(features.liveness),
            loudness: Some(features.loudness),
            speechiness: Some(features.speechiness),
            tempo: Some(features.tempo),
            valence: Some(features.valence),
            time_signature: Some(features.time_signature),
            key: Some(features.key),
            mode: Some(features.mode),
            uri: Some(features.uri.clone()),
        }
    }
}

/// A validated audio-feature vector with every field present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub acousticness: f64,
    pub danceability: f64,
    pub energy: f64,
    pub instrumentalness: f64,
    pub liveness: f64,
    /// dB, typically negative.
    pub loudness: f64,
    pub speechiness: f64,
    /// BPM.
    pub tempo: f64,
    pub valence: f64,
    pub time_signature: i32,
    /// Pitch class, -1 when no key was detected.
    pub key: i32,
    /// 1 major, 0 minor.
    pub mode: i32,
    pub uri: String,
}

impl AudioFeatures {
    /// The numeric features in [`FEATURE_COLUMNS`] order.
    #[must_use]
    pub fn to_vector(&self) -> [f64; 12] {
        [
            self.acousticness,
            self.danceability,
            self.energy,
            self.instrumentalness,
            self.liveness,
            self.loudness,
            self.speechiness,
            self.tempo,
            self.valence,
            f64::from(self.time_signature),
            f64::from(self.key),
            f64::from(self.mode),
        ]
    }
}

/// Metadata and features of one track, joined on the track id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRow {
    pub id: TrackId,
    pub record: TrackRecord,
    pub features: AudioFeatures,
}

/// Why a track never made it into the dataset (or the modelling view).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExclusionReason {
    /// Metadata lookup still rate limited after every retry.
    MetadataUnavailable,
    /// No usable feature vector came back for the track.
    FeaturesUnavailable,
    /// The feature vector had a null field.
    NullFeature(String),
    /// At least one dataset column was empty.
    MissingValue,
    /// The release date did not start with a year.
    UnparseableReleaseDate(String),
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MetadataUnavailable => write!(f, "metadata unavailable after retries"),
            Self::FeaturesUnavailable => write!(f, "audio features unavailable"),
            Self::NullFeature(field) => write!(f, "audio feature `{field}` is null"),
            Self::MissingValue => write!(f, "row has missing values"),
            Self::UnparseableReleaseDate(value) => {
                write!(f, "release date `{value}` has no parseable year")
            }
        }
    }
}

/// A track dropped from the pipeline together with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    pub id: TrackId,
    pub reason: ExclusionReason,
}

impl Exclusion {
    pub fn new(id: TrackId, reason: ExclusionReason) -> Self {
        Self { id, reason }
    }
}
