//! Spotify Web API client.
//!
//! Blocking on purpose: requests are issued one after another and paced by
//! the caller. The bearer token is obtained elsewhere.

use super::{CatalogClient, CatalogError, SavedTracksPage};
use crate::track::{RawAudioFeatures, TrackId, TrackRecord};
use log::trace;
use reqwest::blocking::{Client, Response};
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

pub const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";

pub struct SpotifyClient {
    client: Client,
    base_url: String,
    access_token: String,
}

#[derive(Deserialize)]
struct SavedTracksResponse {
    #[serde(default)]
    items: Vec<SavedTrackItem>,
    next: Option<String>,
}

#[derive(Deserialize)]
struct SavedTrackItem {
    track: Option<TrackRef>,
}

#[derive(Deserialize)]
struct TrackRef {
    id: Option<String>,
}

#[derive(Deserialize)]
struct TrackResponse {
    name: String,
    duration_ms: u64,
    popularity: u8,
    album: AlbumResponse,
}

#[derive(Deserialize)]
struct AlbumResponse {
    name: String,
    release_date: String,
    #[serde(default)]
    artists: Vec<ArtistResponse>,
}

#[derive(Deserialize)]
struct ArtistResponse {
    name: String,
}

#[derive(Deserialize)]
struct AudioFeaturesResponse {
    #[serde(default)]
    audio_features: Vec<Option<RawAudioFeatures>>,
}

impl SpotifyClient {
    pub fn new(
        base_url: &str,
        access_token: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, CatalogError> {
        trace!("GET {url}");
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        let response = check_status(response, url)?;
        let body = response
            .text()
            .map_err(|e| CatalogError::Network(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| CatalogError::Malformed(format!("{url}: {e}")))
    }
}

impl CatalogClient for SpotifyClient {
    fn saved_tracks(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<SavedTracksPage, CatalogError> {
        let url = match cursor {
            Some(next) => next.to_string(),
            None => format!("{}/me/tracks?limit={limit}", self.base_url),
        };
        let body: SavedTracksResponse = self.get_json(&url)?;
        Ok(page_from_response(body))
    }

    fn track(&self, id: &TrackId) -> Result<TrackRecord, CatalogError> {
        let url = format!("{}/tracks/{id}", self.base_url);
        let body: TrackResponse = self.get_json(&url)?;
        record_from_response(body).map_err(|e| CatalogError::Malformed(format!("track {id}: {e}")))
    }

    fn audio_features(
        &self,
        ids: &[TrackId],
    ) -> Result<Vec<Option<RawAudioFeatures>>, CatalogError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let joined = ids.iter().map(TrackId::as_str).collect::<Vec<_>>().join(",");
        let url = format!("{}/audio-features?ids={joined}", self.base_url);
        let body: AudioFeaturesResponse = self.get_json(&url)?;
        Ok(body.audio_features)
    }
}

fn check_status(response: Response, url: &str) -> Result<Response, CatalogError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let message = response.text().unwrap_or_default();

    Err(classify_status(status, retry_after, url, message))
}

/// Maps a non-success status onto the catalog error taxonomy.
fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    url: &str,
    message: String,
) -> CatalogError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => CatalogError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            CatalogError::Unauthorized(format!("{url} ({status})"))
        }
        StatusCode::NOT_FOUND => CatalogError::NotFound(url.to_string()),
        _ => CatalogError::Http { status: status.as_u16(), message },
    }
}

fn page_from_response(body: SavedTracksResponse) -> SavedTracksPage {
    let ids = body
        .items
        .into_iter()
        .filter_map(|item| item.track.and_then(|t| t.id))
        .map(TrackId::new)
        .collect();
    SavedTracksPage { ids, next: body.next }
}

fn record_from_response(body: TrackResponse) -> Result<TrackRecord, &'static str> {
    let artist = body
        .album
        .artists
        .into_iter()
        .next()
        .map(|a| a.name)
        .ok_or("album has no artists")?;

    Ok(TrackRecord {
        name: body.name,
        album: body.album.name,
        artist,
        release_date: body.album.release_date,
        length_ms: body.duration_ms,
        popularity: body.popularity,
    })
}
