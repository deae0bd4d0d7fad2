//! # Configuration Module
//!
//! Explicit configuration for one pipeline run. Every component receives the
//! section it needs at construction; nothing is read from ambient state.
//!
//! ## Sources
//!
//! Values come from, in increasing priority:
//! 1. built-in defaults
//! 2. a TOML file (`--config PATH`, or the platform config directory)
//! 3. command-line flags and `SPOTIFY_ACCESS_TOKEN`
//!
//! The default file location follows platform conventions:
//! - Linux: `~/.config/sonica/config.toml`
//! - macOS: `~/Library/Application Support/sonica/config.toml`
//! - Windows: `%APPDATA%\sonica\config.toml`
//!
//! ## Example
//!
//! ```toml
//! [fetch]
//! batch_size = 50
//! track_delay_ms = 500
//!
//! [clustering]
//! k_max = 12
//! fallback_k = 5
//! ```

use crate::catalog::spotify::SPOTIFY_API_BASE;
use crate::catalog::MAX_FEATURE_BATCH;
use crate::cluster::KMeansParams;
use crate::retry::{Pacing, RetryPolicy};
use anyhow::{bail, Context, Result};
use log::debug;
use path_absolutize::Absolutize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns the default configuration file path, if the platform has a
/// configuration directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sonica").join("config.toml"))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub api: ApiConfig,
    pub retry: RetryConfig,
    pub fetch: FetchConfig,
    pub artifacts: ArtifactsConfig,
    pub clustering: ClusteringConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    pub base_url: String,
    /// Bearer token. Obtaining it is left to the caller.
    pub access_token: Option<String>,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: SPOTIFY_API_BASE.to_string(),
            access_token: None,
            timeout_secs: 30,
            user_agent: format!("sonica/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts per request.
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.base_delay_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub batch_size: usize,
    pub start: usize,
    /// Number of identifiers to fetch; all remaining when absent.
    pub count: Option<usize>,
    pub track_delay_ms: u64,
    pub batch_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            batch_size: MAX_FEATURE_BATCH,
            start: 0,
            count: None,
            track_delay_ms: 1000,
            batch_delay_ms: 1000,
        }
    }
}

impl FetchConfig {
    pub fn pacing(&self) -> Pacing {
        Pacing {
            track_delay: Duration::from_millis(self.track_delay_ms),
            batch_delay: Duration::from_millis(self.batch_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArtifactsConfig {
    pub dir: PathBuf,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("artifacts"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusteringConfig {
    pub k_min: usize,
    pub k_max: usize,
    pub seed: u64,
    pub n_init: usize,
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Kneedle sensitivity; larger values wait for a flatter curve.
    pub sensitivity: f64,
    /// Used when no elbow is found.
    pub fallback_k: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            k_min: 1,
            k_max: 10,
            seed: 42,
            n_init: 10,
            max_iterations: 300,
            tolerance: 1e-4,
            sensitivity: 1.0,
            fallback_k: 4,
        }
    }
}

impl ClusteringConfig {
    pub fn kmeans_params(&self) -> KMeansParams {
        KMeansParams {
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
            n_init: self.n_init,
            seed: self.seed,
        }
    }

    pub fn k_range(&self) -> RangeInclusive<usize> {
        self.k_min..=self.k_max
    }
}

impl PipelineConfig {
    /// Loads `path`, or the default location when `path` is `None`. A missing
    /// default file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match default_config_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            if explicit {
                bail!("Configuration file {} does not exist", path.display());
            }
            debug!("No configuration at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;
        let config = Self::from_toml(&text)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            bail!("api.base_url must not be empty");
        }
        if self.api.timeout_secs == 0 {
            bail!("api.timeout_secs must be positive");
        }
        if !(1..=MAX_FEATURE_BATCH).contains(&self.fetch.batch_size) {
            bail!(
                "fetch.batch_size must be between 1 and {MAX_FEATURE_BATCH}, got {}",
                self.fetch.batch_size
            );
        }
        let c = &self.clustering;
        if c.k_min == 0 || c.k_min > c.k_max {
            bail!("clustering needs 1 <= k_min <= k_max, got k_min={} k_max={}", c.k_min, c.k_max);
        }
        if c.fallback_k == 0 {
            bail!("clustering.fallback_k must be at least 1");
        }
        if c.n_init == 0 || c.max_iterations == 0 {
            bail!("clustering.n_init and clustering.max_iterations must be positive");
        }
        if !c.tolerance.is_finite() || c.tolerance < 0.0 {
            bail!("clustering.tolerance must be a non-negative number");
        }
        if !c.sensitivity.is_finite() || c.sensitivity < 0.0 {
            bail!("clustering.sensitivity must be a non-negative number");
        }
        Ok(())
    }

    /// The artifact directory as an absolute path.
    pub fn artifacts_dir(&self) -> Result<PathBuf> {
        let dir = self
            .artifacts
            .dir
            .absolutize()
            .with_context(|| format!("Cannot resolve artifact directory {}", self.artifacts.dir.display()))?;
        Ok(dir.into_owned())
    }

    pub fn access_token(&self) -> Result<&str> {
        self.api
            .access_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .context("No access token configured. Pass --token or set SPOTIFY_ACCESS_TOKEN")
    }
}
