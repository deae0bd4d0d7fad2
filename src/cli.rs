//! # Command-Line Interface Module
//!
//! Clap derive definitions for the `sonica` binary.
//!
//! ## Commands
//!
//! - `collect`: page through the saved-tracks library and store the ids
//! - `fetch`: fetch metadata and audio features into the dataset
//! - `cluster`: clean, scale, choose k and fit the clusters
//! - `run`: all of the above in order
//! - `completion`: print a shell completion script
//!
//! ## Examples
//!
//! ```bash
//! sonica --token "$TOKEN" collect
//! sonica fetch --start 200 --count 100
//! sonica cluster --k 5
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

/// Top-level arguments. Global options apply to every subcommand.
#[derive(Parser, Debug)]
#[command(name = "sonica")]
#[command(about = "Sonica: cluster your saved tracks by how they sound")]
#[command(version)]
pub struct Args {
    /// Configuration file (TOML)
    ///
    /// Defaults to `sonica/config.toml` in the platform configuration
    /// directory. A missing default file is not an error.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory for checkpoints and outputs
    #[arg(long, global = true, value_name = "DIR")]
    pub artifacts: Option<PathBuf>,

    /// Bearer token for the catalog API
    #[arg(long, global = true, env = "SPOTIFY_ACCESS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Collect the ids of all saved tracks
    ///
    /// Pages through the library 50 tracks at a time and writes
    /// `track_ids.json` once the last page is in.
    Collect,

    /// Fetch metadata and audio features for collected tracks
    ///
    /// Reads `track_ids.json` and writes `dataset.db`. Use `--start` and
    /// `--count` to work through a large library in windows.
    Fetch {
        /// Index of the first track id to fetch
        #[arg(long)]
        start: Option<usize>,

        /// Number of track ids to fetch (default: all remaining)
        #[arg(long)]
        count: Option<usize>,

        /// Tracks per feature request (1-100)
        #[arg(long, value_parser = clap::value_parser!(u16).range(1..=100))]
        batch_size: Option<u16>,
    },

    /// Preprocess the dataset, choose k and fit the clusters
    ///
    /// Writes `preprocessor.json`, `model.json` and `clusters.json`.
    Cluster {
        /// Use this many clusters instead of detecting the elbow
        #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
        k: Option<u16>,
    },

    /// Run collect, fetch and cluster in order
    Run,

    /// Generate shell completions
    ///
    /// Usage: sonica completion bash > ~/.local/share/bash-completion/completions/sonica
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },
}
