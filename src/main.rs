//! # Sonica
//!
//! Command-line entry point. Parses arguments, builds the configuration and
//! runs the requested pipeline stage.
//!
//! Logging is controlled through `RUST_LOG`:
//! - `RUST_LOG=info sonica run` - per-batch progress
//! - `RUST_LOG=sonica::ingest=debug sonica fetch` - per-track progress

use anyhow::Result;
use clap::Parser;
use log::debug;
use sonica::catalog::spotify::SpotifyClient;
use sonica::cli::{Args, Command};
use sonica::clock::ThreadSleeper;
use sonica::completion;
use sonica::config::PipelineConfig;
use sonica::ingest::fetcher::is_permanent;
use sonica::pipeline::{ClusterOutcome, Pipeline};
use sonica::store::ArtifactStore;
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let result = run(&args);

    if let Err(e) = &result {
        if is_permanent(e) {
            eprintln!("The catalog rejected a request.");
            eprintln!("  Check that the access token is valid and has the user-library-read scope.");
        }
    }

    result
}

fn run(args: &Args) -> Result<()> {
    match &args.command {
        Command::Completion { shell } => completion::print_completions(*shell),
        Command::Collect => with_pipeline(args, |config, pipeline| {
            let ids = pipeline.collect(&connect(config)?)?;
            println!("Collected {} track ids", ids.len());
            Ok(())
        })?,
        Command::Fetch { .. } => with_pipeline(args, |config, pipeline| {
            let report = pipeline.fetch(&connect(config)?)?;
            println!(
                "Fetched {} tracks in {} batches, {} excluded",
                report.rows.len(),
                report.batches,
                report.exclusions.len()
            );
            for exclusion in &report.exclusions {
                println!("  skipped {}: {}", exclusion.id, exclusion.reason);
            }
            Ok(())
        })?,
        Command::Cluster { k } => with_pipeline(args, |_, pipeline| {
            print_outcome(&pipeline.cluster(k.map(usize::from))?);
            Ok(())
        })?,
        Command::Run => with_pipeline(args, |config, pipeline| {
            print_outcome(&pipeline.run_all(&connect(config)?)?);
            Ok(())
        })?,
    }
    Ok(())
}

/// Builds the configuration and artifact store, then hands a pipeline to `stage`.
fn with_pipeline<F>(args: &Args, stage: F) -> Result<()>
where
    F: FnOnce(&PipelineConfig, &Pipeline) -> Result<()>,
{
    let config = build_config(args)?;
    let store = ArtifactStore::new(config.artifacts_dir()?);
    debug!("Artifacts directory: {}", store.dir().display());
    let pipeline = Pipeline::new(&config, store, Arc::new(ThreadSleeper));
    stage(&config, &pipeline)
}

/// File or default configuration, overridden by command-line flags.
fn build_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::load(args.config.as_deref())?;

    if let Some(dir) = &args.artifacts {
        config.artifacts.dir = dir.clone();
    }
    if let Some(token) = &args.token {
        config.api.access_token = Some(token.clone());
    }
    if let Command::Fetch { start, count, batch_size } = &args.command {
        if let Some(start) = start {
            config.fetch.start = *start;
        }
        if let Some(count) = count {
            config.fetch.count = Some(*count);
        }
        if let Some(batch_size) = batch_size {
            config.fetch.batch_size = usize::from(*batch_size);
        }
    }

    config.validate()?;
    Ok(config)
}

fn connect(config: &PipelineConfig) -> Result<SpotifyClient> {
    SpotifyClient::new(
        &config.api.base_url,
        config.access_token()?,
        &config.api.user_agent,
        Duration::from_secs(config.api.timeout_secs),
    )
}

fn print_outcome(outcome: &ClusterOutcome) {
    let report = &outcome.report;
    println!(
        "{} tracks in {} clusters ({:?})",
        outcome.assignments.len(),
        report.k,
        report.selection
    );
    for summary in &report.summaries {
        println!("  cluster {}: {} tracks", summary.cluster, summary.size);
    }
}
