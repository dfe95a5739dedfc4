//! `detectr`: find package manager inputs in a project and extract one
//! dependency graph per code location.
//!
//! # Flow
//! 1. Parse CLI arguments ([`cli`]) and install logging ([`logging`]).
//! 2. Load config ([`config::load_config`]); CLI flags override it.
//! 3. Walk the project and run every registered detector per directory
//!    ([`detector::DetectorPipeline`]).
//! 4. Name and merge the extracted graphs, then write them
//!    ([`codelocation`]).
//! 5. Render the requested report ([`report`]).
//! 6. Exit `0`, or `1` when an extraction failed or the scan was cancelled.

mod cli;
mod codelocation;
mod config;
mod detectable;
mod detectables;
mod detector;
mod executable;
mod graph;
mod logging;
mod report;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use cli::{Cli, ReportFormat};
use codelocation::{CodeLocationAssembler, JsonFileSink};
use config::load_config;
use detector::{default_detectors, DetectorPipeline, PipelineOptions};
use executable::{ExecutableResolver, ProcessRunner};
use logging::Verbosity;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(Verbosity::from_flags(cli.verbose, cli.quiet));

    // Resolve project path
    let path = cli
        .path
        .canonicalize()
        .with_context(|| format!("project path {} does not exist", cli.path.display()))?;

    let mut config = load_config(&path, cli.config.as_deref())?;
    if let Some(depth) = cli.depth {
        config.search.depth = depth;
    }
    if !cli.include_detector.is_empty() {
        config.detectors.include = cli.include_detector.clone();
    }
    config.detectors.exclude.extend(cli.exclude_detector.iter().copied());
    if let Some(timeout) = cli.timeout {
        config.execution.timeout = timeout;
    }
    if cli.workers.is_some() {
        config.execution.workers = cli.workers;
    }
    if let Some(output) = &cli.output {
        config.output.directory = output.clone();
    }
    debug!(?config, "Effective configuration");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling running detectors");
                cancel.cancel();
            }
        });
    }

    // Scratch space for tool output; removed on drop unless configured
    let (scratch, run_directory) = match &config.output.run_directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating run directory {}", dir.display()))?;
            (None, dir.clone())
        }
        None => {
            let temp = tempfile::Builder::new()
                .prefix("detectr-run-")
                .tempdir()
                .context("creating run directory")?;
            let dir = temp.path().to_path_buf();
            (Some(temp), dir)
        }
    };

    let options = PipelineOptions {
        search_depth: config.search.depth,
        exclusions: config.search.exclude.clone(),
        include: config.detectors.include.clone(),
        exclude: config.detectors.exclude.clone(),
        workers: config.execution.workers(),
        run_directory: run_directory.clone(),
    };
    let resolver = Arc::new(ExecutableResolver::new(config.tools.clone()));
    let runner = Arc::new(ProcessRunner::new(
        Duration::from_secs(config.execution.timeout),
        cancel.clone(),
    ));

    let mut pipeline = DetectorPipeline::new(default_detectors(), options, resolver, runner, cancel);
    let progress = progress_bar(cli.quiet)?;
    if let Some(pb) = &progress {
        pipeline = pipeline.with_progress(pb.clone());
    }

    let result = pipeline.run(&path).await;

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    let locations = CodeLocationAssembler::new(&path)
        .with_project(config.project.name.clone(), config.project.version.clone())
        .assemble(&result);
    let files = JsonFileSink::new(&config.output.directory).write_all(&locations)?;
    let written: Vec<(codelocation::NamedCodeLocation, PathBuf)> =
        locations.into_iter().zip(files).collect();

    match cli.report {
        ReportFormat::Terminal => {
            report::terminal::render(&result, &path, &written, cli.verbose > 0, cli.quiet)?;
        }
        ReportFormat::Json => {
            report::json::render(&result, &path, &written)?;
        }
    }

    // Exit code: 1 if any extraction failed or the scan was interrupted;
    // exit() skips destructors
    drop(scratch);
    let code = result.exit_code();
    if code != 0 {
        std::process::exit(code);
    }

    Ok(())
}

fn progress_bar(quiet: bool) -> Result<Option<ProgressBar>> {
    if quiet {
        return Ok(None);
    }
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} directories")?
            .progress_chars("#>-"),
    );
    Ok(Some(pb))
}
