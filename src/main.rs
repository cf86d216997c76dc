//! CLI entry point for the archive fetcher.

use std::io::{self, IsTerminal};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use gharchive_core::{DownloadOrchestrator, EngineError, EventSink, RunSummary, TracingSink};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod progress;

use cli::Args;
use progress::ProgressSink;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let file_config = app_config::load_config(args.config.as_deref())?;
    let config = app_config::resolve_fetch_config(&args, file_config.as_ref())?;
    info!(
        years = ?config.years,
        base_dir = %config.base_dir.display(),
        service_base = %config.service_base,
        "GH Archive fetcher starting"
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing in-flight work");
                cancel.cancel();
            }
        });
    }

    let progress =
        (!args.quiet && io::stderr().is_terminal()).then(|| Arc::new(ProgressSink::new()));
    let sink: Arc<dyn EventSink> = match &progress {
        Some(progress) => Arc::clone(progress) as Arc<dyn EventSink>,
        None => Arc::new(TracingSink),
    };

    let orchestrator = DownloadOrchestrator::from_config_with_sink(&config, sink)?;
    let result = orchestrator.run_years(&config.years, &cancel).await;

    if let Some(progress) = &progress {
        progress.finish();
    }

    let summaries = match result {
        Ok(summaries) => summaries,
        Err(EngineError::YearFailed {
            year,
            completed,
            source,
        }) => {
            report_summaries(&completed);
            return Err(anyhow::Error::new(*source)
                .context(format!("year {year} could not be processed")));
        }
        Err(error) => return Err(error.into()),
    };

    report_summaries(&summaries);

    let outstanding: usize = summaries.iter().map(|s| s.outstanding()).sum();
    if cancel.is_cancelled() {
        warn!(
            completed_years = summaries.len(),
            "run cancelled; rerun to resume"
        );
    } else if outstanding > 0 {
        warn!(outstanding, "some archives are still missing; rerun to retry them");
    } else {
        info!("mirror complete");
    }

    Ok(())
}

fn report_summaries(summaries: &[RunSummary]) {
    for summary in summaries {
        info!(
            year = summary.year(),
            total = summary.total_buckets(),
            downloaded = summary.downloaded_now(),
            already_valid = summary.already_valid(),
            outstanding = summary.outstanding(),
            "{summary}"
        );
    }
}
