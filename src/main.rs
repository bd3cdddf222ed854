//! intel-digest binary entrypoint.
//! Loads the config document, runs every enabled pipeline once and logs the
//! resulting digests.

use anyhow::Context;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use intel_digest::metrics::{Metrics, ENV_METRICS_FILE};
use intel_digest::{config, telemetry, LogDelivery, Orchestrator, RunContext};

async fn run() -> anyhow::Result<bool> {
    let metrics_file = std::env::var(ENV_METRICS_FILE).ok().map(PathBuf::from);
    let metrics = match &metrics_file {
        Some(_) => Some(Metrics::init()?),
        None => None,
    };

    let cfg = config::load_default().context("loading config")?;
    if cfg.pipelines.is_empty() {
        anyhow::bail!("config declares no pipelines");
    }
    let ctx = RunContext::from_config(&cfg).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling run");
            on_signal.cancel();
        }
    });

    let orchestrator = Orchestrator::new(Arc::new(ctx)).with_sink(Arc::new(LogDelivery));
    let summary = orchestrator.run_entries(&cfg.pipelines, &cancel).await;

    for r in &summary.results {
        println!("{}", r.summary_line());
    }

    if let (Some(m), Some(path)) = (&metrics, &metrics_file) {
        if let Err(e) = m.write_textfile(path) {
            tracing::warn!(error = ?e, path = %path.display(), "metrics export failed");
        }
    }

    Ok(!summary.all_failed())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            tracing::error!("every pipeline failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = ?e, "run aborted");
            eprintln!("intel-digest: {e:#}");
            ExitCode::FAILURE
        }
    }
}
