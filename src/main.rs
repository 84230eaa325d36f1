//! # pricing-radar — Binary Entrypoint
//! Batch invocation: load config, run the pipeline once, write the JSON
//! artifact, exit with the published code.
//!
//! ## Exit codes
//! - `0` — report produced (partial-source failures and `llm_failed` included)
//! - `1` — configuration error
//! - `2` — total fetch failure (zero items across all sources)
//! - `3` — unrecoverable internal error / cancelled

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pricing_radar::{cancellation, Config, Pipeline, PipelineError};

#[derive(Parser)]
#[command(name = "pricing-radar")]
#[command(about = "Batch pricing-intelligence pipeline: ingest, score, select, synthesise")]
#[command(version)]
struct Cli {
    /// Configuration file (default: config/pricing-radar.toml, then built-ins)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the output directory from the config
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let cfg = match load_config(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{e}");
            eprintln!("pricing-radar: {e}");
            return e.exit_code();
        }
    };
    let output_dir = cli.output.unwrap_or_else(|| cfg.report.output_dir.clone());

    let pipeline = match Pipeline::from_config(cfg) {
        Ok(p) => p,
        Err(e) => {
            error!("{e}");
            eprintln!("pricing-radar: {e}");
            return e.exit_code();
        }
    };

    // Ctrl-C flips the cancellation signal; in-flight fetchers and the LLM
    // call are dropped and no artifacts are written.
    let (cancel_tx, cancel_rx) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    match pipeline.run(cancel_rx).await {
        Ok(report) => match report.write_json(&output_dir) {
            Ok(path) => {
                info!(artifact = %path.display(), "report written");
                0
            }
            Err(e) => {
                error!("{e}");
                eprintln!("pricing-radar: {e}");
                e.exit_code()
            }
        },
        Err(e) => {
            error!("{e}");
            eprintln!("pricing-radar: {e}");
            e.exit_code()
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, PipelineError> {
    match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load_default(),
    }
}
