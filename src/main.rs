//! CLI Entry Point for rover-canary
//!
//! # Usage
//!
//! Run the canary catalogue:
//! ```bash
//! rover-canary run --config config/canary.toml
//! ```
//!
//! Print the effective configuration:
//! ```bash
//! rover-canary check-config
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rover_canary::config::{CanaryConfig, DEFAULT_CONFIG_PATH};
use rover_canary::hardware::SimulatedRover;
use rover_canary::logging;
use rover_canary::procedures::{Fleet, Sequencer, TestRunContext};
use rover_canary::report::{FanoutReporter, TracingReporter, WebhookReporter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "rover-canary")]
#[command(about = "Hardware-in-the-loop canary for rover bases and motors", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full test catalogue
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Do not post the summary to the chat webhook
        #[arg(long)]
        no_webhook: bool,
    },

    /// Load, validate and print the effective configuration
    CheckConfig {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, no_webhook } => run(config, no_webhook).await,
        Commands::CheckConfig { config } => check_config(config),
    }
}

fn load(path: &Path) -> Result<CanaryConfig> {
    let config = CanaryConfig::load_from(path)
        .with_context(|| format!("loading {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

async fn run(path: PathBuf, no_webhook: bool) -> Result<ExitCode> {
    let config = load(&path)?;
    logging::init_from_config(&config)?;

    let started_at = Utc::now();
    info!(
        config = %path.display(),
        started_at = %started_at.to_rfc3339(),
        "Starting {}",
        config.application.name
    );

    let trace_root = config.storage.output_dir.clone();
    let rover = SimulatedRover::new();
    let fleet = Fleet::simulated(&config, &rover, Some(&trace_root))?;
    info!(traces = %trace_root.display(), ?fleet, "Fleet ready");

    let mut reporter = FanoutReporter::new().with(Arc::new(TracingReporter));
    if !no_webhook {
        if let Some(webhook) = WebhookReporter::from_config(&config.report)? {
            reporter = reporter.with(Arc::new(webhook));
        }
    }

    let ctx = TestRunContext::new(config.run.clone(), Arc::new(reporter));
    let sequencer = Sequencer::new(config, fleet);
    let summary = sequencer.run(ctx).await;

    if summary.all_passed() {
        info!(total = summary.total, "Canary run passed");
        Ok(ExitCode::SUCCESS)
    } else {
        error!(
            failed = summary.failure_count(),
            total = summary.total,
            "Canary run failed"
        );
        Ok(ExitCode::FAILURE)
    }
}

fn check_config(path: PathBuf) -> Result<ExitCode> {
    let config = load(&path)?;
    println!("{}", config.to_toml()?);
    Ok(ExitCode::SUCCESS)
}
