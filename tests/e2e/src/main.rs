//! End-to-End Runner for Spindle

use anyhow::{Context, Result};
use clap::Parser;
use spindle_config::RuntimeConfig;
use spindle_e2e_tests::{registry, scenario, DEFAULT_ROUNDS};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of rounds to run
    #[arg(short, long, default_value_t = DEFAULT_ROUNDS)]
    rounds: usize,

    /// Runtime configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = RuntimeConfig::load(args.config.as_deref())?;

    // Initialize tracing
    let log_level = if args.verbose {
        "debug"
    } else {
        config.log_level.as_str()
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Spindle E2E Runner");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    scenario::configure(config.default_worker);
    registry()?.install()?;

    let code = spindle::run_main(vec![args.rounds.to_string()]).context("Coordinator failed")?;
    info!(code, "Coordinator exited");
    std::process::exit(code);
}
