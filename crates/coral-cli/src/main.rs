//! Experiment driver: trains the classifier twice (regularizer off, then
//! on) and reports per-epoch accuracy for both domains.

mod config;
mod pipeline;
mod report;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Compare domain-adaptation training with and without the covariance
/// regularizer.
#[derive(Parser, Debug)]
#[command(name = "deep-coral", version, about)]
struct Cli {
    /// Experiment TOML; built-in defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pretrained extractor weights (named-tensor JSON) loaded at the start
    /// of each run.
    #[arg(long)]
    load: Option<PathBuf>,

    /// Output directory override for CSVs, plot, and checkpoints.
    #[arg(long)]
    out_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    pipeline::run_experiment(pipeline::ExperimentArgs {
        config: cli.config,
        load: cli.load,
        out_dir: cli.out_dir,
    })
}
