mod harvest;
mod sink;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use revharvest_core::{StrategyKind, DEFAULT_QUOTA};
use revharvest_scraper::RunControl;

#[derive(Debug, Parser)]
#[command(name = "revharvest")]
#[command(about = "Harvest product reviews with strategy fallback and block recovery")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Harvest reviews for a single product.
    Harvest {
        /// Product identifier as it appears in the review site's URLs.
        #[arg(long)]
        product: String,
        /// Number of reviews to collect.
        #[arg(long, default_value_t = DEFAULT_QUOTA)]
        quota: usize,
        /// Comma-separated strategy order overriding the configured one,
        /// e.g. `json,browser`.
        #[arg(long, value_parser = parse_strategies)]
        strategies: Option<StrategyOrder>,
        /// Write JSON output here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Harvest every product listed in a YAML targets file.
    Batch {
        #[arg(long)]
        targets: PathBuf,
        /// Directory receiving one `<product>.json` per target.
        #[arg(long, default_value = "./output")]
        output_dir: PathBuf,
    },
}

/// Strategy list given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StrategyOrder(Vec<StrategyKind>);

fn parse_strategies(raw: &str) -> Result<StrategyOrder, String> {
    StrategyKind::parse_order(raw).map(StrategyOrder)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = revharvest_core::load_config_from_env()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let control = RunControl::new();
    spawn_cancel_on_ctrl_c(control.clone());

    match cli.command {
        Commands::Harvest {
            product,
            quota,
            strategies,
            output,
        } => {
            harvest::run_single(
                &config,
                &product,
                quota,
                strategies.as_ref().map(|s| s.0.as_slice()),
                output.as_deref(),
                &control,
            )
            .await
        }
        Commands::Batch {
            targets,
            output_dir,
        } => harvest::run_batch(&config, &targets, &output_dir, &control).await,
    }
}

/// First Ctrl-C asks runs to stop after their in-flight fetch.
fn spawn_cancel_on_ctrl_c(control: RunControl) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        tracing::warn!("interrupt received; finishing in-flight fetches");
        control.cancel();
    });
}

#[cfg(test)]
mod tests;
