//! Command-line front end: load a config, run one update for one region.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sekai_updater::{AssetUpdater, Config, Error, Pools, ServerRegion, UpdateSummary};

#[derive(Parser)]
#[command(
    name = "sekai-updater",
    about = "Download, decode and export game asset bundles for one server region",
    version
)]
struct Cli {
    /// Path to the TOML configuration file
    config: PathBuf,

    /// Server region to update (jp, en, tw, kr, cn)
    #[arg(short, long)]
    server: String,

    /// Asset version override for CP manifest URLs
    #[arg(long)]
    asset_version: Option<String>,

    /// Asset hash override for CP manifest URLs
    #[arg(long)]
    asset_hash: Option<String>,

    /// Log filter (e.g. "info", "sekai_updater=debug")
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli).await {
        Ok(summary) => {
            info!(
                planned = summary.planned,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "update finished"
            );
            if summary.failed > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!("update run failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> sekai_updater::Result<UpdateSummary> {
    let region: ServerRegion = cli.server.parse()?;
    let config = Config::load(&cli.config)?;

    let region_config = config.region(region)?;
    if !region_config.enabled {
        return Err(Error::Config(format!(
            "asset updater for region {region} is not enabled"
        )));
    }

    let pools = Pools::from_config(&config);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling run");
            let _ = cancel_tx.send(true);
        }
    });

    let updater = Arc::new(AssetUpdater::new(
        region,
        &config,
        cli.asset_version,
        cli.asset_hash,
        pools,
        cancel_rx,
    )?);
    updater.run().await
}
