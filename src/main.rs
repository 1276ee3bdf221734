//! # Snow Telemetry
//!
//! Command line entry point for sensor stations and the base station.
//!
//! Commands:
//! - `station --config <file>` - run the measurement loop
//! - `base --config <file>` - run the base-station receive loop
//! - `unsent --config <file>` - print readings not yet confirmed delivered
//! - `mark-sent --config <file> <timestamp>...` - reconcile delivered readings
//! - `sync-backup --config <file>` - copy the ledger to the backup root
//! - `stats --config <file>` - print storage statistics as JSON

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use snow_telemetry::base::BaseStation;
use snow_telemetry::config::{BaseConfig, StationConfig};
use snow_telemetry::message::encode_reading;
use snow_telemetry::message::protocol::parse_timestamp;
use snow_telemetry::station::SensorStation;
use snow_telemetry::storage::LocalStorage;

/// Default station configuration path
const DEFAULT_STATION_CONFIG: &str = "/etc/snow-telemetry/station.toml";

/// Default base-station configuration path
const DEFAULT_BASE_CONFIG: &str = "/etc/snow-telemetry/base.toml";

/// File name prefix of the daily log files
const LOG_FILE_PREFIX: &str = "snow-telemetry.log";

#[derive(Parser)]
#[command(name = "snow-telemetry")]
#[command(about = "Snow-depth telemetry for LoRa sensor stations and their base station")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Also write logs to a daily-rotated file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sensor station measurement loop
    Station {
        #[arg(short, long, default_value = DEFAULT_STATION_CONFIG)]
        config: PathBuf,
    },
    /// Run the base-station receive loop
    Base {
        #[arg(short, long, default_value = DEFAULT_BASE_CONFIG)]
        config: PathBuf,
    },
    /// Print readings stored as local_only
    Unsent {
        #[arg(short, long, default_value = DEFAULT_STATION_CONFIG)]
        config: PathBuf,
    },
    /// Mark local_only readings as delivered, by timestamp
    MarkSent {
        #[arg(short, long, default_value = DEFAULT_STATION_CONFIG)]
        config: PathBuf,
        /// RFC 3339 timestamps, e.g. 2024-01-01T00:15:00Z
        #[arg(required = true)]
        timestamps: Vec<String>,
    },
    /// Copy every ledger partition to the backup root
    SyncBackup {
        #[arg(short, long, default_value = DEFAULT_STATION_CONFIG)]
        config: PathBuf,
    },
    /// Print storage and backup statistics
    Stats {
        #[arg(short, long, default_value = DEFAULT_STATION_CONFIG)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_dir.as_deref())?;

    match cli.command {
        Commands::Station { config } => run_station(&config).await,
        Commands::Base { config } => run_base(&config).await,
        Commands::Unsent { config } => {
            let storage = open_storage(&config)?;
            let unsent = storage.get_unsent_readings()?;
            for reading in &unsent {
                println!("{}", encode_reading(reading));
            }
            info!("{} unsent readings", unsent.len());
            Ok(())
        }
        Commands::MarkSent { config, timestamps } => {
            let timestamps = timestamps
                .iter()
                .map(|ts| parse_timestamp(ts))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let mut storage = open_storage(&config)?;
            let flipped = storage.mark_as_sent(&timestamps)?;
            println!("Marked {} readings as sent", flipped);
            Ok(())
        }
        Commands::SyncBackup { config } => {
            let mut storage = open_storage(&config)?;
            let copied = storage.sync_backup();
            println!("Copied {} partitions", copied);
            println!("{}", serde_json::to_string_pretty(&storage.backup_status())?);
            Ok(())
        }
        Commands::Stats { config } => {
            let storage = open_storage(&config)?;
            println!("{}", serde_json::to_string_pretty(&storage.storage_stats()?)?);
            println!("{}", serde_json::to_string_pretty(&storage.backup_status())?);
            Ok(())
        }
    }
}

/// Console logging, plus a daily file when `log_dir` is set
///
/// The returned guard flushes the file writer when dropped; keep it alive
/// for the whole run.
fn init_logging(log_dir: Option<&Path>) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
            Ok(None)
        }
    }
}

/// Flip the returned channel to `true` on Ctrl+C or SIGTERM
fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = tx.send(true);
    });
    rx
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down..."),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down...");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl+C, shutting down...");
}

fn open_storage(config_path: &Path) -> Result<LocalStorage> {
    let config = StationConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    Ok(LocalStorage::from_config(&config)?)
}

async fn run_station(config_path: &Path) -> Result<()> {
    let config = StationConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    info!(
        "Snow Telemetry v{} starting station {}",
        env!("CARGO_PKG_VERSION"),
        config.station.station_id
    );

    let mut station = SensorStation::from_config(config).await?;
    station.run(shutdown_channel()).await?;

    match station.storage().storage_stats() {
        Ok(stats) => info!(
            "{} readings stored, {} awaiting delivery",
            stats.total_rows, stats.unsent_rows
        ),
        Err(e) => warn!("Could not read storage statistics: {}", e),
    }
    Ok(())
}

async fn run_base(config_path: &Path) -> Result<()> {
    let config = BaseConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    info!("Snow Telemetry v{} starting base station", env!("CARGO_PKG_VERSION"));

    let mut base = BaseStation::from_config(&config).await?;
    base.run(shutdown_channel()).await?;
    Ok(())
}
