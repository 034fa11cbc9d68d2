use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use ferry_core::app::{ServiceBuilder, open_manager};
use ferry_core::config::QueueConfig;
use ferry_core::domain::{ItemId, ItemStatus, OwnerMetadata};
use ferry_core::impls::DirectoryDelivery;
use ferry_core::ports::SystemClock;
use ferry_core::queue::{ItemFilter, QueueManager};

#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(about = "Persistent artifact delivery queue")]
#[command(version)]
struct Cli {
    /// Queue config file (JSON, camelCase keys)
    #[arg(short = 'c', long = "config", value_name = "FILE", env = "FERRY_CONFIG")]
    config: Option<PathBuf>,

    /// Override the snapshot directory
    #[arg(long = "store-dir", value_name = "DIR")]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the delivery service until Ctrl-C
    Run {
        /// Directory artifacts are dropped into; idle if omitted
        #[arg(long = "drop-dir", value_name = "DIR")]
        drop_dir: Option<PathBuf>,
    },
    /// Add an artifact to the queue
    Enqueue {
        path: PathBuf,
        #[arg(long)]
        owner: String,
        #[arg(long = "owner-name")]
        owner_name: Option<String>,
    },
    /// Print status counts
    Stats,
    /// List items, newest first
    List {
        #[arg(long)]
        status: Option<ItemStatus>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Remove sent items older than the retention period
    Cleanup {
        #[arg(long = "retention-days")]
        retention_days: Option<u32>,
    },
    /// Remove one sent or failed item
    Purge { id: ItemId },
    /// Remove every permanently failed item
    PurgeFailed,
}

#[derive(Serialize)]
struct Removed {
    removed: usize,
}

fn load_config(cli: &Cli) -> Result<QueueConfig> {
    let mut config = match &cli.config {
        Some(path) => QueueConfig::from_json_file(path)?,
        None => QueueConfig::default(),
    };
    if let Some(dir) = &cli.store_dir {
        config.store_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One-shot commands write their own snapshot before exiting.
fn flush(manager: &QueueManager) -> Result<()> {
    manager
        .flush()
        .with_context(|| format!("writing {}", manager.store().path().display()))?;
    Ok(())
}

async fn run(config: QueueConfig, drop_dir: Option<PathBuf>) -> Result<()> {
    let delivery = match drop_dir {
        Some(dir) => DirectoryDelivery::new(dir),
        None => DirectoryDelivery::unconfigured(),
    };
    let service = ServiceBuilder::new(config)
        .delivery(Arc::new(delivery))
        .build()?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("shutdown requested");

    service.shutdown().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(&config.log_level);

    // fails while `ferry run` owns the snapshot
    let open = || open_manager(&config, Arc::new(SystemClock));
    match cli.command {
        Command::Run { drop_dir } => run(config.clone(), drop_dir).await?,
        Command::Enqueue {
            path,
            owner,
            owner_name,
        } => {
            let path = std::path::absolute(&path)
                .with_context(|| format!("resolving {}", path.display()))?;
            let mut owner = OwnerMetadata::new(owner);
            if let Some(name) = owner_name {
                owner = owner.with_name(name);
            }
            let manager = open()?;
            let id = manager.enqueue(path, owner);
            flush(&manager)?;
            if let Some(item) = manager.get_item(&id) {
                print_json(&item)?;
            }
        }
        Command::Stats => print_json(&open()?.get_stats())?,
        Command::List {
            status,
            owner,
            limit,
        } => {
            let filter = ItemFilter {
                status,
                owner,
                limit,
            };
            print_json(&open()?.get_items(&filter))?;
        }
        Command::Cleanup { retention_days } => {
            let manager = open()?;
            let removed =
                manager.cleanup_old_items(retention_days.unwrap_or(config.retention_days));
            flush(&manager)?;
            print_json(&Removed { removed })?;
        }
        Command::Purge { id } => {
            let manager = open()?;
            let item = manager.purge_item(&id)?;
            flush(&manager)?;
            print_json(&item)?;
        }
        Command::PurgeFailed => {
            let manager = open()?;
            let removed = manager.purge_permanently_failed();
            flush(&manager)?;
            print_json(&Removed { removed })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_filters() {
        let cli = Cli::try_parse_from([
            "ferry", "list", "--status", "permanently-failed", "--owner", "PAT-1", "--limit", "5",
        ])
        .unwrap();
        match cli.command {
            Command::List {
                status,
                owner,
                limit,
            } => {
                assert_eq!(status, Some(ItemStatus::PermanentlyFailed));
                assert_eq!(owner.as_deref(), Some("PAT-1"));
                assert_eq!(limit, Some(5));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_status() {
        assert!(Cli::try_parse_from(["ferry", "list", "--status", "lost"]).is_err());
    }

    #[test]
    fn store_dir_overrides_config() {
        let cli =
            Cli::try_parse_from(["ferry", "--store-dir", "/tmp/ferry-q", "stats"]).unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.store_dir, PathBuf::from("/tmp/ferry-q"));
    }
}
