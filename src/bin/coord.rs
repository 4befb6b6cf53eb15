//! Coordinator binary

use clap::{Parser, Subcommand};
use shardfs::{common::Config, Coordinator};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardfs-coord")]
#[command(about = "shardfs coordinator: renter registry, placement and recovery")]
#[command(version)]
struct Cli {
    /// TOML config file (SHARDFS_* environment variables also apply)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start coordinator server
    Serve {
        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Database directory
        #[arg(long)]
        db: Option<PathBuf>,

        /// Copies kept of every shard
        #[arg(long)]
        replication: Option<usize>,

        /// Largest shard in bytes
        #[arg(long)]
        max_shard_size: Option<u64>,

        /// Silence before a renter is suspected (ms)
        #[arg(long)]
        heartbeat_timeout_ms: Option<u64>,

        /// Silence before a renter is evicted (ms)
        #[arg(long)]
        eviction_timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve {
            bind,
            db,
            replication,
            max_shard_size,
            heartbeat_timeout_ms,
            eviction_timeout_ms,
        } => {
            // CLI flags win over file and environment
            let mut coord_config = config.coordinator;
            if let Some(bind) = bind {
                coord_config.bind_addr = bind;
            }
            if let Some(db) = db {
                coord_config.db_path = db;
            }
            if let Some(replication) = replication {
                coord_config.replication_factor = replication;
            }
            if let Some(max_shard_size) = max_shard_size {
                coord_config.max_shard_size = max_shard_size;
            }
            if let Some(ms) = heartbeat_timeout_ms {
                coord_config.heartbeat_timeout_ms = ms;
            }
            if let Some(ms) = eviction_timeout_ms {
                coord_config.eviction_timeout_ms = ms;
            }
            coord_config.validate()?;

            Coordinator::new(coord_config).serve().await?;
        }
    }

    Ok(())
}
