//! Renter binary

use clap::{Parser, Subcommand};
use shardfs::{common::Config, RenterServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardfs-renter")]
#[command(about = "shardfs renter: stores shards and heartbeats to the coordinator")]
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
    /// Start renter server
    Serve {
        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// URL the coordinator uses to reach this renter
        #[arg(long)]
        public_url: Option<String>,

        /// Shard directory
        #[arg(long)]
        data: Option<PathBuf>,

        /// Coordinator URL
        #[arg(long)]
        coordinator: Option<String>,

        /// Advertised capacity in bytes
        #[arg(long)]
        capacity: Option<u64>,

        /// Rack this renter sits in
        #[arg(long)]
        rack: Option<u32>,
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
            public_url,
            data,
            coordinator,
            capacity,
            rack,
        } => {
            let mut renter_config = config.renter;
            if let Some(bind) = bind {
                renter_config.bind_addr = bind;
            }
            if public_url.is_some() {
                renter_config.public_url = public_url;
            }
            if let Some(data) = data {
                renter_config.data_path = data;
            }
            if let Some(coordinator) = coordinator {
                renter_config.coordinator_url = coordinator;
            }
            if capacity.is_some() {
                renter_config.capacity_bytes = capacity;
            }
            if rack.is_some() {
                renter_config.rack = rack;
            }
            renter_config.validate()?;

            RenterServer::new(renter_config).serve().await?;
        }
    }

    Ok(())
}
