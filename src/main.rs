//! livecapture - discovery and protocol tooling for live capture sessions

mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::{LiveCaptureConfig, DEFAULT_CONFIG_PATH};
use std::net::SocketAddrV4;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Live capture discovery and protocol tool", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the discovery port from the configuration
    #[arg(short, long)]
    port: Option<u16>,

    /// Log at info level unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Listen for servers and print when they appear or disappear
    Discover {
        /// Print one JSON object per event
        #[arg(long)]
        json: bool,
    },
    /// Announce this machine as a server
    Advertise {
        /// Endpoint clients should connect to (repeatable)
        #[arg(short, long = "end-point")]
        end_points: Vec<SocketAddrV4>,

        /// Announce every local address on this port when no endpoint is given
        #[arg(long)]
        connect_port: Option<u16>,
    },
    /// Print the capture protocol and the client's view of its handshake
    Protocol {
        /// Dump the handshake bytes as hex
        #[arg(long)]
        bytes: bool,
    },
    /// Write the effective configuration to the config path
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = LiveCaptureConfig::load_from_path(&args.config);
    if let Some(port) = args.port {
        config.discovery.port = port;
    }

    let fallback = if args.verbose {
        "info"
    } else {
        config.logging.filter.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(fallback))
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    info!("Starting livecapture v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Discover { json } => commands::discover(&config, json).await,
        Command::Advertise {
            end_points,
            connect_port,
        } => {
            let end_points = match (end_points.is_empty(), connect_port) {
                (true, Some(port)) => commands::local_end_points(port),
                _ => end_points,
            };
            commands::advertise(&config, &end_points).await
        }
        Command::Protocol { bytes } => commands::protocol(bytes),
        Command::InitConfig => {
            config.save_to_path(&args.config)?;
            println!("Wrote {}", args.config.display());
            Ok(())
        }
    }
}
