//! Duet Signal Server
//!
//! # Usage
//!
//! ```bash
//! # Room-code mode on the default port
//! duet-signal
//!
//! # LAN discovery mode serving custom pages
//! duet-signal --mode lan --public-dir ./public
//! ```

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use duet_core::{Config, SignalMode};
use duet_signal::SignalServer;

#[derive(Parser, Debug)]
#[command(name = "duet-signal")]
#[command(about = "Duet signaling server for two-party WebRTC chat")]
#[command(version)]
struct Args {
    /// Port to listen on (HTTP and WebSocket)
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Deployment mode: room-code or lan
    #[arg(short, long)]
    mode: Option<SignalMode>,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding index.html and chat.html
    #[arg(long)]
    public_dir: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    if args.json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    config.apply_env();

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(mode) = args.mode {
        config.server.mode = mode;
    }
    if let Some(dir) = args.public_dir {
        config.server.public_dir = Some(dir);
    }

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    info!("Starting Duet Signal Server");

    let server = SignalServer::new(config)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            // Keep the sender alive so the server runs until killed
            std::future::pending::<()>().await;
        }
        info!("Shutting down...");
        let _ = shutdown_tx.send(true);
    });

    server.serve(shutdown_rx).await?;
    Ok(())
}
