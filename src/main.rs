//! # tally
//!
//! WebSocket command server binary: loads configuration, installs
//! logging, and runs the server until ctrl-c.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tally_server::TallyServer;
use tally_telemetry::init_telemetry;

use crate::config::Overrides;

#[derive(Parser, Debug)]
#[command(name = "tally", about = "Persistent WebSocket command server")]
struct Cli {
    /// JSON config file (default: ./tally.json if present).
    #[arg(long, env = "TALLY_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Token signing secret.
    #[arg(long, env = "TALLY_JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = config::load(cli.config.as_deref())?;
    cfg.apply(Overrides {
        host: cli.host,
        port: cli.port,
        jwt_secret: cli.jwt_secret,
    });

    let telemetry = init_telemetry(&cfg.log).context("failed to initialize logging")?;
    tracing::debug!(filter = telemetry.filter(), "logging ready");

    let server = TallyServer::from_config(cfg.server).context("invalid server configuration")?;
    let handle = server.start().await.context("failed to start server")?;
    tracing::info!(addr = %handle.local_addr(), "tally ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
