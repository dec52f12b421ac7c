//! `parlor`: real-time chat server.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use parlor_server::{ParlorServer, ServerConfig};
use parlor_store::Database;
use parlor_telemetry::{init_telemetry, TelemetryConfig};
use tracing::Level;

#[derive(Debug, Parser)]
#[command(name = "parlor", about = "Real-time chat server")]
struct Args {
    /// JSON config file. Environment variables and flags override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// SQLite database path.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Default log level; `RUST_LOG` takes precedence.
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Emit JSON log lines.
    #[arg(long, default_value_t = false)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_telemetry(&TelemetryConfig {
        log_level: args.log_level,
        json: args.log_json,
        ..TelemetryConfig::default()
    })
    .context("failed to install log subscriber")?;

    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(db) = args.db {
        config.db_path = db;
    }

    let db = Database::open(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;

    tracing::info!(db = %db.path().display(), "database opened");

    let server = ParlorServer::new(config, db);
    let (addr, handle) = server.listen().await.context("failed to bind")?;
    tracing::info!(%addr, require_auth = server.config().require_auth, "parlor ready");
    server.shutdown().track(handle);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    server.shutdown().drain(Some(Duration::from_secs(10))).await;
    Ok(())
}
