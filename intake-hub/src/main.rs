//! intake-hub - collaborative triage server
//!
//! Serves the submission store, audit history, change stream and presence
//! registry to admin sessions over HTTP + SSE.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use intake_common::config::HubConfig;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for intake-hub
#[derive(Parser, Debug)]
#[command(name = "intake-hub")]
#[command(about = "Collaborative triage and audit server")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "INTAKE_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "INTAKE_PORT")]
    port: Option<u16>,

    /// SQLite database file
    #[arg(short, long, env = "INTAKE_DATABASE")]
    database: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    bind: Option<String>,
}

impl Args {
    fn resolve_config(&self) -> Result<HubConfig> {
        let mut config = HubConfig::load(self.config.as_deref())
            .context("Failed to load configuration")?;
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(database) = &self.database {
            config.database_path = database.clone();
        }
        if let Some(bind) = &self.bind {
            config.bind_address = bind.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.resolve_config()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting intake-hub v{}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", config.database_path.display());

    let pool = intake_common::db::init_database(&config.database_path)
        .await
        .context("Failed to open database")?;

    let state = intake_hub::AppState::from_config(pool.clone(), &config);

    let shutdown = state.shutdown.clone();
    let sweeper = state
        .presence
        .spawn_sweeper(config.presence.sweep_interval(), shutdown.clone());

    let app = intake_hub::build_router(state);

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("Server error")?;

    shutdown.cancel();
    sweeper.await.context("Presence sweeper panicked")?;
    pool.close().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
    shutdown.cancel();
}
