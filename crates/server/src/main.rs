//! Tusk server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tusk_core::config::AppConfig;
use tusk_metadata::UploadRepo;
use tusk_server::{AppState, EventBus, create_router};

/// Tusk - a resumable upload server (TUS 1.0.0)
#[derive(Parser, Debug)]
#[command(name = "tuskd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "TUSK_CONFIG", default_value = "config/server.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Tusk v{}", env!("CARGO_PKG_VERSION"));

    // The file is optional; every setting has a default and env vars override.
    let mut figment = Figment::new();
    if std::path::Path::new(&args.config).exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::info!(config_path = %args.config, "No config file found, using defaults");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("TUSK_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    tusk_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let store = tusk_storage::from_config(&config.storage)
        .await
        .context("failed to initialize byte store")?;
    store
        .health_check()
        .await
        .context("byte store health check failed")?;
    let stager = tusk_storage::stager_from_config(&config.storage, config.tus.max_chunk_size)
        .await
        .context("failed to initialize chunk staging")?;
    tracing::info!(backend = store.backend_name(), "Byte store initialized");

    let metadata = tusk_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    // A crash mid-append leaves records holding the write lock.
    let released = metadata
        .release_saving()
        .await
        .context("failed to release stale write locks")?;
    if released > 0 {
        tracing::warn!(count = released, "Released uploads left saving by a previous run");
    }

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    let base_path = config.server.base_path.clone();

    let state = AppState::new(config, store, metadata, stager, EventBus::default())
        .context("failed to build protocol handler")?;
    let app = create_router(state);

    tracing::info!(%addr, %base_path, "Listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
