//! cinetek-mr - Media Reconciliation service entry point
//!
//! Boot order: configuration, tracing, database pool and schema, recovery
//! of work interrupted by the previous shutdown, catalog client, then the
//! HTTP server with graceful shutdown.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cinetek_common::config::{resolve_database_path, TomlConfig};
use cinetek_common::events::EventBus;
use cinetek_mr::services::catalog::{MovieCatalog, TmdbClient};
use cinetek_mr::AppState;

/// Command-line arguments for cinetek-mr
#[derive(Parser, Debug)]
#[command(name = "cinetek-mr")]
#[command(about = "Media reconciliation microservice for Cinetek")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "CINETEK_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the SQLite database (falls back to CINETEK_DATABASE, then
    /// the configured or platform-default location)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Port to listen on (overrides the configured port)
    #[arg(short, long, env = "CINETEK_MR_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config =
        TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    init_tracing(&config)?;

    info!(
        "Starting cinetek-mr (Media Reconciliation) v{}",
        env!("CARGO_PKG_VERSION")
    );

    let db_path = resolve_database_path(
        args.database.as_deref(),
        std::env::var("CINETEK_DATABASE").ok(),
        &config,
    );
    info!("Database: {}", db_path.display());

    let db = cinetek_common::db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;

    let api_key = config
        .catalog
        .resolve_api_key(std::env::var("TMDB_API_KEY").ok())?;
    let catalog: Arc<dyn MovieCatalog> = Arc::new(
        TmdbClient::from_config(&config.catalog, api_key)
            .context("Failed to build catalog client")?,
    );

    let event_bus = EventBus::new(100);

    let state = AppState::new(db, event_bus, catalog, config.library.user_id);

    // Recover from an unclean shutdown before accepting new work: batches
    // left RUNNING are marked failed and their record claims released.
    cinetek_mr::db::batches::fail_stale_running(&state.db)
        .await
        .context("Failed to clean up interrupted batches")?;
    state
        .store
        .release_all_claims()
        .await
        .context("Failed to release stale record claims")?;

    let port = args.port.unwrap_or(config.port);
    let app = cinetek_mr::build_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Install the tracing subscriber. `RUST_LOG` wins; otherwise the configured
/// level applies to the cinetek crates. Logs go to the configured file, or
/// stderr when none is set.
fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "cinetek_mr={level},cinetek_common={level}",
            level = config.logging.level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Arc::new(file)),
                )
                .init();
        }
        None => {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
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
}
