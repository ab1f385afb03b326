//! portal-transfer - Legacy portal transfer service
//!
//! Drives the district portal's entry pages through a WebDriver session to
//! bulk-enter counseling sessions recorded in the dashboard's database.
//! Jobs are started, observed and cancelled over HTTP.

use anyhow::{Context, Result};
use clap::Parser;
use portal_common::config::{load_toml_config, prepare_root_folder, resolve_config_path, resolve_root_folder};
use portal_common::events::EventBus;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use portal_transfer::config::ServiceConfig;
use portal_transfer::services::{
    JobRegistry, SqliteOutcomeSink, SqliteRecordSelector, TransferOrchestrator, TransferService,
};
use portal_transfer::services::driver::WebDriverPortalFactory;
use portal_transfer::AppState;

const APP_NAME: &str = "portal-transfer";

/// Events buffered per subscriber before the oldest are dropped
const EVENT_BUS_CAPACITY: usize = 256;

/// Command-line arguments for portal-transfer
#[derive(Parser, Debug)]
#[command(name = "portal-transfer")]
#[command(about = "Bulk transfer of counseling sessions into the legacy portal")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(short, long, env = "PORTAL_TRANSFER_CONFIG")]
    config: Option<PathBuf>,

    /// Folder holding the database
    #[arg(short, long, env = "PORTAL_TRANSFER_ROOT")]
    root_folder: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Step 1: Bootstrap config (needed before logging for the level)
    let config_path = resolve_config_path(args.config.as_deref(), "PORTAL_TRANSFER_CONFIG", APP_NAME);
    let config: ServiceConfig = load_toml_config(config_path.as_deref())
        .context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("portal_transfer={0},portal_common={0},tower_http=info", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting portal-transfer v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &config_path {
        Some(path) => info!("Config: {}", path.display()),
        None => info!("Config: built-in defaults"),
    }

    // Step 2: Root folder and database
    let root_folder = resolve_root_folder(
        args.root_folder.as_deref(),
        "PORTAL_TRANSFER_ROOT",
        config.root_folder.as_deref(),
        APP_NAME,
    );
    let db_path = prepare_root_folder(&root_folder)
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;
    info!("Database: {}", db_path.display());

    let db_pool = portal_transfer::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    // Step 3: Jobs left running by a previous process can never finish
    let stale = portal_transfer::db::jobs::cleanup_stale_jobs(&db_pool).await?;
    if stale > 0 {
        warn!("Marked {} interrupted transfer job(s) as cancelled", stale);
    }

    // Step 4: Transfer services
    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);

    let drivers = WebDriverPortalFactory::new(config.webdriver.clone(), config.portal.clone())
        .context("Failed to create WebDriver client")?;
    info!(
        "WebDriver: {} ({})",
        config.webdriver.url, config.webdriver.browser
    );

    let orchestrator = TransferOrchestrator::new(
        event_bus.clone(),
        Arc::new(SqliteOutcomeSink::new(db_pool.clone())),
    )
    .with_job_store(db_pool.clone());

    let transfers = Arc::new(TransferService::new(
        db_pool.clone(),
        JobRegistry::new(),
        Arc::new(SqliteRecordSelector::new(db_pool.clone())),
        Arc::new(drivers),
        orchestrator,
    ));

    let state = AppState::new(db_pool, event_bus, Arc::clone(&transfers));
    let app = portal_transfer::build_router(state);

    // Step 5: Serve
    let port = args.port.unwrap_or(config.port);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Step 6: Let running jobs stop and close their browser sessions
    let grace = Duration::from_secs(config.shutdown_grace_secs);
    if !transfers.shutdown(grace).await {
        warn!("Some transfer jobs did not stop within {}s", grace.as_secs());
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
