//! `pii-service`: HTTP API over users and payments with field-level encryption.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise the telemetry pipeline (JSON logs, optional OTLP).
//! 3. Load the key registry and build the codec and persistence hook.
//! 4. Open the SQLite database and create the service tables.
//! 5. Build the Axum router and serve until shutdown.

mod config;
mod entities;
mod repo;
mod server;
mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use fieldcrypt::{AesGcmSivEngine, Database, FieldAnnotationRegistry, FieldCodec, PersistenceHook};
use tracing::{info, warn};

use config::Config;
use entities::{Payment, User};
use repo::Repository;
use server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(cfg.otel_exporter_otlp_endpoint.as_deref(), &cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = cfg.port,
        "pii-service starting"
    );

    // -----------------------------------------------------------------------
    // 3. Keys, codec, hook
    // -----------------------------------------------------------------------
    let keys = Arc::new(cfg.key_registry()?);
    let active = keys.active();
    info!(
        active_key_id = active.key_id(),
        active_key_version = active.version(),
        keys_loaded = keys.len(),
        "key registry loaded"
    );
    if !cfg.encryption_enabled {
        warn!("ENCRYPTION_ENABLED is false; protected fields are stored as plaintext");
    }

    let codec = Arc::new(FieldCodec::new(
        cfg.encryption_enabled,
        keys,
        Arc::new(AesGcmSivEngine::new()),
    ));
    let annotations = FieldAnnotationRegistry::builder()
        .entity::<User>()
        .entity::<Payment>()
        .build()
        .context("invalid field annotations")?;
    let hook = PersistenceHook::new(Arc::new(annotations), codec);

    // -----------------------------------------------------------------------
    // 4. Database
    // -----------------------------------------------------------------------
    let db = Database::open(&cfg.database_path)
        .with_context(|| format!("failed to open database {}", cfg.database_path))?;
    let repo = Repository::new(db, hook);
    repo.init_schema().context("failed to create service tables")?;
    info!(path = %cfg.database_path, "database ready");

    // -----------------------------------------------------------------------
    // 5. HTTP server
    // -----------------------------------------------------------------------
    let router = server::router::build(AppState::new(repo));

    let addr: std::net::SocketAddr = ([0, 0, 0, 0], cfg.port).into();
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("pii-service stopped");
    telemetry::shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
