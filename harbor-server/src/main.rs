//! harbor - clinic records API entry point

use harbor_store::{AuditLog, SqliteStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use harbor_server::{
    build_router,
    config::{LogFormat, ServerConfig},
    dispatch, AppState,
};

#[tokio::main]
async fn main() {
    // Load configuration before logging so the configured level applies
    let config_result = ServerConfig::load(
        std::path::Path::new("config.yaml")
            .exists()
            .then_some("config.yaml"),
    );
    let level = config_result
        .as_ref()
        .map(|c| c.log.level.clone())
        .unwrap_or_else(|_| "info".to_string());
    let format = config_result
        .as_ref()
        .map(|c| c.log.format)
        .unwrap_or_default();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    tracing::info!("Starting harbor server...");

    let config = config_result.unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        ServerConfig::default()
    });

    // Create data directory
    if let Err(e) = std::fs::create_dir_all(&config.storage.data_dir) {
        tracing::error!("Failed to create data directory: {}", e);
        std::process::exit(1);
    }

    // Initialize stores
    let store = SqliteStore::open(config.records_db_path()).unwrap_or_else(|e| {
        tracing::error!("Failed to open record store: {}", e);
        std::process::exit(1);
    });

    let audit_log = AuditLog::open(config.audit_db_path()).unwrap_or_else(|e| {
        tracing::error!("Failed to open audit log: {}", e);
        std::process::exit(1);
    });

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    let state = Arc::new(AppState::new(store, audit_log, config.clone()));

    tracing::info!(
        clinic = %config.clinic.name,
        utc_offset_minutes = config.clinic.utc_offset_minutes,
        today = %config.today(),
        "Clinic settings"
    );
    tracing::info!(
        "Assistant relay: {}",
        if state.assistant.is_configured() {
            "configured"
        } else {
            "not configured"
        }
    );

    // Reminder dispatch loop
    let dispatcher = config
        .reminders
        .enabled
        .then(|| dispatch::spawn_dispatcher(state.clone()));
    if dispatcher.is_none() {
        tracing::info!("Reminder dispatch: manual only (reminders.enabled = false)");
    }

    // Build router
    let app = build_router(state);

    // Bind TCP listener
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Listening on http://{}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .unwrap_or_else(|e| {
        tracing::error!("Server error: {}", e);
    });

    if let Some(handle) = dispatcher {
        handle.abort();
    }

    tracing::info!("Server shut down gracefully");
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
