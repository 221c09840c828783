//! harbor - clinic records API
//!
//! Scheduling, prescriptions, take-home dispensing, DEA Form 222 orders,
//! PDMP lookups, patient reminders, research studies and a clinical
//! assistant relay over a versioned SQLite record store.

pub mod assistant;
pub mod audit;
pub mod config;
pub mod dashboard;
pub mod dispatch;
pub mod handlers;
pub mod webhook;

use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use harbor_store::{AuditLog, SqliteStore};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::assistant::AssistantClient;
use crate::webhook::WebhookManager;

/// Largest accepted request body
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Application state
pub struct AppState {
    pub store: SqliteStore,
    pub audit: Arc<Mutex<AuditLog>>,
    pub config: config::ServerConfig,
    pub webhooks: WebhookManager,
    pub assistant: AssistantClient,
}

impl AppState {
    pub fn new(store: SqliteStore, audit: AuditLog, config: config::ServerConfig) -> Self {
        Self {
            store,
            audit: Arc::new(Mutex::new(audit)),
            webhooks: WebhookManager::new(config.webhook.clone()),
            assistant: AssistantClient::new(config.assistant.clone()),
            config,
        }
    }
}

/// Build the application router with all routes and middleware
pub fn build_router(state: Arc<AppState>) -> Router {
    use handlers::{
        appointments, dea222, metadata, patients, pdmp, prescriptions, records, reminders,
        studies, take_homes,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(metadata::health_check))
        // Dashboard
        .route("/api/dashboard", get(dashboard::summary))
        // Patients
        .route("/api/patients", get(patients::list).post(patients::create))
        .route(
            "/api/patients/{id}",
            get(patients::read)
                .patch(patients::update)
                .delete(patients::delete),
        )
        // Scheduling
        .route(
            "/api/appointments",
            get(appointments::list).post(appointments::create),
        )
        .route(
            "/api/appointments/{id}",
            get(appointments::read)
                .patch(appointments::update)
                .delete(appointments::delete),
        )
        // Prescriptions
        .route(
            "/api/prescriptions",
            get(prescriptions::list).post(prescriptions::create),
        )
        .route(
            "/api/prescriptions/{id}",
            get(prescriptions::read).patch(prescriptions::update),
        )
        // Take-home dispensing
        .route(
            "/api/take-homes",
            get(take_homes::list).post(take_homes::create),
        )
        .route("/api/take-homes/{id}", get(take_homes::read))
        .route("/api/take-homes/{id}/return", post(take_homes::record_return))
        .route("/api/take-homes/{id}/lost", post(take_homes::mark_lost))
        // DEA Form 222
        .route("/api/dea222/orders", get(dea222::list).post(dea222::create))
        .route(
            "/api/dea222/orders/{id}",
            get(dea222::read)
                .patch(dea222::update)
                .delete(dea222::delete),
        )
        .route("/api/dea222/orders/{id}/submit", post(dea222::submit))
        .route("/api/dea222/orders/{id}/receive", post(dea222::receive))
        .route("/api/dea222/orders/{id}/cancel", post(dea222::cancel))
        // PDMP
        .route("/api/pdmp/lookups", get(pdmp::list).post(pdmp::create))
        .route("/api/pdmp/lookups/{id}", get(pdmp::read))
        .route("/api/pdmp/status/{patient_id}", get(pdmp::status))
        // Reminders (static path before /{id})
        .route("/api/reminders/dispatch", post(reminders::dispatch))
        .route("/api/reminders", get(reminders::list).post(reminders::create))
        .route(
            "/api/reminders/{id}",
            get(reminders::read).patch(reminders::update),
        )
        .route("/api/reminders/{id}/cancel", post(reminders::cancel))
        // Research studies
        .route(
            "/api/research/studies",
            get(studies::list).post(studies::create),
        )
        .route(
            "/api/research/studies/{id}",
            get(studies::read)
                .patch(studies::update)
                .delete(studies::delete),
        )
        // Clinical assistant
        .route("/api/assistant/chat", post(handlers::assistant::chat))
        // History and audit trail for any record
        .route("/api/history/{collection}/{id}", get(records::history))
        .route(
            "/api/history/{collection}/{id}/{version}",
            get(records::read_version),
        )
        .route("/api/audit", get(records::recent_audit))
        .route("/api/audit/{collection}/{id}", get(records::audit_trail))
        // Middleware
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
