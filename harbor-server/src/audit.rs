use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;
use harbor_store::{AuditLog, Operation};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Header carrying the staff member on whose behalf a request is made
pub const STAFF_HEADER: &str = "x-staff-id";

/// Audit context extracted from HTTP request
#[derive(Debug, Clone)]
pub struct AuditContext {
    pub actor: Option<String>,
    pub client_ip: String,
}

impl AuditContext {
    /// Create audit context without connection info (for testing)
    pub fn new(actor: Option<String>, client_ip: String) -> Self {
        Self { actor, client_ip }
    }

    /// Context for work the server does on its own (reminder dispatch)
    pub fn system() -> Self {
        Self {
            actor: Some("system".to_string()),
            client_ip: "local".to_string(),
        }
    }

    /// Extract audit context from an Axum request
    pub fn from_request(request: &Request) -> Self {
        let client_ip = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            actor: staff_id(request.headers()),
            client_ip,
        }
    }
}

fn staff_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(STAFF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Log a successful operation
pub fn log_operation_success(
    context: &AuditContext,
    operation: Operation,
    collection: &str,
    record_id: Option<&str>,
    version: Option<u32>,
    audit_log: &Arc<Mutex<AuditLog>>,
) {
    tracing::info!(
        actor = context.actor.as_deref().unwrap_or("anonymous"),
        client_ip = %context.client_ip,
        operation = operation.as_str(),
        collection = collection,
        record_id = record_id.unwrap_or("-"),
        status = "success",
        "Audit: {} {}/{}",
        operation.as_str(),
        collection,
        record_id.unwrap_or("*")
    );

    // Write to database asynchronously in a spawned task
    let context = context.clone();
    let collection = collection.to_string();
    let record_id = record_id.map(str::to_string);
    let audit_log = Arc::clone(audit_log);

    tokio::spawn(async move {
        let audit = audit_log.lock().await;
        if let Err(e) = audit.log_success(
            operation,
            &collection,
            record_id.as_deref(),
            version,
            context.actor.as_deref(),
            Some(&context.client_ip),
        ) {
            tracing::error!("Failed to write audit log to database: {}", e);
        }
    });
}

/// Log a failed operation
pub fn log_operation_error(
    context: &AuditContext,
    operation: Operation,
    collection: &str,
    record_id: Option<&str>,
    error: &str,
    audit_log: &Arc<Mutex<AuditLog>>,
) {
    tracing::warn!(
        actor = context.actor.as_deref().unwrap_or("anonymous"),
        client_ip = %context.client_ip,
        operation = operation.as_str(),
        collection = collection,
        record_id = record_id.unwrap_or("-"),
        status = "error",
        error = error,
        "Audit: {} {} failed: {}",
        operation.as_str(),
        collection,
        error
    );

    let context = context.clone();
    let collection = collection.to_string();
    let record_id = record_id.map(str::to_string);
    let error = error.to_string();
    let audit_log = Arc::clone(audit_log);

    tokio::spawn(async move {
        let audit = audit_log.lock().await;
        if let Err(e) = audit.log_error(
            operation,
            Some(&collection),
            record_id.as_deref(),
            context.actor.as_deref(),
            Some(&context.client_ip),
            &error,
        ) {
            tracing::error!("Failed to write audit log to database: {}", e);
        }
    });
}
