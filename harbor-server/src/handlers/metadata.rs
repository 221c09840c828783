use axum::{extract::State, response::Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::AppState;

/// Health check (GET /health)
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    let store_ok = state.store.count_by_collection().is_ok();
    if !store_ok {
        tracing::warn!("Health check could not read the record store");
    }
    Json(json!({
        "status": if store_ok { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "clinic": state.config.clinic.name,
        "assistant": state.assistant.is_configured(),
    }))
}
