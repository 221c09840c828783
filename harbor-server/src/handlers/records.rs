//! Version history and audit trail for any stored record

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Json, Response},
};
use harbor_core::{HarborError, COLLECTIONS};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{reject, response_with_etag, store_failure, to_json, ApiError};
use crate::AppState;

const DEFAULT_AUDIT_LIMIT: usize = 50;
const MAX_AUDIT_LIMIT: usize = 500;

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}

fn check_collection(collection: &str) -> Result<(), ApiError> {
    if COLLECTIONS.contains(&collection) {
        Ok(())
    } else {
        Err(reject(HarborError::validation(
            "collection",
            format!("unknown collection {}", collection),
        )))
    }
}

fn parse_stored(data: &[u8]) -> Result<Value, ApiError> {
    serde_json::from_slice(data).map_err(|e| store_failure(e.into()))
}

/// GET /api/history/{collection}/{id}
pub async fn history(
    State(state): State<Arc<AppState>>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    check_collection(&collection)?;
    let versions = state
        .store
        .list_versions(&collection, &id)
        .map_err(store_failure)?;
    if versions.is_empty() {
        return Err(reject(HarborError::not_found(&collection, &id)));
    }

    let mut entries = Vec::with_capacity(versions.len());
    for version in versions {
        if let Some(data) = state
            .store
            .get_version(&collection, &id, version)
            .map_err(store_failure)?
        {
            entries.push(json!({
                "version": version,
                "record": parse_stored(&data)?,
            }));
        }
    }

    let deleted = state.store.get(&collection, &id).map_err(store_failure)?.is_none();
    Ok(Json(json!({
        "collection": collection,
        "id": id,
        "deleted": deleted,
        "total": entries.len(),
        "versions": entries,
    })))
}

/// GET /api/history/{collection}/{id}/{version}
pub async fn read_version(
    State(state): State<Arc<AppState>>,
    Path((collection, id, version)): Path<(String, String, u32)>,
) -> Result<Response, ApiError> {
    check_collection(&collection)?;
    match state
        .store
        .get_version(&collection, &id, version)
        .map_err(store_failure)?
    {
        Some(data) => Ok(response_with_etag(StatusCode::OK, parse_stored(&data)?, version)),
        None => Err(reject(HarborError::not_found(
            &collection,
            &format!("{}/{}", id, version),
        ))),
    }
}

/// GET /api/audit/{collection}/{id}
pub async fn audit_trail(
    State(state): State<Arc<AppState>>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let entries = state
        .audit
        .lock()
        .await
        .entries_for(&collection, &id)
        .map_err(store_failure)?;
    Ok(Json(json!({
        "collection": collection,
        "id": id,
        "total": entries.len(),
        "entries": to_json(&entries)?,
    })))
}

/// GET /api/audit?limit=
pub async fn recent_audit(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .clamp(1, MAX_AUDIT_LIMIT);
    let entries = state
        .audit
        .lock()
        .await
        .recent_entries(limit)
        .map_err(store_failure)?;
    Ok(Json(json!({
        "total": entries.len(),
        "entries": to_json(&entries)?,
    })))
}
