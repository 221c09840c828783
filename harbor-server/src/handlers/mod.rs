pub mod appointments;
pub mod assistant;
pub mod dea222;
pub mod metadata;
pub mod patients;
pub mod pdmp;
pub mod prescriptions;
pub mod records;
pub mod reminders;
pub mod studies;
pub mod take_homes;

use axum::{
    extract::Request,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use harbor_core::{HarborError, IssueCode, Outcome, Patient, Record};
use harbor_store::{Operation, StoreError};
use http_body_util::BodyExt;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};

use crate::audit::{self, AuditContext};
use crate::AppState;

/// Error half of every handler result: status plus an [`Outcome`] body
pub type ApiError = (StatusCode, Json<Value>);

fn outcome_error(status: StatusCode, outcome: Outcome) -> ApiError {
    (status, Json(json!(outcome)))
}

/// HTTP status for a domain error
pub fn status_for(err: &HarborError) -> StatusCode {
    match err {
        HarborError::NotFound { .. } => StatusCode::NOT_FOUND,
        HarborError::Validation { .. } | HarborError::InvalidJson(_) => StatusCode::BAD_REQUEST,
        HarborError::BusinessRule { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        HarborError::Conflict(_) => StatusCode::CONFLICT,
        HarborError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Turn a domain error into a response
pub fn reject(err: HarborError) -> ApiError {
    outcome_error(status_for(&err), Outcome::from(&err))
}

/// Turn a store error into a response
pub fn store_failure(err: StoreError) -> ApiError {
    match err {
        StoreError::Rejected(err) => reject(err),
        StoreError::NotFound { collection, id } => {
            outcome_error(StatusCode::NOT_FOUND, Outcome::not_found(&collection, &id))
        }
        StoreError::VersionConflict { .. } | StoreError::AlreadyExists { .. } => {
            outcome_error(
                StatusCode::CONFLICT,
                Outcome::new(IssueCode::Conflict, err.to_string()),
            )
        }
        other => {
            tracing::error!(error = %other, "Record store failure");
            outcome_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                Outcome::storage_error(other.to_string()),
            )
        }
    }
}

/// Extract headers and a typed JSON body from a Request
pub async fn extract_body<T: DeserializeOwned>(request: Request) -> Result<(HeaderMap, T), ApiError> {
    let (parts, body) = request.into_parts();
    let bytes = body
        .collect()
        .await
        .map_err(|e| outcome_error(StatusCode::BAD_REQUEST, Outcome::invalid(e.to_string())))?
        .to_bytes();

    let value: T = serde_json::from_slice(&bytes)
        .map_err(|e| outcome_error(StatusCode::BAD_REQUEST, Outcome::invalid(e.to_string())))?;

    Ok((parts.headers, value))
}

/// Expected version from an `If-Match` header (`"3"`, `W/"3"` or `3`)
pub fn if_match(headers: &HeaderMap) -> Result<Option<u32>, ApiError> {
    let Some(raw) = headers.get(header::IF_MATCH) else {
        return Ok(None);
    };
    raw.to_str()
        .ok()
        .map(|s| s.trim().trim_start_matches("W/").trim_matches('"'))
        .and_then(|s| s.parse().ok())
        .map(Some)
        .ok_or_else(|| {
            outcome_error(
                StatusCode::BAD_REQUEST,
                Outcome::invalid("If-Match must carry a record version number")
                    .with_field("If-Match"),
            )
        })
}

/// Serialize a record for a response body
pub fn to_json<T: Serialize>(record: &T) -> Result<Value, ApiError> {
    serde_json::to_value(record).map_err(|e| {
        outcome_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            Outcome::storage_error(e.to_string()),
        )
    })
}

/// Build response with ETag header
pub fn response_with_etag(status: StatusCode, body: Value, version: u32) -> Response {
    let mut headers = HeaderMap::new();
    if let Ok(val) = HeaderValue::from_str(&format!("W/\"{}\"", version)) {
        headers.insert(header::ETAG, val);
    }
    (status, headers, Json(body)).into_response()
}

/// Envelope for collection listings
pub fn list_response<T: Serialize>(items: &[T]) -> Result<Json<Value>, ApiError> {
    let items: Vec<Value> = items.iter().map(to_json).collect::<Result<_, _>>()?;
    Ok(Json(json!({
        "total": items.len(),
        "items": items,
    })))
}

/// Load the patient a request body refers to
pub fn require_patient(state: &AppState, patient_id: &str) -> Result<Patient, ApiError> {
    state
        .store
        .fetch::<Patient>(patient_id)
        .map_err(store_failure)?
        .ok_or_else(|| {
            reject(HarborError::rule(
                "patient_id",
                format!("no patient with id {}", patient_id),
            ))
        })
}

/// Stamp, store and return a modified record
pub fn save_update<T: Record>(
    state: &AppState,
    record: &mut T,
    expected: Option<u32>,
    audit_ctx: &AuditContext,
) -> Result<Response, ApiError> {
    record.meta_mut().touch(Utc::now());
    state.store.replace(record, expected).map_err(store_failure)?;

    audit::log_operation_success(
        audit_ctx,
        Operation::Update,
        T::COLLECTION,
        Some(record.id()),
        Some(record.version()),
        &state.audit,
    );
    Ok(response_with_etag(StatusCode::OK, to_json(record)?, record.version()))
}

/// Remove the current version of a record (history is kept)
pub fn delete_record<T: Record>(
    state: &AppState,
    id: &str,
    audit_ctx: &AuditContext,
) -> Result<StatusCode, ApiError> {
    let deleted = state.store.delete(T::COLLECTION, id).map_err(store_failure)?;
    if !deleted {
        return Err(reject(HarborError::not_found(T::COLLECTION, id)));
    }

    audit::log_operation_success(
        audit_ctx,
        Operation::Delete,
        T::COLLECTION,
        Some(id),
        None,
        &state.audit,
    );
    Ok(StatusCode::NO_CONTENT)
}
