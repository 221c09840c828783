use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    response::{Json, Response},
};
use chrono::Utc;
use harbor_core::{NewPatient, Patient, PatientPatch, Record, RecordMeta};
use harbor_store::Operation;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::{
    delete_record, extract_body, if_match, list_response, reject, response_with_etag,
    store_failure, to_json, ApiError,
};
use crate::audit::{self, AuditContext};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PatientQuery {
    pub active: Option<bool>,
    /// Case-insensitive match on name or MRN
    pub q: Option<String>,
}

/// POST /api/patients
pub async fn create(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let (_, body): (_, NewPatient) = extract_body(request).await?;

    let patient = body
        .into_patient(RecordMeta::new(Utc::now()), state.config.today())
        .map_err(reject)?;
    state.store.insert(&patient).map_err(store_failure)?;

    audit::log_operation_success(
        &audit_ctx,
        Operation::Create,
        Patient::COLLECTION,
        Some(patient.id()),
        Some(patient.version()),
        &state.audit,
    );
    Ok(response_with_etag(StatusCode::CREATED, to_json(&patient)?, patient.version()))
}

/// GET /api/patients
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PatientQuery>,
) -> Result<Json<Value>, ApiError> {
    let mut patients: Vec<Patient> = state.store.fetch_all().map_err(store_failure)?;
    patients.retain(|p| {
        query.active.is_none_or(|active| p.active == active)
            && query.q.as_deref().is_none_or(|q| p.matches(q))
    });
    patients.sort_by(|a, b| {
        (a.last_name.to_lowercase(), a.first_name.to_lowercase())
            .cmp(&(b.last_name.to_lowercase(), b.first_name.to_lowercase()))
    });
    list_response(&patients)
}

/// GET /api/patients/{id}
pub async fn read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let patient: Patient = state.store.require(&id).map_err(store_failure)?;

    audit::log_operation_success(
        &audit_ctx,
        Operation::Read,
        Patient::COLLECTION,
        Some(&id),
        None,
        &state.audit,
    );
    Ok(response_with_etag(StatusCode::OK, to_json(&patient)?, patient.version()))
}

/// PATCH /api/patients/{id}
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let (headers, patch): (_, PatientPatch) = extract_body(request).await?;
    let expected = if_match(&headers)?;

    let existing: Patient = state.store.require(&id).map_err(store_failure)?;
    let mut patient = patch
        .apply(&existing, state.config.today())
        .map_err(reject)?;
    patient.meta.touch(Utc::now());
    state
        .store
        .replace(&mut patient, expected)
        .map_err(store_failure)?;

    audit::log_operation_success(
        &audit_ctx,
        Operation::Update,
        Patient::COLLECTION,
        Some(&id),
        Some(patient.version()),
        &state.audit,
    );
    Ok(response_with_etag(StatusCode::OK, to_json(&patient)?, patient.version()))
}

/// DELETE /api/patients/{id}
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<StatusCode, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    delete_record::<Patient>(&state, &id, &audit_ctx)
}
