use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    response::{Json, Response},
};
use chrono::Utc;
use harbor_core::{
    NewPrescription, Prescription, PrescriptionPatch, PrescriptionStatus,
    Record, RecordMeta,
};
use harbor_store::Operation;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::{
    extract_body, if_match, list_response, reject, require_patient, response_with_etag,
    store_failure, to_json, ApiError,
};
use super::pdmp;
use crate::audit::{self, AuditContext};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PrescriptionQuery {
    pub patient_id: Option<String>,
    pub status: Option<PrescriptionStatus>,
}

/// POST /api/prescriptions
pub async fn create(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let (_, body): (_, NewPrescription) = extract_body(request).await?;

    require_patient(&state, &body.patient_id)?;
    let prescription = body
        .into_prescription(RecordMeta::new(Utc::now()), state.config.today())
        .map_err(reject)?;

    let pdmp_current = pdmp::status_for_patient(&state, &prescription.patient_id)?.current;
    if prescription.schedule.is_controlled() && !pdmp_current {
        tracing::warn!(
            patient_id = %prescription.patient_id,
            schedule = prescription.schedule.as_str(),
            medication = %prescription.medication,
            "Controlled prescription written without a current PDMP lookup"
        );
    }

    state.store.insert(&prescription).map_err(store_failure)?;

    audit::log_operation_success(
        &audit_ctx,
        Operation::Create,
        Prescription::COLLECTION,
        Some(prescription.id()),
        Some(prescription.version()),
        &state.audit,
    );

    let mut body = to_json(&prescription)?;
    body["pdmp_current"] = Value::Bool(pdmp_current);
    Ok(response_with_etag(StatusCode::CREATED, body, prescription.version()))
}

/// GET /api/prescriptions
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PrescriptionQuery>,
) -> Result<Json<Value>, ApiError> {
    let mut prescriptions: Vec<Prescription> = state.store.fetch_all().map_err(store_failure)?;
    prescriptions.retain(|rx| {
        query.patient_id.as_deref().is_none_or(|p| rx.patient_id == p)
            && query.status.is_none_or(|s| rx.status == s)
    });
    prescriptions.sort_by(|a, b| b.start_date.cmp(&a.start_date));
    list_response(&prescriptions)
}

/// GET /api/prescriptions/{id}
pub async fn read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let prescription: Prescription = state.store.require(&id).map_err(store_failure)?;

    audit::log_operation_success(
        &audit_ctx,
        Operation::Read,
        Prescription::COLLECTION,
        Some(&id),
        None,
        &state.audit,
    );
    Ok(response_with_etag(
        StatusCode::OK,
        to_json(&prescription)?,
        prescription.version(),
    ))
}

/// PATCH /api/prescriptions/{id}
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let (headers, patch): (_, PrescriptionPatch) = extract_body(request).await?;
    let expected = if_match(&headers)?;

    let existing: Prescription = state.store.require(&id).map_err(store_failure)?;
    let mut prescription = match patch.apply(&existing) {
        Ok(rx) => rx,
        Err(e) => {
            audit::log_operation_error(
                &audit_ctx,
                Operation::Update,
                Prescription::COLLECTION,
                Some(&id),
                &e.to_string(),
                &state.audit,
            );
            return Err(reject(e));
        }
    };
    prescription.meta.touch(Utc::now());
    state
        .store
        .replace(&mut prescription, expected)
        .map_err(store_failure)?;

    audit::log_operation_success(
        &audit_ctx,
        Operation::Update,
        Prescription::COLLECTION,
        Some(&id),
        Some(prescription.version()),
        &state.audit,
    );
    Ok(response_with_etag(
        StatusCode::OK,
        to_json(&prescription)?,
        prescription.version(),
    ))
}
