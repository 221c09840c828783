use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    response::{Json, Response},
};
use chrono::Utc;
use harbor_core::{NewPdmpLookup, PdmpLookup, PdmpStatus, Record, RecordMeta};
use harbor_store::Operation;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::{
    extract_body, list_response, reject, require_patient, response_with_etag, store_failure,
    to_json, ApiError,
};
use crate::audit::{self, AuditContext};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct LookupQuery {
    pub patient_id: Option<String>,
}

fn lookups_for(state: &AppState, patient_id: Option<&str>) -> Result<Vec<PdmpLookup>, ApiError> {
    let mut lookups: Vec<PdmpLookup> = state.store.fetch_all().map_err(store_failure)?;
    lookups.retain(|l| patient_id.is_none_or(|p| l.patient_id == p));
    lookups.sort_by(|a, b| b.queried_at.cmp(&a.queried_at));
    Ok(lookups)
}

/// PDMP currency for one patient as of now
pub fn status_for_patient(state: &AppState, patient_id: &str) -> Result<PdmpStatus, ApiError> {
    let lookups = lookups_for(state, Some(patient_id))?;
    Ok(PdmpStatus::from_lookups(
        patient_id,
        lookups,
        Utc::now(),
        state.config.clinic.pdmp_max_age_days,
    ))
}

/// POST /api/pdmp/lookups
pub async fn create(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let (_, body): (_, NewPdmpLookup) = extract_body(request).await?;

    require_patient(&state, &body.patient_id)?;
    let now = Utc::now();
    let lookup = body
        .into_lookup(RecordMeta::new(now), now)
        .map_err(reject)?;
    state.store.insert(&lookup).map_err(store_failure)?;

    audit::log_operation_success(
        &audit_ctx,
        Operation::Create,
        PdmpLookup::COLLECTION,
        Some(lookup.id()),
        Some(lookup.version()),
        &state.audit,
    );
    Ok(response_with_etag(StatusCode::CREATED, to_json(&lookup)?, lookup.version()))
}

/// GET /api/pdmp/lookups
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<Value>, ApiError> {
    let lookups = lookups_for(&state, query.patient_id.as_deref())?;
    list_response(&lookups)
}

/// GET /api/pdmp/lookups/{id}
pub async fn read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let lookup: PdmpLookup = state.store.require(&id).map_err(store_failure)?;

    audit::log_operation_success(
        &audit_ctx,
        Operation::Read,
        PdmpLookup::COLLECTION,
        Some(&id),
        None,
        &state.audit,
    );
    Ok(response_with_etag(StatusCode::OK, to_json(&lookup)?, lookup.version()))
}

/// GET /api/pdmp/status/{patient_id}
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(patient_id): Path<String>,
) -> Result<Json<PdmpStatus>, ApiError> {
    require_patient(&state, &patient_id)?;
    status_for_patient(&state, &patient_id).map(Json)
}
