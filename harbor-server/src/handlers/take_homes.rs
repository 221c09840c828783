use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    response::{Json, Response},
};
use chrono::Utc;
use harbor_core::{
    DispenseContext, HarborError, NewTakeHome, Prescription, Record, RecordMeta, ReturnCheck,
    TakeHome, TakeHomeStatus,
};
use harbor_store::Operation;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::{
    extract_body, list_response, reject, require_patient, response_with_etag, save_update,
    store_failure, to_json, ApiError,
};
use crate::audit::{self, AuditContext};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct TakeHomeQuery {
    pub patient_id: Option<String>,
    pub status: Option<TakeHomeStatus>,
}

/// Body of `POST /api/take-homes/{id}/lost`
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LossReport {
    #[serde(default)]
    pub notes: Option<String>,
}

/// POST /api/take-homes
pub async fn create(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let (_, body): (_, NewTakeHome) = extract_body(request).await?;

    require_patient(&state, &body.patient_id)?;
    let today = state.config.today();
    let max_days = state.config.clinic.take_home_max_days;

    // Prescription state and the patient's open supplies are read and the
    // new record written under one transaction.
    let result = state.store.in_transaction(|ops| {
        let prescription: Prescription =
            ops.fetch(&body.prescription_id)?.ok_or_else(|| {
                HarborError::rule(
                    "prescription_id",
                    format!("no prescription with id {}", body.prescription_id),
                )
            })?;

        let mut patient_take_homes: Vec<TakeHome> = ops.fetch_all()?;
        patient_take_homes.retain(|t| t.patient_id == body.patient_id);

        let ctx = DispenseContext {
            prescription: &prescription,
            patient_take_homes: &patient_take_homes,
            today,
            max_days,
        };
        let take_home = body.into_take_home(RecordMeta::new(Utc::now()), &ctx)?;
        ops.insert(&take_home)?;
        Ok(take_home)
    });

    let take_home = match result {
        Ok(t) => t,
        Err(e) => {
            audit::log_operation_error(
                &audit_ctx,
                Operation::Create,
                TakeHome::COLLECTION,
                None,
                &e.to_string(),
                &state.audit,
            );
            return Err(store_failure(e));
        }
    };

    tracing::info!(
        take_home_id = %take_home.id(),
        patient_id = %take_home.patient_id,
        doses = take_home.doses,
        start = %take_home.start_date,
        "Take-home doses dispensed"
    );
    audit::log_operation_success(
        &audit_ctx,
        Operation::Create,
        TakeHome::COLLECTION,
        Some(take_home.id()),
        Some(take_home.version()),
        &state.audit,
    );
    Ok(response_with_etag(
        StatusCode::CREATED,
        to_json(&take_home)?,
        take_home.version(),
    ))
}

/// GET /api/take-homes
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TakeHomeQuery>,
) -> Result<Json<Value>, ApiError> {
    let mut take_homes: Vec<TakeHome> = state.store.fetch_all().map_err(store_failure)?;
    take_homes.retain(|t| {
        query.patient_id.as_deref().is_none_or(|p| t.patient_id == p)
            && query.status.is_none_or(|s| t.status == s)
    });
    take_homes.sort_by(|a, b| b.start_date.cmp(&a.start_date));
    list_response(&take_homes)
}

/// GET /api/take-homes/{id}
pub async fn read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let take_home: TakeHome = state.store.require(&id).map_err(store_failure)?;

    audit::log_operation_success(
        &audit_ctx,
        Operation::Read,
        TakeHome::COLLECTION,
        Some(&id),
        None,
        &state.audit,
    );
    Ok(response_with_etag(
        StatusCode::OK,
        to_json(&take_home)?,
        take_home.version(),
    ))
}

/// POST /api/take-homes/{id}/return
pub async fn record_return(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let (_, check): (_, ReturnCheck) = extract_body(request).await?;

    let mut take_home: TakeHome = state.store.require(&id).map_err(store_failure)?;
    take_home.record_return(check).map_err(reject)?;

    if take_home.status == TakeHomeStatus::PartiallyReturned {
        tracing::warn!(
            take_home_id = %id,
            patient_id = %take_home.patient_id,
            returned = take_home.bottles_returned.len(),
            dispensed = take_home.bottle_numbers.len(),
            "Take-home bottles missing at return check"
        );
    }
    save_update(&state, &mut take_home, None, &audit_ctx)
}

/// POST /api/take-homes/{id}/lost
pub async fn mark_lost(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let (_, report): (_, LossReport) = extract_body(request).await?;

    let mut take_home: TakeHome = state.store.require(&id).map_err(store_failure)?;
    take_home.mark_lost(report.notes).map_err(reject)?;

    tracing::warn!(
        take_home_id = %id,
        patient_id = %take_home.patient_id,
        "Take-home supply reported lost"
    );
    save_update(&state, &mut take_home, None, &audit_ctx)
}
