use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    response::{Json, Response},
};
use chrono::Utc;
use harbor_core::{
    validation::parse_date, Appointment, AppointmentPatch, AppointmentStatus, HarborError,
    NewAppointment, Record, RecordMeta,
};
use harbor_store::{Operation, TransactionOps};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::{
    delete_record, extract_body, if_match, list_response, reject, require_patient,
    response_with_etag, store_failure, to_json, ApiError,
};
use crate::audit::{self, AuditContext};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct AppointmentQuery {
    /// Clinic-local day, YYYY-MM-DD
    pub date: Option<String>,
    pub provider: Option<String>,
    pub patient_id: Option<String>,
    pub status: Option<AppointmentStatus>,
}

/// Refuse `candidate` when it overlaps another booking of the same provider
fn check_slot(ops: &TransactionOps<'_>, candidate: &Appointment) -> harbor_store::Result<()> {
    let booked: Vec<Appointment> = ops.fetch_all()?;
    if let Some(clash) = booked.iter().find(|a| candidate.conflicts_with(a)) {
        return Err(HarborError::conflict(format!(
            "{} already has appointment {} from {} to {}",
            clash.provider,
            clash.id(),
            clash.starts_at.to_rfc3339(),
            clash.ends_at().to_rfc3339()
        ))
        .into());
    }
    Ok(())
}

/// POST /api/appointments
pub async fn create(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let (_, body): (_, NewAppointment) = extract_body(request).await?;

    require_patient(&state, &body.patient_id)?;
    let appointment = body
        .into_appointment(RecordMeta::new(Utc::now()))
        .map_err(reject)?;

    state
        .store
        .in_transaction(|ops| {
            check_slot(ops, &appointment)?;
            ops.insert(&appointment)
        })
        .map_err(store_failure)?;

    audit::log_operation_success(
        &audit_ctx,
        Operation::Create,
        Appointment::COLLECTION,
        Some(appointment.id()),
        Some(appointment.version()),
        &state.audit,
    );
    Ok(response_with_etag(
        StatusCode::CREATED,
        to_json(&appointment)?,
        appointment.version(),
    ))
}

/// GET /api/appointments
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AppointmentQuery>,
) -> Result<Json<Value>, ApiError> {
    let date = query
        .date
        .as_deref()
        .map(|d| parse_date("date", d))
        .transpose()
        .map_err(reject)?;
    let offset = state.config.clinic_offset();

    let mut appointments: Vec<Appointment> = state.store.fetch_all().map_err(store_failure)?;
    appointments.retain(|a| {
        date.is_none_or(|d| a.local_date(offset) == d)
            && query
                .provider
                .as_deref()
                .is_none_or(|p| a.provider.eq_ignore_ascii_case(p))
            && query.patient_id.as_deref().is_none_or(|p| a.patient_id == p)
            && query.status.is_none_or(|s| a.status == s)
    });
    appointments.sort_by_key(|a| a.starts_at);
    list_response(&appointments)
}

/// GET /api/appointments/{id}
pub async fn read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let appointment: Appointment = state.store.require(&id).map_err(store_failure)?;

    audit::log_operation_success(
        &audit_ctx,
        Operation::Read,
        Appointment::COLLECTION,
        Some(&id),
        None,
        &state.audit,
    );
    Ok(response_with_etag(
        StatusCode::OK,
        to_json(&appointment)?,
        appointment.version(),
    ))
}

/// PATCH /api/appointments/{id}
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let (headers, patch): (_, AppointmentPatch) = extract_body(request).await?;
    let expected = if_match(&headers)?;

    let existing: Appointment = state.store.require(&id).map_err(store_failure)?;
    let reschedules = patch.reschedules();
    let mut appointment = patch.apply(&existing).map_err(reject)?;
    appointment.meta.touch(Utc::now());

    state
        .store
        .in_transaction(|ops| {
            if reschedules {
                check_slot(ops, &appointment)?;
            }
            ops.replace(&mut appointment, expected)
        })
        .map_err(store_failure)?;

    if appointment.status != existing.status {
        tracing::info!(
            appointment_id = %id,
            from = existing.status.as_str(),
            to = appointment.status.as_str(),
            "Appointment status changed"
        );
    }

    audit::log_operation_success(
        &audit_ctx,
        Operation::Update,
        Appointment::COLLECTION,
        Some(&id),
        Some(appointment.version()),
        &state.audit,
    );
    Ok(response_with_etag(
        StatusCode::OK,
        to_json(&appointment)?,
        appointment.version(),
    ))
}

/// DELETE /api/appointments/{id}
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<StatusCode, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    delete_record::<Appointment>(&state, &id, &audit_ctx)
}
