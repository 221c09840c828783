use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    response::{Json, Response},
};
use chrono::{DateTime, Utc};
use harbor_core::{
    Appointment, HarborError, NewReminder, Record, RecordMeta, Reminder, ReminderPatch,
    ReminderStatus,
};
use harbor_store::Operation;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::{
    extract_body, if_match, list_response, reject, require_patient, response_with_etag,
    save_update, store_failure, to_json, ApiError,
};
use crate::audit::{self, AuditContext};
use crate::dispatch::{self, DispatchSummary};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ReminderQuery {
    pub status: Option<ReminderStatus>,
    pub patient_id: Option<String>,
    pub due_before: Option<DateTime<Utc>>,
}

fn check_appointment(state: &AppState, appointment_id: Option<&str>) -> Result<(), ApiError> {
    if let Some(id) = appointment_id
        && state
            .store
            .fetch::<Appointment>(id)
            .map_err(store_failure)?
            .is_none()
    {
        return Err(reject(HarborError::rule(
            "appointment_id",
            format!("no appointment with id {}", id),
        )));
    }
    Ok(())
}

/// POST /api/reminders
pub async fn create(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let (_, body): (_, NewReminder) = extract_body(request).await?;

    require_patient(&state, &body.patient_id)?;
    let reminder = body
        .into_reminder(RecordMeta::new(Utc::now()))
        .map_err(reject)?;
    check_appointment(&state, reminder.appointment_id.as_deref())?;
    state.store.insert(&reminder).map_err(store_failure)?;

    audit::log_operation_success(
        &audit_ctx,
        Operation::Create,
        Reminder::COLLECTION,
        Some(reminder.id()),
        Some(reminder.version()),
        &state.audit,
    );
    Ok(response_with_etag(StatusCode::CREATED, to_json(&reminder)?, reminder.version()))
}

/// GET /api/reminders
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReminderQuery>,
) -> Result<Json<Value>, ApiError> {
    let mut reminders: Vec<Reminder> = state.store.fetch_all().map_err(store_failure)?;
    reminders.retain(|r| {
        query.status.is_none_or(|s| r.status == s)
            && query.patient_id.as_deref().is_none_or(|p| r.patient_id == p)
            && query.due_before.is_none_or(|t| r.due_at <= t)
    });
    reminders.sort_by_key(|r| r.due_at);
    list_response(&reminders)
}

/// GET /api/reminders/{id}
pub async fn read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let reminder: Reminder = state.store.require(&id).map_err(store_failure)?;

    audit::log_operation_success(
        &audit_ctx,
        Operation::Read,
        Reminder::COLLECTION,
        Some(&id),
        None,
        &state.audit,
    );
    Ok(response_with_etag(StatusCode::OK, to_json(&reminder)?, reminder.version()))
}

/// PATCH /api/reminders/{id}
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let (headers, patch): (_, ReminderPatch) = extract_body(request).await?;
    let expected = if_match(&headers)?;

    let existing: Reminder = state.store.require(&id).map_err(store_failure)?;
    let mut reminder = patch.apply(&existing).map_err(reject)?;
    if reminder.appointment_id != existing.appointment_id {
        check_appointment(&state, reminder.appointment_id.as_deref())?;
    }
    save_update(&state, &mut reminder, expected, &audit_ctx)
}

/// POST /api/reminders/{id}/cancel
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let mut reminder: Reminder = state.store.require(&id).map_err(store_failure)?;
    reminder.cancel().map_err(reject)?;
    save_update(&state, &mut reminder, None, &audit_ctx)
}

/// POST /api/reminders/dispatch
pub async fn dispatch(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DispatchSummary>, ApiError> {
    let summary = dispatch::run_pass(&state, Utc::now())
        .await
        .map_err(store_failure)?;
    Ok(Json(summary))
}
