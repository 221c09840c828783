//! Research study endpoints
//!
//! Create and update both run the study rules in `harbor_core::study`;
//! the response carries every field the rules adjusted beyond what the
//! request asked for.

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    response::{Json, Response},
};
use chrono::Utc;
use harbor_core::{Record, RecordMeta, Study, StudyPatch, StudyStatus, StudyUpdate};
use harbor_store::{Operation, StoreError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{
    delete_record, extract_body, if_match, list_response, reject, response_with_etag,
    store_failure, to_json, ApiError,
};
use crate::audit::{self, AuditContext};
use crate::webhook::WebhookEvent;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct StudyQuery {
    pub status: Option<StudyStatus>,
}

fn announce_status_change(state: &AppState, update: &StudyUpdate, previous: Option<StudyStatus>) {
    let study = &update.study;
    tracing::info!(
        study_id = %study.id(),
        from = previous.map(|s| s.as_str()).unwrap_or("-"),
        to = study.status.as_str(),
        irb_status = study.irb_status.as_str(),
        "Study status changed"
    );
    state.webhooks.trigger(
        WebhookEvent::StudyStatusChanged,
        json!({
            "event": WebhookEvent::StudyStatusChanged.as_str(),
            "study_id": study.id(),
            "title": study.title,
            "previous_status": previous,
            "status": study.status,
            "adjustments": update.adjustments,
        }),
    );
}

fn update_response(status: StatusCode, update: &StudyUpdate) -> Result<Response, ApiError> {
    Ok(response_with_etag(status, to_json(update)?, update.study.version()))
}

/// POST /api/research/studies
pub async fn create(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let (_, patch): (_, StudyPatch) = extract_body(request).await?;

    let draft = Study::draft(RecordMeta::new(Utc::now()));
    let update = match patch.apply(&draft, state.config.today()) {
        Ok(update) => update,
        Err(e) => {
            audit::log_operation_error(
                &audit_ctx,
                Operation::Create,
                Study::COLLECTION,
                None,
                &e.to_string(),
                &state.audit,
            );
            return Err(reject(e));
        }
    };
    state.store.insert(&update.study).map_err(store_failure)?;

    if update.study.status != StudyStatus::Planning {
        announce_status_change(&state, &update, None);
    }
    audit::log_operation_success(
        &audit_ctx,
        Operation::Create,
        Study::COLLECTION,
        Some(update.study.id()),
        Some(update.study.version()),
        &state.audit,
    );
    update_response(StatusCode::CREATED, &update)
}

/// GET /api/research/studies
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StudyQuery>,
) -> Result<Json<Value>, ApiError> {
    let mut studies: Vec<Study> = state.store.fetch_all().map_err(store_failure)?;
    studies.retain(|s| query.status.is_none_or(|status| s.status == status));
    studies.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase()));
    list_response(&studies)
}

/// GET /api/research/studies/{id}
pub async fn read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let study: Study = state.store.require(&id).map_err(store_failure)?;

    audit::log_operation_success(
        &audit_ctx,
        Operation::Read,
        Study::COLLECTION,
        Some(&id),
        None,
        &state.audit,
    );
    Ok(response_with_etag(StatusCode::OK, to_json(&study)?, study.version()))
}

/// PATCH /api/research/studies/{id}
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let (headers, patch): (_, StudyPatch) = extract_body(request).await?;
    let expected = if_match(&headers)?;

    let existing: Study = state.store.require(&id).map_err(store_failure)?;
    // Rules are only meaningful against the version the client saw
    if let Some(expected) = expected
        && expected != existing.version()
    {
        return Err(store_failure(StoreError::VersionConflict {
            collection: Study::COLLECTION.to_string(),
            id,
            expected,
            current: existing.version(),
        }));
    }
    let mut update = match patch.apply(&existing, state.config.today()) {
        Ok(update) => update,
        Err(e) => {
            audit::log_operation_error(
                &audit_ctx,
                Operation::Update,
                Study::COLLECTION,
                Some(&id),
                &e.to_string(),
                &state.audit,
            );
            return Err(reject(e));
        }
    };

    update.study.meta.touch(Utc::now());
    state
        .store
        .replace(&mut update.study, expected)
        .map_err(store_failure)?;

    if update.status_changed(existing.status) {
        announce_status_change(&state, &update, Some(existing.status));
    }
    audit::log_operation_success(
        &audit_ctx,
        Operation::Update,
        Study::COLLECTION,
        Some(&id),
        Some(update.study.version()),
        &state.audit,
    );
    update_response(StatusCode::OK, &update)
}

/// DELETE /api/research/studies/{id}
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<StatusCode, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    delete_record::<Study>(&state, &id, &audit_ctx)
}
