use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::Json,
};
use harbor_core::{assistant::ChatRequest, HarborError, IssueCode, Outcome, Patient};
use harbor_store::Operation;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{extract_body, reject, store_failure, ApiError};
use crate::assistant::RelayError;
use crate::audit::{self, AuditContext};
use crate::AppState;

const AUDIT_COLLECTION: &str = "assistant";

fn patient_context(patient: &Patient) -> String {
    let mut context = format!("Current patient: {}", patient.display_name());
    if let Some(dob) = patient.date_of_birth {
        context.push_str(&format!(", born {}", dob));
    }
    if let Some(mrn) = &patient.mrn {
        context.push_str(&format!(", MRN {}", mrn));
    }
    context
}

/// POST /api/assistant/chat
pub async fn chat(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<Value>, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let (_, body): (_, ChatRequest) = extract_body(request).await?;
    body.validate().map_err(reject)?;

    if !state.assistant.is_configured() {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!(Outcome::new(
                IssueCode::NotSupported,
                RelayError::NotConfigured.to_string()
            ))),
        ));
    }

    let context = match body.patient_id.as_deref() {
        Some(patient_id) => {
            let patient: Patient = state
                .store
                .fetch(patient_id)
                .map_err(store_failure)?
                .ok_or_else(|| reject(HarborError::not_found("patients", patient_id)))?;
            Some(patient_context(&patient))
        }
        None => None,
    };

    // Message content never reaches the audit log
    match state.assistant.relay(&body.messages, context.as_deref()).await {
        Ok(reply) => {
            audit::log_operation_success(
                &audit_ctx,
                Operation::Relay,
                AUDIT_COLLECTION,
                body.patient_id.as_deref(),
                None,
                &state.audit,
            );
            Ok(Json(json!({ "reply": reply })))
        }
        Err(e) => {
            audit::log_operation_error(
                &audit_ctx,
                Operation::Relay,
                AUDIT_COLLECTION,
                body.patient_id.as_deref(),
                &e.to_string(),
                &state.audit,
            );
            let status = match e {
                RelayError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
                RelayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            };
            Err((status, Json(json!(Outcome::upstream(e.to_string())))))
        }
    }
}
