use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    response::{Json, Response},
};
use chrono::Utc;
use harbor_core::{
    Dea222Order, Dea222Patch, HarborError, NewDea222Order, OrderStatus, Receipt, Record,
    RecordMeta,
};
use harbor_store::Operation;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::{
    delete_record, extract_body, if_match, list_response, reject, response_with_etag,
    save_update, store_failure, to_json, ApiError,
};
use crate::audit::{self, AuditContext};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct OrderQuery {
    pub status: Option<OrderStatus>,
}

/// POST /api/dea222/orders
pub async fn create(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let (_, body): (_, NewDea222Order) = extract_body(request).await?;

    let order = body
        .into_order(RecordMeta::new(Utc::now()), state.config.today())
        .map_err(reject)?;

    // Form numbers are unique across all orders
    state
        .store
        .in_transaction(|ops| {
            let orders: Vec<Dea222Order> = ops.fetch_all()?;
            if orders.iter().any(|o| o.form_number == order.form_number) {
                return Err(HarborError::conflict(format!(
                    "form number {} is already recorded",
                    order.form_number
                ))
                .into());
            }
            ops.insert(&order)
        })
        .map_err(store_failure)?;

    audit::log_operation_success(
        &audit_ctx,
        Operation::Create,
        Dea222Order::COLLECTION,
        Some(order.id()),
        Some(order.version()),
        &state.audit,
    );
    Ok(response_with_etag(StatusCode::CREATED, to_json(&order)?, order.version()))
}

/// GET /api/dea222/orders
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OrderQuery>,
) -> Result<Json<Value>, ApiError> {
    let mut orders: Vec<Dea222Order> = state.store.fetch_all().map_err(store_failure)?;
    orders.retain(|o| query.status.is_none_or(|s| o.status == s));
    orders.sort_by(|a, b| {
        b.ordered_on
            .cmp(&a.ordered_on)
            .then_with(|| a.form_number.cmp(&b.form_number))
    });
    list_response(&orders)
}

/// GET /api/dea222/orders/{id}
pub async fn read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let order: Dea222Order = state.store.require(&id).map_err(store_failure)?;

    audit::log_operation_success(
        &audit_ctx,
        Operation::Read,
        Dea222Order::COLLECTION,
        Some(&id),
        None,
        &state.audit,
    );
    Ok(response_with_etag(StatusCode::OK, to_json(&order)?, order.version()))
}

/// PATCH /api/dea222/orders/{id}
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let (headers, patch): (_, Dea222Patch) = extract_body(request).await?;
    let expected = if_match(&headers)?;

    let existing: Dea222Order = state.store.require(&id).map_err(store_failure)?;
    let mut order = patch.apply(&existing).map_err(reject)?;
    save_update(&state, &mut order, expected, &audit_ctx)
}

/// POST /api/dea222/orders/{id}/submit
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let mut order: Dea222Order = state.store.require(&id).map_err(store_failure)?;
    order.submit(state.config.today()).map_err(reject)?;

    tracing::info!(
        order_id = %id,
        form_number = %order.form_number,
        lines = order.lines.len(),
        "DEA 222 order submitted"
    );
    save_update(&state, &mut order, None, &audit_ctx)
}

/// POST /api/dea222/orders/{id}/receive
pub async fn receive(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let (_, receipts): (_, Vec<Receipt>) = extract_body(request).await?;

    let mut order: Dea222Order = state.store.require(&id).map_err(store_failure)?;
    order
        .receive(&receipts, state.config.today())
        .map_err(reject)?;

    tracing::info!(
        order_id = %id,
        form_number = %order.form_number,
        status = order.status.as_str(),
        "DEA 222 packages received"
    );
    save_update(&state, &mut order, None, &audit_ctx)
}

/// POST /api/dea222/orders/{id}/cancel
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let mut order: Dea222Order = state.store.require(&id).map_err(store_failure)?;
    order.cancel().map_err(reject)?;
    save_update(&state, &mut order, None, &audit_ctx)
}

/// DELETE /api/dea222/orders/{id} (drafts only)
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<StatusCode, ApiError> {
    let audit_ctx = AuditContext::from_request(&request);
    let order: Dea222Order = state.store.require(&id).map_err(store_failure)?;
    if order.status != OrderStatus::Draft {
        return Err(reject(HarborError::record_rule(format!(
            "only draft orders can be deleted; this one is {}",
            order.status.as_str()
        ))));
    }
    delete_record::<Dea222Order>(&state, &id, &audit_ctx)
}
