//! Clinic dashboard summary
//!
//! GET /api/dashboard: JSON counts for the front desk and the clinic
//! manager, plus recent audit activity.

use crate::handlers::{store_failure, ApiError};
use crate::AppState;

use axum::{extract::State, Json};
use chrono::{Duration, Utc};
use harbor_core::{
    Appointment, Dea222Order, IrbStatus, Reminder, ReminderStatus, Study, StudyStatus, TakeHome,
};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Studies whose IRB approval lapses within this many days are flagged
const IRB_WARNING_DAYS: i64 = 30;
const RECENT_ACTIVITY: usize = 20;

/// GET /api/dashboard
pub async fn summary(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let now = Utc::now();
    let today = state.config.clinic_date(now);
    let offset = state.config.clinic_offset();

    // Today's schedule by status
    let appointments: Vec<Appointment> = state.store.fetch_all().map_err(store_failure)?;
    let mut by_status: BTreeMap<&'static str, usize> = BTreeMap::new();
    for appointment in appointments.iter().filter(|a| a.local_date(offset) == today) {
        *by_status.entry(appointment.status.as_str()).or_default() += 1;
    }
    let appointments_today: usize = by_status.values().sum();

    let reminders: Vec<Reminder> = state.store.fetch_all().map_err(store_failure)?;
    let reminders_pending = reminders
        .iter()
        .filter(|r| r.status == ReminderStatus::Pending)
        .count();
    let reminders_due = reminders.iter().filter(|r| r.is_due(now)).count();
    let reminders_failed = reminders
        .iter()
        .filter(|r| r.status == ReminderStatus::Failed)
        .count();

    let orders: Vec<Dea222Order> = state.store.fetch_all().map_err(store_failure)?;
    let open_orders = orders.iter().filter(|o| o.status.is_open()).count();

    let take_homes: Vec<TakeHome> = state.store.fetch_all().map_err(store_failure)?;
    let outstanding_take_homes = take_homes.iter().filter(|t| t.is_outstanding()).count();

    let studies: Vec<Study> = state.store.fetch_all().map_err(store_failure)?;
    let active_studies = studies
        .iter()
        .filter(|s| s.status == StudyStatus::Active)
        .count();
    let warn_before = today + Duration::days(IRB_WARNING_DAYS);
    let irb_expiring: Vec<Value> = studies
        .iter()
        .filter(|s| s.irb_status == IrbStatus::Approved && !s.status.is_closed())
        .filter_map(|s| {
            let expires = s.irb_expiration_date?;
            (expires <= warn_before).then(|| {
                json!({
                    "id": s.meta.id,
                    "title": s.title,
                    "irb_expiration_date": expires,
                })
            })
        })
        .collect();

    let record_counts: Map<String, Value> = state
        .store
        .count_by_collection()
        .map_err(store_failure)?
        .into_iter()
        .map(|(collection, count)| (collection, json!(count)))
        .collect();

    // Recent audit log entries
    let recent = state
        .audit
        .lock()
        .await
        .recent_entries(RECENT_ACTIVITY)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not read recent audit entries");
            Vec::new()
        });

    Ok(Json(json!({
        "clinic": state.config.clinic.name,
        "today": today,
        "version": env!("CARGO_PKG_VERSION"),
        "appointments_today": {
            "total": appointments_today,
            "by_status": by_status,
        },
        "reminders": {
            "pending": reminders_pending,
            "due": reminders_due,
            "failed": reminders_failed,
        },
        "dea222_open_orders": open_orders,
        "take_homes_outstanding": outstanding_take_homes,
        "studies": {
            "active": active_studies,
            "irb_expiring": irb_expiring,
        },
        "record_counts": record_counts,
        "recent_activity": recent,
    })))
}
