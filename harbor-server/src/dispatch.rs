//! Patient reminder delivery
//!
//! A pass sends every pending reminder whose `due_at` has arrived to the
//! webhook endpoints subscribed to `ReminderDue`. Delivery failures count
//! against the reminder's attempt budget.

use chrono::{DateTime, Utc};
use harbor_core::{Patient, Record, Reminder, ReminderStatus};
use harbor_store::{Operation, StoreError};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::audit::{self, AuditContext};
use crate::webhook::WebhookEvent;
use crate::AppState;

/// Counts from one dispatch pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    /// Pending reminders whose time had come
    pub due: usize,
    pub sent: usize,
    /// Failed this pass but will be tried again
    pub retrying: usize,
    /// Out of attempts
    pub failed: usize,
    /// Left as stored: nothing subscribed, or the reminder was edited
    /// while its delivery was in flight
    pub skipped: usize,
}

/// Run one dispatch pass at `now`
pub async fn run_pass(state: &AppState, now: DateTime<Utc>) -> harbor_store::Result<DispatchSummary> {
    let mut due: Vec<Reminder> = state.store.fetch_all()?;
    due.retain(|r| r.is_due(now));
    due.sort_by_key(|r| r.due_at);

    let mut summary = DispatchSummary {
        due: due.len(),
        ..Default::default()
    };
    if due.is_empty() {
        return Ok(summary);
    }

    if state.webhooks.subscribers(WebhookEvent::ReminderDue).is_empty() {
        tracing::debug!(due = due.len(), "No ReminderDue endpoint; reminders left pending");
        summary.skipped = due.len();
        return Ok(summary);
    }

    let system = AuditContext::system();
    for mut reminder in due {
        let patient: Option<Patient> = state.store.fetch(&reminder.patient_id)?;
        let payload = json!({
            "event": WebhookEvent::ReminderDue.as_str(),
            "reminder": reminder,
            "patient": patient.map(|p| json!({
                "id": p.meta.id,
                "name": p.display_name(),
                "phone": p.phone,
                "email": p.email,
            })),
        });

        match state.webhooks.deliver(WebhookEvent::ReminderDue, &payload).await {
            Ok(_) => reminder.mark_sent(now),
            Err(e) => reminder.mark_failed(e),
        }

        reminder.meta.touch(now);
        match state.store.replace(&mut reminder, None) {
            Ok(()) => {
                match reminder.status {
                    ReminderStatus::Sent => summary.sent += 1,
                    ReminderStatus::Failed => {
                        tracing::warn!(
                            reminder_id = %reminder.id(),
                            attempts = reminder.attempts,
                            "Reminder delivery gave up"
                        );
                        summary.failed += 1;
                    }
                    _ => summary.retrying += 1,
                }
                audit::log_operation_success(
                    &system,
                    Operation::Dispatch,
                    Reminder::COLLECTION,
                    Some(reminder.id()),
                    Some(reminder.version()),
                    &state.audit,
                );
            }
            Err(StoreError::VersionConflict { .. }) => {
                tracing::warn!(
                    reminder_id = %reminder.id(),
                    "Reminder changed during dispatch; delivery result not recorded"
                );
                summary.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(summary)
}

/// Run a pass every `reminders.poll_interval_secs` until the runtime stops
pub fn spawn_dispatcher(state: Arc<AppState>) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.reminders.poll_interval_secs.max(1));
    tracing::info!(interval_secs = period.as_secs(), "Reminder dispatcher started");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match run_pass(&state, Utc::now()).await {
                Ok(summary) if summary.due > 0 => tracing::info!(
                    due = summary.due,
                    sent = summary.sent,
                    retrying = summary.retrying,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "Reminder dispatch pass"
                ),
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Reminder dispatch pass failed"),
            }
        }
    })
}
