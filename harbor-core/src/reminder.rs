use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HarborError, Result};
use crate::impl_record;
use crate::patch::{merge, nullable};
use crate::record::RecordMeta;
use crate::validation::{check_length, check_timestamp, optional_text, require_text};

/// Delivery attempts before a reminder is given up on
pub const MAX_ATTEMPTS: u32 = 3;

const MAX_MESSAGE_CHARS: usize = 480;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Email,
    Phone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    Pending,
    Sent,
    Cancelled,
    Failed,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Pending => "pending",
            ReminderStatus::Sent => "sent",
            ReminderStatus::Cancelled => "cancelled",
            ReminderStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub patient_id: String,
    pub appointment_id: Option<String>,
    pub channel: Channel,
    pub message: String,
    pub due_at: DateTime<Utc>,
    pub status: ReminderStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl_record!(Reminder, "reminders");

impl Reminder {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ReminderStatus::Pending && self.due_at <= now
    }

    fn require_pending(&self, action: &str) -> Result<()> {
        if self.status != ReminderStatus::Pending {
            return Err(HarborError::record_rule(format!(
                "cannot {} a {} reminder",
                action,
                self.status.as_str()
            )));
        }
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.require_pending("cancel")?;
        self.status = ReminderStatus::Cancelled;
        Ok(())
    }

    pub fn mark_sent(&mut self, now: DateTime<Utc>) {
        self.attempts += 1;
        self.status = ReminderStatus::Sent;
        self.sent_at = Some(now);
        self.last_error = None;
    }

    /// Count a failed delivery; gives up after [`MAX_ATTEMPTS`].
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.attempts += 1;
        self.last_error = Some(error.into());
        if self.attempts >= MAX_ATTEMPTS {
            self.status = ReminderStatus::Failed;
        }
    }
}

fn check_message(message: &str) -> Result<String> {
    let message = require_text("message", message)?;
    check_length("message", &message, MAX_MESSAGE_CHARS)?;
    Ok(message)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewReminder {
    pub patient_id: String,
    #[serde(default)]
    pub appointment_id: Option<String>,
    pub channel: Channel,
    pub message: String,
    pub due_at: DateTime<Utc>,
}

impl NewReminder {
    pub fn into_reminder(self, meta: RecordMeta) -> Result<Reminder> {
        Ok(Reminder {
            meta,
            patient_id: require_text("patient_id", &self.patient_id)?,
            appointment_id: optional_text(self.appointment_id),
            channel: self.channel,
            message: check_message(&self.message)?,
            due_at: check_timestamp("due_at", self.due_at)?,
            status: ReminderStatus::Pending,
            sent_at: None,
            attempts: 0,
            last_error: None,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReminderPatch {
    #[serde(default)]
    pub channel: Option<Channel>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "nullable")]
    pub appointment_id: Option<Option<String>>,
}

impl ReminderPatch {
    pub fn apply(self, existing: &Reminder) -> Result<Reminder> {
        existing.require_pending("edit")?;
        let mut reminder = existing.clone();
        if let Some(channel) = self.channel {
            reminder.channel = channel;
        }
        if let Some(message) = self.message {
            reminder.message = check_message(&message)?;
        }
        if let Some(due_at) = self.due_at {
            reminder.due_at = check_timestamp("due_at", due_at)?;
        }
        reminder.appointment_id = optional_text(merge(reminder.appointment_id, self.appointment_id));
        Ok(reminder)
    }
}
