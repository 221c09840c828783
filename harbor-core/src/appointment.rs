use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HarborError, Result};
use crate::impl_record;
use crate::patch::{merge, nullable};
use crate::record::RecordMeta;
use crate::validation::{check_timestamp, optional_text, require_text};

const MIN_DURATION_MINUTES: u32 = 5;
const MAX_DURATION_MINUTES: u32 = 480;
const DEFAULT_DURATION_MINUTES: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentKind {
    Intake,
    Dosing,
    Counseling,
    FollowUp,
    Group,
    Telehealth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    CheckedIn,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::CheckedIn => "checked_in",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    /// Whether an appointment in this state holds its time slot
    pub fn occupies_slot(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::NoShow)
    }

    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Scheduled, CheckedIn)
                | (Scheduled, Cancelled)
                | (Scheduled, NoShow)
                | (CheckedIn, Completed)
                | (CheckedIn, Cancelled)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub patient_id: String,
    pub provider: String,
    pub starts_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub kind: AppointmentKind,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}

impl_record!(Appointment, "appointments");

impl Appointment {
    pub fn ends_at(&self) -> DateTime<Utc> {
        self.starts_at
            .checked_add_signed(Duration::minutes(i64::from(self.duration_minutes)))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Calendar date of the start time at the clinic's offset
    pub fn local_date(&self, offset: FixedOffset) -> NaiveDate {
        self.starts_at.with_timezone(&offset).date_naive()
    }

    /// Same provider, both holding their slot, and the time ranges intersect
    pub fn conflicts_with(&self, other: &Appointment) -> bool {
        self.meta.id != other.meta.id
            && self.status.occupies_slot()
            && other.status.occupies_slot()
            && self.provider.eq_ignore_ascii_case(&other.provider)
            && self.starts_at < other.ends_at()
            && other.starts_at < self.ends_at()
    }
}

fn check_duration(minutes: u32) -> Result<u32> {
    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&minutes) {
        return Err(HarborError::validation(
            "duration_minutes",
            format!(
                "must be between {} and {} minutes",
                MIN_DURATION_MINUTES, MAX_DURATION_MINUTES
            ),
        ));
    }
    Ok(minutes)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewAppointment {
    pub patient_id: String,
    pub provider: String,
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    pub kind: AppointmentKind,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewAppointment {
    pub fn into_appointment(self, meta: RecordMeta) -> Result<Appointment> {
        Ok(Appointment {
            meta,
            patient_id: require_text("patient_id", &self.patient_id)?,
            provider: require_text("provider", &self.provider)?,
            starts_at: check_timestamp("starts_at", self.starts_at)?,
            duration_minutes: check_duration(
                self.duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES),
            )?,
            kind: self.kind,
            status: AppointmentStatus::Scheduled,
            notes: optional_text(self.notes),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppointmentPatch {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub kind: Option<AppointmentKind>,
    #[serde(default)]
    pub status: Option<AppointmentStatus>,
    #[serde(default, deserialize_with = "nullable")]
    pub notes: Option<Option<String>>,
}

impl AppointmentPatch {
    /// Whether the patch moves the appointment in time or to another provider
    pub fn reschedules(&self) -> bool {
        self.provider.is_some() || self.starts_at.is_some() || self.duration_minutes.is_some()
    }

    pub fn apply(self, existing: &Appointment) -> Result<Appointment> {
        let mut appointment = existing.clone();

        if self.reschedules() && existing.status.is_terminal() {
            return Err(HarborError::record_rule(format!(
                "a {} appointment cannot be rescheduled",
                existing.status.as_str()
            )));
        }

        if let Some(provider) = self.provider {
            appointment.provider = require_text("provider", &provider)?;
        }
        if let Some(starts_at) = self.starts_at {
            appointment.starts_at = check_timestamp("starts_at", starts_at)?;
        }
        if let Some(minutes) = self.duration_minutes {
            appointment.duration_minutes = check_duration(minutes)?;
        }
        if let Some(kind) = self.kind {
            appointment.kind = kind;
        }
        appointment.notes = optional_text(merge(appointment.notes, self.notes));

        if let Some(next) = self.status
            && next != existing.status
        {
            if !existing.status.can_transition_to(next) {
                return Err(HarborError::rule(
                    "status",
                    format!(
                        "cannot move an appointment from {} to {}",
                        existing.status.as_str(),
                        next.as_str()
                    ),
                ));
            }
            appointment.status = next;
        }

        Ok(appointment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn appointment(provider: &str, start: &str, minutes: u32) -> Appointment {
        let input: NewAppointment = serde_json::from_value(json!({
            "patient_id": "p1",
            "provider": provider,
            "starts_at": start,
            "duration_minutes": minutes,
            "kind": "counseling"
        }))
        .unwrap();
        input.into_appointment(RecordMeta::new(Utc::now())).unwrap()
    }

    #[test]
    fn test_default_duration() {
        let input: NewAppointment = serde_json::from_value(json!({
            "patient_id": "p1",
            "provider": "Dr. Reyes",
            "starts_at": "2024-06-15T09:00:00Z",
            "kind": "intake"
        }))
        .unwrap();
        let appt = input.into_appointment(RecordMeta::new(Utc::now())).unwrap();
        assert_eq!(appt.duration_minutes, 30);
        assert_eq!(appt.status, AppointmentStatus::Scheduled);
        assert_eq!(appt.ends_at(), at("2024-06-15T09:30:00Z"));
    }

    #[test]
    fn test_duration_bounds() {
        let input: NewAppointment = serde_json::from_value(json!({
            "patient_id": "p1",
            "provider": "Dr. Reyes",
            "starts_at": "2024-06-15T09:00:00Z",
            "duration_minutes": 600,
            "kind": "intake"
        }))
        .unwrap();
        assert!(input.into_appointment(RecordMeta::new(Utc::now())).is_err());
    }

    #[test]
    fn test_far_future_start_rejected() {
        let input: NewAppointment = serde_json::from_value(json!({
            "patient_id": "p1",
            "provider": "Dr. Reyes",
            "starts_at": "+262142-12-31T23:59:00Z",
            "kind": "intake"
        }))
        .unwrap();
        let err = input
            .into_appointment(RecordMeta::new(Utc::now()))
            .unwrap_err();
        assert_eq!(err.field(), Some("starts_at"));

        let existing = appointment("Dr. Reyes", "2024-06-15T09:00:00Z", 30);
        let patch: AppointmentPatch =
            serde_json::from_value(json!({"starts_at": "+262142-12-31T23:59:00Z"})).unwrap();
        assert!(patch.apply(&existing).is_err());
    }

    #[test]
    fn test_end_time_saturates_at_calendar_limit() {
        let mut appt = appointment("Dr. Reyes", "2024-06-15T09:00:00Z", 30);
        appt.starts_at = DateTime::<Utc>::MAX_UTC;
        assert_eq!(appt.ends_at(), DateTime::<Utc>::MAX_UTC);
        let other = appointment("Dr. Reyes", "2030-01-01T09:00:00Z", 30);
        assert!(!other.conflicts_with(&appt));
    }

    #[test]
    fn test_offset_start_times_normalize() {
        let appt = appointment("Dr. Reyes", "2024-06-15T09:00:00-04:00", 30);
        assert_eq!(appt.starts_at, at("2024-06-15T13:00:00Z"));
    }

    #[test]
    fn test_overlap_same_provider() {
        let a = appointment("Dr. Reyes", "2024-06-15T09:00:00Z", 60);
        let b = appointment("dr. reyes", "2024-06-15T09:30:00Z", 30);
        assert!(a.conflicts_with(&b));
        assert!(b.conflicts_with(&a));
    }

    #[test]
    fn test_back_to_back_is_not_overlap() {
        let a = appointment("Dr. Reyes", "2024-06-15T09:00:00Z", 30);
        let b = appointment("Dr. Reyes", "2024-06-15T09:30:00Z", 30);
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn test_other_provider_or_cancelled_is_not_overlap() {
        let a = appointment("Dr. Reyes", "2024-06-15T09:00:00Z", 60);
        let b = appointment("Dr. Chen", "2024-06-15T09:00:00Z", 60);
        assert!(!a.conflicts_with(&b));

        let mut c = appointment("Dr. Reyes", "2024-06-15T09:00:00Z", 60);
        c.status = AppointmentStatus::Cancelled;
        assert!(!a.conflicts_with(&c));
    }

    #[test]
    fn test_local_date_uses_offset() {
        let appt = appointment("Dr. Reyes", "2024-06-16T02:00:00Z", 30);
        let eastern = FixedOffset::west_opt(4 * 3600).unwrap();
        assert_eq!(appt.local_date(eastern), NaiveDate::from_ymd_opt(2024, 6, 15).unwrap());
    }

    #[test]
    fn test_status_transitions() {
        let appt = appointment("Dr. Reyes", "2024-06-15T09:00:00Z", 30);
        let checked_in: AppointmentPatch =
            serde_json::from_value(json!({"status": "checked_in"})).unwrap();
        let appt = checked_in.apply(&appt).unwrap();
        assert_eq!(appt.status, AppointmentStatus::CheckedIn);

        let no_show: AppointmentPatch =
            serde_json::from_value(json!({"status": "no_show"})).unwrap();
        assert!(no_show.apply(&appt).is_err());

        let completed: AppointmentPatch =
            serde_json::from_value(json!({"status": "completed"})).unwrap();
        let appt = completed.apply(&appt).unwrap();

        let reopen: AppointmentPatch =
            serde_json::from_value(json!({"status": "scheduled"})).unwrap();
        assert!(reopen.apply(&appt).is_err());
    }

    #[test]
    fn test_terminal_appointment_cannot_be_rescheduled() {
        let mut appt = appointment("Dr. Reyes", "2024-06-15T09:00:00Z", 30);
        appt.status = AppointmentStatus::Cancelled;
        let patch: AppointmentPatch =
            serde_json::from_value(json!({"starts_at": "2024-06-16T09:00:00Z"})).unwrap();
        assert!(matches!(
            patch.apply(&appt),
            Err(HarborError::BusinessRule { .. })
        ));
    }

    #[test]
    fn test_notes_only_patch_on_terminal_appointment() {
        let mut appt = appointment("Dr. Reyes", "2024-06-15T09:00:00Z", 30);
        appt.status = AppointmentStatus::Completed;
        let patch: AppointmentPatch =
            serde_json::from_value(json!({"notes": "left early"})).unwrap();
        assert_eq!(patch.apply(&appt).unwrap().notes.as_deref(), Some("left early"));
    }
}
