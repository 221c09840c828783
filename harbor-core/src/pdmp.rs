use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HarborError, Result};
use crate::impl_record;
use crate::record::RecordMeta;
use crate::validation::{check_state_code, check_timestamp, optional_text, require_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupReason {
    NewPatient,
    Prescription,
    Periodic,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupResult {
    NoFindings,
    Findings,
    Unavailable,
}

/// A prescription drug monitoring program query made for a patient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdmpLookup {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub patient_id: String,
    pub requested_by: String,
    pub state: String,
    pub queried_at: DateTime<Utc>,
    pub reason: LookupReason,
    pub result: LookupResult,
    pub findings_summary: Option<String>,
    pub report_reference: Option<String>,
}

impl_record!(PdmpLookup, "pdmp_lookups");

impl PdmpLookup {
    /// A completed lookup newer than `max_age_days`
    pub fn is_current(&self, now: DateTime<Utc>, max_age_days: u32) -> bool {
        self.result != LookupResult::Unavailable
            && now - self.queried_at <= Duration::days(i64::from(max_age_days))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewPdmpLookup {
    pub patient_id: String,
    pub requested_by: String,
    pub state: String,
    #[serde(default)]
    pub queried_at: Option<DateTime<Utc>>,
    pub reason: LookupReason,
    pub result: LookupResult,
    #[serde(default)]
    pub findings_summary: Option<String>,
    #[serde(default)]
    pub report_reference: Option<String>,
}

impl NewPdmpLookup {
    pub fn into_lookup(self, meta: RecordMeta, now: DateTime<Utc>) -> Result<PdmpLookup> {
        let queried_at = check_timestamp("queried_at", self.queried_at.unwrap_or(now))?;
        if queried_at > now {
            return Err(HarborError::validation("queried_at", "is in the future"));
        }
        let findings_summary = optional_text(self.findings_summary);
        if self.result == LookupResult::Findings && findings_summary.is_none() {
            return Err(HarborError::validation(
                "findings_summary",
                "is required when the lookup has findings",
            ));
        }
        Ok(PdmpLookup {
            meta,
            patient_id: require_text("patient_id", &self.patient_id)?,
            requested_by: require_text("requested_by", &self.requested_by)?,
            state: check_state_code("state", &self.state)?,
            queried_at,
            reason: self.reason,
            result: self.result,
            findings_summary,
            report_reference: optional_text(self.report_reference),
        })
    }
}

/// Summary of a patient's lookup history
#[derive(Debug, Clone, Serialize)]
pub struct PdmpStatus {
    pub patient_id: String,
    pub current: bool,
    pub latest: Option<PdmpLookup>,
    pub max_age_days: u32,
}

impl PdmpStatus {
    pub fn from_lookups(
        patient_id: &str,
        lookups: Vec<PdmpLookup>,
        now: DateTime<Utc>,
        max_age_days: u32,
    ) -> Self {
        let current = lookups.iter().any(|l| l.is_current(now, max_age_days));
        let latest = lookups.into_iter().max_by_key(|l| l.queried_at);
        Self {
            patient_id: patient_id.to_string(),
            current,
            latest,
            max_age_days,
        }
    }
}
