use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{HarborError, Result};
use crate::impl_record;
use crate::patch::{merge, nullable};
use crate::record::RecordMeta;
use crate::validation::{check_email, optional_text, parse_date, require_text};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub mrn: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub active: bool,
}

impl_record!(Patient, "patients");

impl Patient {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Case-insensitive match on name or MRN
    pub fn matches(&self, needle: &str) -> bool {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.display_name().to_lowercase().contains(&needle)
            || self
                .mrn
                .as_deref()
                .is_some_and(|mrn| mrn.to_lowercase().contains(&needle))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewPatient {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub mrn: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

fn birth_date(value: &str, today: NaiveDate) -> Result<NaiveDate> {
    let dob = parse_date("date_of_birth", value)?;
    if dob > today {
        return Err(HarborError::validation("date_of_birth", "is in the future"));
    }
    Ok(dob)
}

impl NewPatient {
    pub fn into_patient(self, meta: RecordMeta, today: NaiveDate) -> Result<Patient> {
        Ok(Patient {
            meta,
            first_name: require_text("first_name", &self.first_name)?,
            last_name: require_text("last_name", &self.last_name)?,
            date_of_birth: optional_text(self.date_of_birth)
                .map(|d| birth_date(&d, today))
                .transpose()?,
            mrn: optional_text(self.mrn),
            phone: optional_text(self.phone),
            email: optional_text(self.email)
                .map(|e| check_email("email", &e))
                .transpose()?,
            active: true,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatientPatch {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub date_of_birth: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub mrn: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub email: Option<Option<String>>,
    #[serde(default)]
    pub active: Option<bool>,
}

impl PatientPatch {
    pub fn apply(self, existing: &Patient, today: NaiveDate) -> Result<Patient> {
        let mut patient = existing.clone();
        if let Some(first) = self.first_name {
            patient.first_name = require_text("first_name", &first)?;
        }
        if let Some(last) = self.last_name {
            patient.last_name = require_text("last_name", &last)?;
        }
        if let Some(dob) = self.date_of_birth {
            patient.date_of_birth = optional_text(dob)
                .map(|d| birth_date(&d, today))
                .transpose()?;
        }
        patient.mrn = optional_text(merge(patient.mrn, self.mrn));
        patient.phone = optional_text(merge(patient.phone, self.phone));
        if let Some(email) = self.email {
            patient.email = optional_text(email)
                .map(|e| check_email("email", &e))
                .transpose()?;
        }
        if let Some(active) = self.active {
            patient.active = active;
        }
        Ok(patient)
    }
}
