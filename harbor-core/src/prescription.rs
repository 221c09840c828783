use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{HarborError, Result};
use crate::impl_record;
use crate::patch::{merge, nullable};
use crate::record::RecordMeta;
use crate::validation::{
    check_date_order, check_dea_number, optional_text, parse_date, parse_date_patch, require_text,
};

const MAX_REFILLS: u32 = 11;

/// Controlled Substances Act schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrugSchedule {
    #[serde(rename = "none")]
    Unscheduled,
    #[serde(rename = "i")]
    I,
    #[serde(rename = "ii")]
    II,
    #[serde(rename = "iii")]
    III,
    #[serde(rename = "iv")]
    IV,
    #[serde(rename = "v")]
    V,
}

impl DrugSchedule {
    pub fn is_controlled(&self) -> bool {
        *self != DrugSchedule::Unscheduled
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DrugSchedule::Unscheduled => "none",
            DrugSchedule::I => "i",
            DrugSchedule::II => "ii",
            DrugSchedule::III => "iii",
            DrugSchedule::IV => "iv",
            DrugSchedule::V => "v",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionStatus {
    Active,
    OnHold,
    Discontinued,
    Completed,
}

impl PrescriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrescriptionStatus::Active => "active",
            PrescriptionStatus::OnHold => "on_hold",
            PrescriptionStatus::Discontinued => "discontinued",
            PrescriptionStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PrescriptionStatus::Discontinued | PrescriptionStatus::Completed
        )
    }

    pub fn can_transition_to(&self, next: PrescriptionStatus) -> bool {
        use PrescriptionStatus::*;
        matches!(
            (self, next),
            (Active, OnHold)
                | (OnHold, Active)
                | (Active | OnHold, Discontinued)
                | (Active | OnHold, Completed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prescription {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub patient_id: String,
    pub medication: String,
    pub dose: String,
    pub route: Option<String>,
    pub frequency: Option<String>,
    pub quantity: u32,
    pub refills: u32,
    pub schedule: DrugSchedule,
    pub prescriber: String,
    pub dea_number: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub status: PrescriptionStatus,
    pub discontinue_reason: Option<String>,
}

impl_record!(Prescription, "prescriptions");

impl Prescription {
    /// Cross-field rules checked after every create or edit
    fn check(&self) -> Result<()> {
        if self.quantity == 0 {
            return Err(HarborError::validation("quantity", "must be greater than zero"));
        }
        if self.refills > MAX_REFILLS {
            return Err(HarborError::validation(
                "refills",
                format!("must be at most {}", MAX_REFILLS),
            ));
        }
        match self.schedule {
            DrugSchedule::I => {
                return Err(HarborError::rule(
                    "schedule",
                    "schedule I substances cannot be prescribed",
                ));
            }
            DrugSchedule::II if self.refills > 0 => {
                return Err(HarborError::rule(
                    "refills",
                    "schedule II prescriptions cannot have refills",
                ));
            }
            _ => {}
        }
        if self.schedule.is_controlled() && self.dea_number.is_none() {
            return Err(HarborError::validation(
                "dea_number",
                "is required for controlled substances",
            ));
        }
        check_date_order("end_date", Some(self.start_date), self.end_date)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewPrescription {
    pub patient_id: String,
    pub medication: String,
    pub dose: String,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    pub quantity: u32,
    #[serde(default)]
    pub refills: u32,
    pub schedule: DrugSchedule,
    pub prescriber: String,
    #[serde(default)]
    pub dea_number: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

impl NewPrescription {
    pub fn into_prescription(self, meta: RecordMeta, today: NaiveDate) -> Result<Prescription> {
        let prescription = Prescription {
            meta,
            patient_id: require_text("patient_id", &self.patient_id)?,
            medication: require_text("medication", &self.medication)?,
            dose: require_text("dose", &self.dose)?,
            route: optional_text(self.route),
            frequency: optional_text(self.frequency),
            quantity: self.quantity,
            refills: self.refills,
            schedule: self.schedule,
            prescriber: require_text("prescriber", &self.prescriber)?,
            dea_number: optional_text(self.dea_number)
                .map(|n| check_dea_number("dea_number", &n))
                .transpose()?,
            start_date: match optional_text(self.start_date) {
                Some(d) => parse_date("start_date", &d)?,
                None => today,
            },
            end_date: optional_text(self.end_date)
                .map(|d| parse_date("end_date", &d))
                .transpose()?,
            status: PrescriptionStatus::Active,
            discontinue_reason: None,
        };
        prescription.check()?;
        Ok(prescription)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrescriptionPatch {
    #[serde(default)]
    pub dose: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub route: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub frequency: Option<Option<String>>,
    #[serde(default)]
    pub quantity: Option<u32>,
    #[serde(default)]
    pub refills: Option<u32>,
    #[serde(default, deserialize_with = "nullable")]
    pub end_date: Option<Option<String>>,
    #[serde(default)]
    pub status: Option<PrescriptionStatus>,
    #[serde(default)]
    pub discontinue_reason: Option<String>,
}

impl PrescriptionPatch {
    fn edits_order(&self) -> bool {
        self.dose.is_some()
            || self.route.is_some()
            || self.frequency.is_some()
            || self.quantity.is_some()
            || self.refills.is_some()
            || self.end_date.is_some()
    }

    pub fn apply(self, existing: &Prescription) -> Result<Prescription> {
        if existing.status.is_terminal() && (self.edits_order() || self.status.is_some()) {
            return Err(HarborError::record_rule(format!(
                "a {} prescription cannot be changed",
                existing.status.as_str()
            )));
        }

        let mut rx = existing.clone();
        if let Some(dose) = self.dose {
            rx.dose = require_text("dose", &dose)?;
        }
        rx.route = optional_text(merge(rx.route, self.route));
        rx.frequency = optional_text(merge(rx.frequency, self.frequency));
        if let Some(quantity) = self.quantity {
            rx.quantity = quantity;
        }
        if let Some(refills) = self.refills {
            rx.refills = refills;
        }
        rx.end_date = merge(rx.end_date, parse_date_patch("end_date", self.end_date)?);

        if let Some(next) = self.status
            && next != existing.status
        {
            if !existing.status.can_transition_to(next) {
                return Err(HarborError::rule(
                    "status",
                    format!(
                        "cannot move a prescription from {} to {}",
                        existing.status.as_str(),
                        next.as_str()
                    ),
                ));
            }
            if next == PrescriptionStatus::Discontinued {
                rx.discontinue_reason = Some(
                    optional_text(self.discontinue_reason)
                        .ok_or_else(|| HarborError::validation("discontinue_reason", "is required"))?,
                );
            }
            rx.status = next;
        }

        rx.check()?;
        Ok(rx)
    }
}
