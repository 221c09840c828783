//! Take-home medication doses dispensed against an active prescription
//!
//! One bottle per dose. A dispensed record stays outstanding until its
//! bottles come back at a return check or it is reported lost.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{HarborError, Result};
use crate::impl_record;
use crate::prescription::{Prescription, PrescriptionStatus};
use crate::record::RecordMeta;
use crate::validation::{optional_text, parse_date, require_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TakeHomeStatus {
    Dispensed,
    Returned,
    PartiallyReturned,
    Lost,
}

impl TakeHomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TakeHomeStatus::Dispensed => "dispensed",
            TakeHomeStatus::Returned => "returned",
            TakeHomeStatus::PartiallyReturned => "partially_returned",
            TakeHomeStatus::Lost => "lost",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeHome {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub patient_id: String,
    pub prescription_id: String,
    pub medication: String,
    pub dose_mg: f64,
    pub doses: u32,
    pub start_date: NaiveDate,
    pub bottle_numbers: Vec<String>,
    pub dispensed_by: String,
    pub status: TakeHomeStatus,
    pub bottles_returned: Vec<String>,
    pub unused_doses: u32,
    pub notes: Option<String>,
}

impl_record!(TakeHome, "take_homes");

impl TakeHome {
    /// Last day covered by this supply
    pub fn end_date(&self) -> NaiveDate {
        self.start_date
            .checked_add_days(Days::new(u64::from(self.doses.saturating_sub(1))))
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn is_outstanding(&self) -> bool {
        self.status == TakeHomeStatus::Dispensed
    }

    pub fn covers(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.start_date <= end && start <= self.end_date()
    }

    /// Record a return check.
    pub fn record_return(&mut self, check: ReturnCheck) -> Result<()> {
        if self.status != TakeHomeStatus::Dispensed {
            return Err(HarborError::record_rule(format!(
                "a {} take-home cannot be checked in again",
                self.status.as_str()
            )));
        }

        let dispensed: HashSet<&str> = self.bottle_numbers.iter().map(String::as_str).collect();
        let mut seen = HashSet::new();
        let mut returned = Vec::with_capacity(check.bottles_returned.len());
        for bottle in &check.bottles_returned {
            let bottle = require_text("bottles_returned", bottle)?;
            if !dispensed.contains(bottle.as_str()) {
                return Err(HarborError::validation(
                    "bottles_returned",
                    format!("bottle {} was not dispensed with this take-home", bottle),
                ));
            }
            if !seen.insert(bottle.clone()) {
                return Err(HarborError::validation(
                    "bottles_returned",
                    format!("bottle {} listed twice", bottle),
                ));
            }
            returned.push(bottle);
        }

        if check.unused_doses as usize > returned.len() {
            return Err(HarborError::validation(
                "unused_doses",
                "cannot exceed the number of bottles returned",
            ));
        }

        self.status = if returned.len() == self.bottle_numbers.len() {
            TakeHomeStatus::Returned
        } else {
            TakeHomeStatus::PartiallyReturned
        };
        self.bottles_returned = returned;
        self.unused_doses = check.unused_doses;
        if let Some(notes) = optional_text(check.notes) {
            self.notes = Some(notes);
        }
        Ok(())
    }

    /// Report the supply lost or stolen.
    pub fn mark_lost(&mut self, notes: Option<String>) -> Result<()> {
        if !matches!(
            self.status,
            TakeHomeStatus::Dispensed | TakeHomeStatus::PartiallyReturned
        ) {
            return Err(HarborError::record_rule(format!(
                "a {} take-home cannot be reported lost",
                self.status.as_str()
            )));
        }
        let notes = optional_text(notes)
            .ok_or_else(|| HarborError::validation("notes", "is required"))?;
        self.status = TakeHomeStatus::Lost;
        self.notes = Some(notes);
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewTakeHome {
    pub patient_id: String,
    pub prescription_id: String,
    pub dose_mg: f64,
    pub doses: u32,
    #[serde(default)]
    pub start_date: Option<String>,
    pub bottle_numbers: Vec<String>,
    pub dispensed_by: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Limits and context a new take-home is checked against
pub struct DispenseContext<'a> {
    pub prescription: &'a Prescription,
    pub patient_take_homes: &'a [TakeHome],
    pub today: NaiveDate,
    pub max_days: u32,
}

impl NewTakeHome {
    pub fn into_take_home(self, meta: RecordMeta, ctx: &DispenseContext<'_>) -> Result<TakeHome> {
        let patient_id = require_text("patient_id", &self.patient_id)?;
        let rx = ctx.prescription;

        if rx.patient_id != patient_id {
            return Err(HarborError::rule(
                "prescription_id",
                "prescription belongs to another patient",
            ));
        }
        if rx.status != PrescriptionStatus::Active {
            return Err(HarborError::rule(
                "prescription_id",
                format!("prescription is {}", rx.status.as_str()),
            ));
        }
        if !self.dose_mg.is_finite() || self.dose_mg <= 0.0 {
            return Err(HarborError::validation("dose_mg", "must be greater than zero"));
        }
        if self.doses == 0 || self.doses > ctx.max_days {
            return Err(HarborError::validation(
                "doses",
                format!("must be between 1 and {}", ctx.max_days),
            ));
        }

        let start_date = match optional_text(self.start_date) {
            Some(d) => parse_date("start_date", &d)?,
            None => ctx.today,
        };
        if start_date < ctx.today {
            return Err(HarborError::validation("start_date", "is in the past"));
        }

        let mut seen = HashSet::new();
        let mut bottles = Vec::with_capacity(self.bottle_numbers.len());
        for bottle in self.bottle_numbers {
            let bottle = require_text("bottle_numbers", &bottle)?;
            if !seen.insert(bottle.clone()) {
                return Err(HarborError::validation(
                    "bottle_numbers",
                    format!("bottle {} listed twice", bottle),
                ));
            }
            bottles.push(bottle);
        }
        if bottles.len() != self.doses as usize {
            return Err(HarborError::validation(
                "bottle_numbers",
                format!("expected {} bottles, got {}", self.doses, bottles.len()),
            ));
        }

        let take_home = TakeHome {
            meta,
            patient_id,
            prescription_id: rx.meta.id.clone(),
            medication: rx.medication.clone(),
            dose_mg: self.dose_mg,
            doses: self.doses,
            start_date,
            bottle_numbers: bottles,
            dispensed_by: require_text("dispensed_by", &self.dispensed_by)?,
            status: TakeHomeStatus::Dispensed,
            bottles_returned: Vec::new(),
            unused_doses: 0,
            notes: optional_text(self.notes),
        };

        if let Some(open) = ctx
            .patient_take_homes
            .iter()
            .find(|t| t.is_outstanding() && t.covers(take_home.start_date, take_home.end_date()))
        {
            return Err(HarborError::conflict(format!(
                "take-home {} covering {} to {} has not been returned",
                open.meta.id,
                open.start_date,
                open.end_date()
            )));
        }

        Ok(take_home)
    }
}

/// Body of a return check
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReturnCheck {
    #[serde(default)]
    pub bottles_returned: Vec<String>,
    #[serde(default)]
    pub unused_doses: u32,
    #[serde(default)]
    pub notes: Option<String>,
}
