//! DEA Form 222 orders for schedule I and II substances
//!
//! An order is editable while it is a draft. Once submitted, only receipts
//! (and cancellation before anything arrives) change it.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{HarborError, Result};
use crate::impl_record;
use crate::patch::{merge, nullable};
use crate::prescription::DrugSchedule;
use crate::record::RecordMeta;
use crate::validation::{check_dea_number, check_ndc, optional_text, require_text};

/// Lines on a single-sheet Form 222
pub const MAX_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Draft,
    Submitted,
    PartiallyReceived,
    Received,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Submitted => "submitted",
            OrderStatus::PartiallyReceived => "partially_received",
            OrderStatus::Received => "received",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Orders still waiting on the supplier
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            OrderStatus::Draft | OrderStatus::Submitted | OrderStatus::PartiallyReceived
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Supplier {
    pub name: String,
    pub dea_number: String,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_no: u32,
    pub drug_name: String,
    pub ndc: String,
    pub schedule: DrugSchedule,
    pub package_size: String,
    pub packages_ordered: u32,
    pub packages_received: u32,
    pub received_on: Option<NaiveDate>,
}

impl OrderLine {
    pub fn is_complete(&self) -> bool {
        self.packages_received >= self.packages_ordered
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewOrderLine {
    pub line_no: u32,
    pub drug_name: String,
    pub ndc: String,
    pub schedule: DrugSchedule,
    pub package_size: String,
    pub packages_ordered: u32,
}

impl NewOrderLine {
    fn into_line(self) -> Result<OrderLine> {
        if !(1..=MAX_LINES as u32).contains(&self.line_no) {
            return Err(HarborError::validation(
                "lines.line_no",
                format!("must be between 1 and {}", MAX_LINES),
            ));
        }
        if !matches!(self.schedule, DrugSchedule::I | DrugSchedule::II) {
            return Err(HarborError::rule(
                "lines.schedule",
                format!(
                    "line {}: schedule {} substances are not ordered on Form 222",
                    self.line_no,
                    self.schedule.as_str()
                ),
            ));
        }
        if self.packages_ordered == 0 {
            return Err(HarborError::validation(
                "lines.packages_ordered",
                format!("line {}: must be greater than zero", self.line_no),
            ));
        }
        Ok(OrderLine {
            line_no: self.line_no,
            drug_name: require_text("lines.drug_name", &self.drug_name)?,
            ndc: check_ndc("lines.ndc", &self.ndc)?,
            schedule: self.schedule,
            package_size: require_text("lines.package_size", &self.package_size)?,
            packages_ordered: self.packages_ordered,
            packages_received: 0,
            received_on: None,
        })
    }
}

fn build_lines(lines: Vec<NewOrderLine>) -> Result<Vec<OrderLine>> {
    if lines.is_empty() || lines.len() > MAX_LINES {
        return Err(HarborError::validation(
            "lines",
            format!("an order needs between 1 and {} lines", MAX_LINES),
        ));
    }
    let mut seen = HashSet::new();
    let mut built = Vec::with_capacity(lines.len());
    for line in lines {
        if !seen.insert(line.line_no) {
            return Err(HarborError::validation(
                "lines.line_no",
                format!("line {} appears twice", line.line_no),
            ));
        }
        built.push(line.into_line()?);
    }
    built.sort_by_key(|l| l.line_no);
    Ok(built)
}

fn check_supplier(supplier: Supplier) -> Result<Supplier> {
    Ok(Supplier {
        name: require_text("supplier.name", &supplier.name)?,
        dea_number: check_dea_number("supplier.dea_number", &supplier.dea_number)?,
        address: optional_text(supplier.address),
    })
}

fn check_form_number(value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.len() != 9 || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(HarborError::validation("form_number", "must be 9 digits"));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dea222Order {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub form_number: String,
    pub registrant_dea_number: String,
    pub supplier: Supplier,
    pub lines: Vec<OrderLine>,
    pub status: OrderStatus,
    pub ordered_on: NaiveDate,
    pub submitted_on: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl_record!(Dea222Order, "dea222_orders");

impl Dea222Order {
    fn require_status(&self, allowed: &[OrderStatus], action: &str) -> Result<()> {
        if !allowed.contains(&self.status) {
            return Err(HarborError::record_rule(format!(
                "cannot {} a {} order",
                action,
                self.status.as_str()
            )));
        }
        Ok(())
    }

    pub fn has_receipts(&self) -> bool {
        self.lines.iter().any(|l| l.packages_received > 0)
    }

    pub fn submit(&mut self, today: NaiveDate) -> Result<()> {
        self.require_status(&[OrderStatus::Draft], "submit")?;
        self.status = OrderStatus::Submitted;
        self.submitted_on = Some(today);
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.require_status(&[OrderStatus::Draft, OrderStatus::Submitted], "cancel")?;
        if self.has_receipts() {
            return Err(HarborError::record_rule(
                "cannot cancel an order with received packages",
            ));
        }
        self.status = OrderStatus::Cancelled;
        Ok(())
    }

    /// Book packages received against order lines and recompute status.
    pub fn receive(&mut self, receipts: &[Receipt], today: NaiveDate) -> Result<()> {
        self.require_status(
            &[OrderStatus::Submitted, OrderStatus::PartiallyReceived],
            "receive against",
        )?;
        if receipts.is_empty() {
            return Err(HarborError::validation("receipts", "is required"));
        }

        // Validate everything before touching the lines
        let mut pending: Vec<(usize, u32)> = Vec::with_capacity(receipts.len());
        for receipt in receipts {
            let idx = self
                .lines
                .iter()
                .position(|l| l.line_no == receipt.line_no)
                .ok_or_else(|| {
                    HarborError::validation(
                        "receipts.line_no",
                        format!("order has no line {}", receipt.line_no),
                    )
                })?;
            if receipt.packages == 0 {
                return Err(HarborError::validation(
                    "receipts.packages",
                    format!("line {}: must be greater than zero", receipt.line_no),
                ));
            }
            let line = &self.lines[idx];
            // Summed wide so repeated lines cannot wrap past the outstanding count
            let requested: u64 = pending
                .iter()
                .filter(|(i, _)| *i == idx)
                .map(|(_, n)| u64::from(*n))
                .sum::<u64>()
                + u64::from(receipt.packages);
            let outstanding = line.packages_ordered.saturating_sub(line.packages_received);
            if requested > u64::from(outstanding) {
                return Err(HarborError::rule(
                    "receipts.packages",
                    format!(
                        "line {}: receiving {} would exceed the {} package(s) outstanding",
                        line.line_no, requested, outstanding
                    ),
                ));
            }
            pending.push((idx, receipt.packages));
        }

        for (idx, packages) in pending {
            let line = &mut self.lines[idx];
            line.packages_received += packages;
            line.received_on = Some(today);
        }

        self.status = if self.lines.iter().all(OrderLine::is_complete) {
            OrderStatus::Received
        } else {
            OrderStatus::PartiallyReceived
        };
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Receipt {
    pub line_no: u32,
    pub packages: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewDea222Order {
    pub form_number: String,
    pub registrant_dea_number: String,
    pub supplier: Supplier,
    pub lines: Vec<NewOrderLine>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewDea222Order {
    pub fn into_order(self, meta: RecordMeta, today: NaiveDate) -> Result<Dea222Order> {
        Ok(Dea222Order {
            meta,
            form_number: check_form_number(&self.form_number)?,
            registrant_dea_number: check_dea_number(
                "registrant_dea_number",
                &self.registrant_dea_number,
            )?,
            supplier: check_supplier(self.supplier)?,
            lines: build_lines(self.lines)?,
            status: OrderStatus::Draft,
            ordered_on: today,
            submitted_on: None,
            notes: optional_text(self.notes),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dea222Patch {
    #[serde(default)]
    pub supplier: Option<Supplier>,
    #[serde(default)]
    pub lines: Option<Vec<NewOrderLine>>,
    #[serde(default, deserialize_with = "nullable")]
    pub notes: Option<Option<String>>,
}

impl Dea222Patch {
    /// Notes can change at any time; supplier and lines only on drafts.
    pub fn apply(self, existing: &Dea222Order) -> Result<Dea222Order> {
        let mut order = existing.clone();
        if self.supplier.is_some() || self.lines.is_some() {
            existing.require_status(&[OrderStatus::Draft], "edit")?;
        }
        if let Some(supplier) = self.supplier {
            order.supplier = check_supplier(supplier)?;
        }
        if let Some(lines) = self.lines {
            order.lines = build_lines(lines)?;
        }
        order.notes = optional_text(merge(order.notes, self.notes));
        Ok(order)
    }
}
