//! Field validation shared by the record modules
//!
//! Text: required / optional trimming and length limits
//! Dates: `YYYY-MM-DD` parsing with field-specific errors
//! Identifiers: DEA registration numbers, NDC codes, state codes, email

pub mod identifiers;

pub use identifiers::{check_dea_number, check_email, check_ndc, check_state_code};

use crate::error::{HarborError, Result};
use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// Accepted calendar years: the four-digit `YYYY` range
const YEARS: std::ops::RangeInclusive<i32> = 1..=9999;

/// Trim a required text field, rejecting blank input.
pub fn require_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(HarborError::validation(field, "is required"));
    }
    Ok(trimmed.to_string())
}

/// Trim an optional text field; blank becomes `None`.
pub fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Reject text longer than `max` characters.
pub fn check_length(field: &str, value: &str, max: usize) -> Result<()> {
    if value.chars().count() > max {
        return Err(HarborError::validation(
            field,
            format!("must be at most {} characters", max),
        ));
    }
    Ok(())
}

/// Parse a calendar date in `YYYY-MM-DD` form.
pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .ok()
        .filter(|d| YEARS.contains(&d.year()))
        .ok_or_else(|| {
            HarborError::validation(field, format!("'{}' is not a YYYY-MM-DD date", value))
        })
}

/// Reject timestamps outside the four-digit year range.
pub fn check_timestamp(field: &str, value: DateTime<Utc>) -> Result<DateTime<Utc>> {
    if !YEARS.contains(&value.year()) {
        return Err(HarborError::validation(
            field,
            format!("year {} is out of range", value.year()),
        ));
    }
    Ok(value)
}

/// Parse an optional date patch value, keeping the tri-state shape.
pub fn parse_date_patch(
    field: &str,
    value: Option<Option<String>>,
) -> Result<Option<Option<NaiveDate>>> {
    match value {
        None => Ok(None),
        Some(None) => Ok(Some(None)),
        Some(Some(s)) if s.trim().is_empty() => Ok(Some(None)),
        Some(Some(s)) => parse_date(field, &s).map(|d| Some(Some(d))),
    }
}

/// Reject a range whose end falls before its start.
pub fn check_date_order(
    end_field: &str,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<()> {
    if let (Some(start), Some(end)) = (start, end)
        && end < start
    {
        return Err(HarborError::validation(
            end_field,
            format!("{} is before start date {}", end, start),
        ));
    }
    Ok(())
}
