//! Research studies and their status inference rules
//!
//! A study update is applied against the merged study (stored values
//! overlaid with the patch) in five passes:
//!
//! 1. date and count validation
//! 2. IRB approval-date / IRB-status reconciliation
//! 3. checks on an explicitly requested status
//! 4. automatic status transitions when no status was requested
//! 5. enrollment limits
//!
//! Every value the rules change on their own is reported as an
//! [`Adjustment`] so callers can show what happened.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{HarborError, Result};
use crate::impl_record;
use crate::patch::{merge, nullable};
use crate::record::RecordMeta;
use crate::validation::{check_date_order, optional_text, parse_date_patch, require_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyStatus {
    Planning,
    Active,
    OnHold,
    Completed,
    Terminated,
}

impl StudyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StudyStatus::Planning => "planning",
            StudyStatus::Active => "active",
            StudyStatus::OnHold => "on_hold",
            StudyStatus::Completed => "completed",
            StudyStatus::Terminated => "terminated",
        }
    }

    /// Closed studies only move again on an explicit request
    pub fn is_closed(&self) -> bool {
        matches!(self, StudyStatus::Completed | StudyStatus::Terminated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IrbStatus {
    NotSubmitted,
    Pending,
    Approved,
    Expired,
    Rejected,
}

impl IrbStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IrbStatus::NotSubmitted => "not_submitted",
            IrbStatus::Pending => "pending",
            IrbStatus::Approved => "approved",
            IrbStatus::Expired => "expired",
            IrbStatus::Rejected => "rejected",
        }
    }

    /// Statuses under which no approval date may be on file
    fn voids_approval(&self) -> bool {
        matches!(
            self,
            IrbStatus::NotSubmitted | IrbStatus::Pending | IrbStatus::Rejected
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Study {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub title: String,
    pub protocol_number: Option<String>,
    pub principal_investigator: Option<String>,
    pub sponsor: Option<String>,
    pub description: Option<String>,
    pub status: StudyStatus,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub irb_status: IrbStatus,
    pub irb_approval_date: Option<NaiveDate>,
    pub irb_expiration_date: Option<NaiveDate>,
    pub enrollment_target: Option<u32>,
    pub enrolled_count: u32,
}

impl_record!(Study, "studies");

impl Study {
    /// An untitled study in planning, the base a create request is applied to
    pub fn draft(meta: RecordMeta) -> Self {
        Self {
            meta,
            title: String::new(),
            protocol_number: None,
            principal_investigator: None,
            sponsor: None,
            description: None,
            status: StudyStatus::Planning,
            start_date: None,
            end_date: None,
            irb_status: IrbStatus::NotSubmitted,
            irb_approval_date: None,
            irb_expiration_date: None,
            enrollment_target: None,
            enrolled_count: 0,
        }
    }
}

/// Partial update body for a study (also used for create)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StudyPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub protocol_number: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub principal_investigator: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub sponsor: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub status: Option<StudyStatus>,
    #[serde(default, deserialize_with = "nullable")]
    pub start_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub end_date: Option<Option<String>>,
    #[serde(default)]
    pub irb_status: Option<IrbStatus>,
    #[serde(default, deserialize_with = "nullable")]
    pub irb_approval_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub irb_expiration_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub enrollment_target: Option<Option<i64>>,
    #[serde(default)]
    pub enrolled_count: Option<i64>,
}

/// A value changed by a rule rather than by the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub field: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub reason: String,
}

/// Result of applying a patch: the new study and what the rules changed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyUpdate {
    pub study: Study,
    pub adjustments: Vec<Adjustment>,
}

impl StudyUpdate {
    /// True when the study status differs from `previous`
    pub fn status_changed(&self, previous: StudyStatus) -> bool {
        self.study.status != previous
    }
}

fn date_str(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.to_string())
}

/// Records adjustments while the rules run
struct Tracker {
    adjustments: Vec<Adjustment>,
}

impl Tracker {
    fn date(
        &mut self,
        field: &str,
        slot: &mut Option<NaiveDate>,
        value: Option<NaiveDate>,
        reason: &str,
    ) {
        if *slot == value {
            return;
        }
        self.adjustments.push(Adjustment {
            field: field.to_string(),
            from: date_str(*slot),
            to: date_str(value),
            reason: reason.to_string(),
        });
        *slot = value;
    }

    fn irb(&mut self, slot: &mut IrbStatus, value: IrbStatus, reason: &str) {
        if *slot == value {
            return;
        }
        self.adjustments.push(Adjustment {
            field: "irb_status".to_string(),
            from: Some(slot.as_str().to_string()),
            to: Some(value.as_str().to_string()),
            reason: reason.to_string(),
        });
        *slot = value;
    }

    fn status(&mut self, slot: &mut StudyStatus, value: StudyStatus, reason: &str) {
        if *slot == value {
            return;
        }
        self.adjustments.push(Adjustment {
            field: "status".to_string(),
            from: Some(slot.as_str().to_string()),
            to: Some(value.as_str().to_string()),
            reason: reason.to_string(),
        });
        *slot = value;
    }
}

/// IRB expiration must fall after the approval date
fn check_irb_window(study: &Study) -> Result<()> {
    if let (Some(approved), Some(expires)) = (study.irb_approval_date, study.irb_expiration_date)
        && expires <= approved
    {
        return Err(HarborError::validation(
            "irb_expiration_date",
            format!("{} is not after approval date {}", expires, approved),
        ));
    }
    Ok(())
}

fn count_field(field: &str, value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| HarborError::validation(field, "must be zero or more"))
}

impl StudyPatch {
    /// Whether the patch touches any IRB field
    fn touches_irb(&self) -> bool {
        self.irb_status.is_some()
            || self.irb_approval_date.is_some()
            || self.irb_expiration_date.is_some()
    }

    /// Apply this patch to `existing` as of the clinic date `today`.
    pub fn apply(self, existing: &Study, today: NaiveDate) -> Result<StudyUpdate> {
        let touches_irb = self.touches_irb();
        let mut study = existing.clone();
        let mut track = Tracker {
            adjustments: Vec::new(),
        };

        // Plain fields
        if let Some(title) = self.title {
            study.title = title;
        }
        study.title = require_text("title", &study.title)?;
        study.protocol_number = optional_text(merge(study.protocol_number, self.protocol_number));
        study.principal_investigator =
            optional_text(merge(study.principal_investigator, self.principal_investigator));
        study.sponsor = optional_text(merge(study.sponsor, self.sponsor));
        study.description = optional_text(merge(study.description, self.description));

        // 1. Dates and counts
        let approval_patch = parse_date_patch("irb_approval_date", self.irb_approval_date)?;
        study.start_date = merge(
            study.start_date,
            parse_date_patch("start_date", self.start_date)?,
        );
        study.end_date = merge(study.end_date, parse_date_patch("end_date", self.end_date)?);
        study.irb_approval_date = merge(study.irb_approval_date, approval_patch);
        study.irb_expiration_date = merge(
            study.irb_expiration_date,
            parse_date_patch("irb_expiration_date", self.irb_expiration_date)?,
        );

        check_date_order("end_date", study.start_date, study.end_date)?;
        if let Some(approved) = study.irb_approval_date
            && approved > today
        {
            return Err(HarborError::validation(
                "irb_approval_date",
                format!("{} is in the future", approved),
            ));
        }
        check_irb_window(&study)?;

        if let Some(target) = self.enrollment_target {
            study.enrollment_target = target
                .map(|t| count_field("enrollment_target", t))
                .transpose()?;
        }
        if let Some(enrolled) = self.enrolled_count {
            study.enrolled_count = count_field("enrolled_count", enrolled)?;
        }

        // 2. IRB reconciliation
        match self.irb_status {
            Some(requested) => {
                study.irb_status = requested;
                if requested == IrbStatus::Approved {
                    if study.irb_approval_date.is_none() {
                        track.date(
                            "irb_approval_date",
                            &mut study.irb_approval_date,
                            Some(today),
                            "IRB marked approved without an approval date",
                        );
                    }
                    if let Some(expires) = study.irb_expiration_date
                        && expires < today
                    {
                        return Err(HarborError::rule(
                            "irb_status",
                            format!("IRB approval expired on {}", expires),
                        ));
                    }
                } else if requested.voids_approval() {
                    let reason = format!("IRB status is {}", requested.as_str());
                    track.date("irb_approval_date", &mut study.irb_approval_date, None, &reason);
                    track.date(
                        "irb_expiration_date",
                        &mut study.irb_expiration_date,
                        None,
                        &reason,
                    );
                }
            }
            None => match approval_patch {
                Some(Some(_)) if study.irb_status != IrbStatus::Approved => {
                    track.irb(
                        &mut study.irb_status,
                        IrbStatus::Approved,
                        "IRB approval date recorded",
                    );
                }
                Some(None)
                    if matches!(study.irb_status, IrbStatus::Approved | IrbStatus::Expired) =>
                {
                    track.irb(
                        &mut study.irb_status,
                        IrbStatus::Pending,
                        "IRB approval date removed",
                    );
                }
                _ => {}
            },
        }
        // Approval may have been stamped above
        check_irb_window(&study)?;

        if study.irb_status == IrbStatus::Approved
            && let Some(expires) = study.irb_expiration_date
            && expires < today
        {
            track.irb(
                &mut study.irb_status,
                IrbStatus::Expired,
                "IRB approval expiration date has passed",
            );
        } else if study.irb_status == IrbStatus::Expired
            && self.irb_status.is_none()
            && study.irb_approval_date.is_some()
            && study.irb_expiration_date.is_some_and(|expires| expires >= today)
        {
            track.irb(
                &mut study.irb_status,
                IrbStatus::Approved,
                "IRB approval renewed",
            );
        }

        // 3. Explicitly requested status
        match self.status {
            Some(requested) => {
                study.status = requested;
                match requested {
                    StudyStatus::Active => {
                        if study.irb_status != IrbStatus::Approved {
                            return Err(HarborError::rule(
                                "status",
                                format!(
                                    "a study cannot be active while IRB status is {}",
                                    study.irb_status.as_str()
                                ),
                            ));
                        }
                        if study.start_date.is_none() {
                            track.date(
                                "start_date",
                                &mut study.start_date,
                                Some(today),
                                "study activated without a start date",
                            );
                        }
                        if let Some(start) = study.start_date
                            && start > today
                        {
                            return Err(HarborError::rule(
                                "status",
                                format!("a study cannot be active before its start date {}", start),
                            ));
                        }
                        if let Some(end) = study.end_date
                            && end < today
                        {
                            return Err(HarborError::rule(
                                "status",
                                format!("a study cannot be active after its end date {}", end),
                            ));
                        }
                    }
                    StudyStatus::Completed | StudyStatus::Terminated => {
                        match study.end_date {
                            None => track.date(
                                "end_date",
                                &mut study.end_date,
                                Some(today),
                                &format!("study {} without an end date", requested.as_str()),
                            ),
                            Some(end) if end > today && requested == StudyStatus::Completed => {
                                return Err(HarborError::rule(
                                    "status",
                                    format!("a study cannot be completed before its end date {}", end),
                                ));
                            }
                            Some(_) => {}
                        }
                        check_date_order("end_date", study.start_date, study.end_date)?;
                    }
                    StudyStatus::Planning | StudyStatus::OnHold => {}
                }
            }
            // 4. Automatic transitions
            None if !study.status.is_closed() => {
                let started = study.start_date.is_some_and(|start| start <= today);
                if study.end_date.is_some_and(|end| end < today) {
                    track.status(
                        &mut study.status,
                        StudyStatus::Completed,
                        "study end date has passed",
                    );
                } else if study.status == StudyStatus::Active
                    && study.irb_status != IrbStatus::Approved
                {
                    track.status(
                        &mut study.status,
                        StudyStatus::OnHold,
                        "IRB approval is no longer in effect",
                    );
                } else if study.status == StudyStatus::Active && !started {
                    track.status(
                        &mut study.status,
                        StudyStatus::Planning,
                        "start date is in the future",
                    );
                } else if study.irb_status == IrbStatus::Approved
                    && started
                    && (study.status == StudyStatus::Planning
                        || (study.status == StudyStatus::OnHold && touches_irb))
                {
                    track.status(
                        &mut study.status,
                        StudyStatus::Active,
                        "IRB approved and start date reached",
                    );
                }
            }
            None => {}
        }

        // 5. Enrollment
        if let Some(target) = study.enrollment_target
            && study.enrolled_count > target
        {
            return Err(HarborError::rule(
                "enrolled_count",
                format!(
                    "enrolled count {} exceeds enrollment target {}",
                    study.enrolled_count, target
                ),
            ));
        }

        for adj in &track.adjustments {
            tracing::debug!(
                study = %study.meta.id,
                field = %adj.field,
                reason = %adj.reason,
                "Study rule adjustment"
            );
        }

        Ok(StudyUpdate {
            study,
            adjustments: track.adjustments,
        })
    }
}
