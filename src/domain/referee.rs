//! Referee assignment state machine.
//!
//! ```text
//! Pending ──agree──▶ Agreed ──report──▶ ReportCompleted
//!    │
//!    └──decline──▶ Declined
//!
//! any state but ReportCompleted ──cancel──▶ Canceled
//! ```
//!
//! The state is never stored; it is read off the `agreed`, `canceled` and
//! `report_completed` columns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::settings::{days, DurationSettings};
use super::{AssignmentId, SubmissionId, UserId};
use crate::error::{WorkflowError, WorkflowResult};

/// Attachments above 5 MB are refused.
pub const MAX_ATTACHMENT_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Reject,
    MajorRevisions,
    MinorRevisions,
    Accept,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Reject => "reject",
            Recommendation::MajorRevisions => "major_revisions",
            Recommendation::MinorRevisions => "minor_revisions",
            Recommendation::Accept => "accept",
        }
    }
}

impl std::str::FromStr for Recommendation {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reject" => Ok(Recommendation::Reject),
            "major_revisions" => Ok(Recommendation::MajorRevisions),
            "minor_revisions" => Ok(Recommendation::MinorRevisions),
            "accept" => Ok(Recommendation::Accept),
            other => Err(WorkflowError::Validation(format!(
                "unknown recommendation: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefereeState {
    Pending,
    Agreed,
    Declined,
    ReportCompleted,
    Canceled,
}

/// An uploaded file as seen by the workflow: an opaque reference and its size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub reference: String,
    pub size_bytes: u64,
}

impl Attachment {
    pub fn check_size(&self) -> WorkflowResult<()> {
        if self.size_bytes > MAX_ATTACHMENT_BYTES {
            return Err(WorkflowError::AttachmentTooLarge {
                size_bytes: self.size_bytes,
                limit: MAX_ATTACHMENT_BYTES,
            });
        }
        Ok(())
    }
}

/// Report fields as filled in by the referee.
#[derive(Debug, Clone, Default)]
pub struct ReportSubmission {
    pub recommendation: Option<Recommendation>,
    pub comments_for_editor: Option<String>,
    pub attachment_for_editor: Option<Attachment>,
    pub comments_for_author: Option<String>,
    pub attachment_for_author: Option<Attachment>,
}

impl ReportSubmission {
    fn check_attachments(&self) -> WorkflowResult<()> {
        for attachment in [&self.attachment_for_editor, &self.attachment_for_author]
            .into_iter()
            .flatten()
        {
            attachment.check_size()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefereeAssignment {
    pub id: AssignmentId,
    pub referee: UserId,
    pub submission_id: SubmissionId,
    pub agreed: Option<bool>,
    pub canceled: bool,
    pub decline_comment: Option<String>,
    pub recommendation: Option<Recommendation>,
    pub comments_for_editor: Option<String>,
    pub attachment_for_editor: Option<String>,
    pub comments_for_author: Option<String>,
    pub attachment_for_author: Option<String>,
    pub report_completed: bool,
    pub referee_letter: String,
    pub assigned_at: DateTime<Utc>,
    pub response_due_at: DateTime<Utc>,
    pub agreed_at: Option<DateTime<Utc>>,
    pub declined_at: Option<DateTime<Utc>>,
    pub report_due_at: Option<DateTime<Utc>>,
    pub report_originally_due_at: Option<DateTime<Utc>>,
    pub report_completed_at: Option<DateTime<Utc>>,
}

impl RefereeAssignment {
    pub fn state(&self) -> RefereeState {
        if self.report_completed {
            RefereeState::ReportCompleted
        } else if self.canceled {
            RefereeState::Canceled
        } else {
            match self.agreed {
                None => RefereeState::Pending,
                Some(true) => RefereeState::Agreed,
                Some(false) => RefereeState::Declined,
            }
        }
    }

    /// Not canceled and not declined.
    pub fn is_active(&self) -> bool {
        !self.canceled && self.agreed != Some(false)
    }

    pub fn is_declined(&self) -> bool {
        self.agreed == Some(false)
    }

    /// Records the referee's answer to the invitation. Agreeing starts the
    /// report clock.
    pub fn respond(
        &mut self,
        agreed: bool,
        comment: Option<String>,
        settings: &DurationSettings,
        now: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        if self.agreed.is_some() {
            return Err(WorkflowError::AlreadyResponded);
        }
        if self.canceled {
            return Err(WorkflowError::AssignmentCanceled);
        }

        self.agreed = Some(agreed);
        if agreed {
            let due = now + days(settings.days_for_external_review);
            self.agreed_at = Some(now);
            self.report_due_at = Some(due);
            self.report_originally_due_at = Some(due);
        } else {
            self.declined_at = Some(now);
            self.decline_comment = comment;
        }
        Ok(())
    }

    fn check_report_editable(&self) -> WorkflowResult<()> {
        if self.report_completed {
            return Err(WorkflowError::ReportImmutable);
        }
        if self.canceled {
            return Err(WorkflowError::AssignmentCanceled);
        }
        if self.agreed != Some(true) {
            return Err(WorkflowError::InvalidTransition {
                from: self.state(),
                action: "file a report",
            });
        }
        Ok(())
    }

    fn apply_report_fields(&mut self, report: ReportSubmission) {
        self.recommendation = report.recommendation;
        self.comments_for_editor = report.comments_for_editor;
        self.attachment_for_editor = report.attachment_for_editor.map(|a| a.reference);
        self.comments_for_author = report.comments_for_author;
        self.attachment_for_author = report.attachment_for_author.map(|a| a.reference);
    }

    /// Stores report fields without completing the report.
    pub fn save_draft(&mut self, report: ReportSubmission) -> WorkflowResult<()> {
        report.check_attachments()?;
        self.check_report_editable()?;
        self.apply_report_fields(report);
        Ok(())
    }

    /// Completes the report. The recommendation, comments and attachments
    /// are frozen from here on.
    pub fn submit_report(
        &mut self,
        report: ReportSubmission,
        now: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        report.check_attachments()?;
        self.check_report_editable()?;
        if report.recommendation.is_none() {
            return Err(WorkflowError::RecommendationRequired);
        }

        self.apply_report_fields(report);
        self.report_completed = true;
        self.report_completed_at = Some(now);
        Ok(())
    }

    /// Cancels the assignment. Returns whether the referee should be told,
    /// which is not the case once they declined.
    pub fn cancel(&mut self) -> WorkflowResult<bool> {
        if self.report_completed {
            return Err(WorkflowError::InvalidTransition {
                from: RefereeState::ReportCompleted,
                action: "cancel",
            });
        }
        if self.canceled {
            return Ok(false);
        }
        self.canceled = true;
        Ok(!self.is_declined())
    }

    /// Pushes the report deadline back and returns the new date.
    pub fn extend_report_deadline(&mut self, extension_days: i32) -> Option<DateTime<Utc>> {
        let due = self.report_due_at? + days(extension_days);
        self.report_due_at = Some(due);
        Some(due)
    }

    pub fn awaiting_response(&self) -> bool {
        self.agreed.is_none() && !self.canceled
    }

    pub fn response_overdue(&self, now: DateTime<Utc>) -> bool {
        self.awaiting_response() && now > self.response_due_at
    }

    pub fn awaiting_report(&self) -> bool {
        self.agreed == Some(true) && !self.report_completed && !self.canceled
    }

    pub fn report_overdue(&self, now: DateTime<Utc>) -> bool {
        self.agreed == Some(true) && self.report_due_at.is_some_and(|due| now > due)
    }

    pub fn awaiting_action(&self) -> bool {
        self.awaiting_response() || self.awaiting_report()
    }
}

/// The transition an assignment write carries. A write only lands while
/// the stored row is still in a state the transition starts from, and only
/// touches the columns that transition owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentChange {
    /// Agree or decline, from Pending.
    Response,
    /// Draft or final report fields. Never the report deadline, which the
    /// overdue scan owns.
    Report,
    Cancel,
}

impl AssignmentChange {
    pub fn applies_to(self, stored: &RefereeAssignment) -> bool {
        match self {
            AssignmentChange::Response => stored.awaiting_response(),
            AssignmentChange::Report => stored.awaiting_report(),
            AssignmentChange::Cancel => !stored.canceled && !stored.report_completed,
        }
    }

    /// Copies the columns this change owns from `from` into `stored`.
    pub fn apply(self, from: &RefereeAssignment, stored: &mut RefereeAssignment) {
        match self {
            AssignmentChange::Response => {
                stored.agreed = from.agreed;
                stored.decline_comment = from.decline_comment.clone();
                stored.agreed_at = from.agreed_at;
                stored.declined_at = from.declined_at;
                stored.report_due_at = from.report_due_at;
                stored.report_originally_due_at = from.report_originally_due_at;
            }
            AssignmentChange::Report => {
                stored.recommendation = from.recommendation;
                stored.comments_for_editor = from.comments_for_editor.clone();
                stored.attachment_for_editor = from.attachment_for_editor.clone();
                stored.comments_for_author = from.comments_for_author.clone();
                stored.attachment_for_author = from.attachment_for_author.clone();
                stored.report_completed = from.report_completed;
                stored.report_completed_at = from.report_completed_at;
            }
            AssignmentChange::Cancel => stored.canceled = true,
        }
    }

    /// The error a caller gets when `stored` no longer admits this change.
    pub fn conflict(self, stored: &RefereeAssignment) -> WorkflowError {
        match self {
            AssignmentChange::Response if stored.agreed.is_some() => WorkflowError::AlreadyResponded,
            AssignmentChange::Response => WorkflowError::AssignmentCanceled,
            AssignmentChange::Report if stored.report_completed => WorkflowError::ReportImmutable,
            AssignmentChange::Report if stored.canceled => WorkflowError::AssignmentCanceled,
            AssignmentChange::Report => WorkflowError::InvalidTransition {
                from: stored.state(),
                action: "file a report",
            },
            AssignmentChange::Cancel => WorkflowError::InvalidTransition {
                from: stored.state(),
                action: "cancel",
            },
        }
    }
}

/// Fields for an invitation about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRefereeAssignment {
    pub referee: UserId,
    pub submission_id: SubmissionId,
    pub referee_letter: String,
    pub assigned_at: DateTime<Utc>,
    pub response_due_at: DateTime<Utc>,
}

impl NewRefereeAssignment {
    /// Raised when another live invitation on the submission already holds
    /// this referee or letter.
    pub fn conflict_error(&self) -> WorkflowError {
        WorkflowError::Validation(format!(
            "referee {} or letter {} is already in use on submission {}",
            self.referee, self.referee_letter, self.submission_id
        ))
    }

    pub fn invite(
        referee: UserId,
        submission_id: SubmissionId,
        referee_letter: String,
        settings: &DurationSettings,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            referee,
            submission_id,
            referee_letter,
            assigned_at: now,
            response_due_at: now + days(settings.days_to_respond_to_referee_request),
        }
    }
}

/// Picks the letter identifying `referee` on the current revision.
///
/// A referee who completed a report on the preceding revision keeps their
/// letter. Everyone else gets the first letter not used on this revision
/// and not held by another referee from the preceding one.
pub fn next_referee_letter(
    referee: UserId,
    current: &[RefereeAssignment],
    previous: &[RefereeAssignment],
) -> WorkflowResult<String> {
    if let Some(prior) = previous
        .iter()
        .find(|a| a.referee == referee && a.report_completed)
    {
        return Ok(prior.referee_letter.clone());
    }

    let taken: Vec<&str> = current
        .iter()
        .map(|a| a.referee_letter.as_str())
        .chain(
            previous
                .iter()
                .filter(|a| a.report_completed)
                .map(|a| a.referee_letter.as_str()),
        )
        .collect();

    ('A'..='Z')
        .map(String::from)
        .find(|letter| !taken.contains(&letter.as_str()))
        .ok_or_else(|| {
            WorkflowError::Validation("no referee letters left on this revision".to_string())
        })
}
