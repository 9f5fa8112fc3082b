//! Notifications.
//!
//! Every message the workflow sends is identified by an [`Action`]. Who
//! receives it is decided by the routing table in [`routing`], not at the
//! call site. Rendering and transport sit behind the [`Gateway`] trait; each
//! accepted message yields a [`SendRecord`], which doubles as the
//! idempotency guard for reminder scans.

mod mailer;
mod notifier;
mod routing;

pub use mailer::TemplateMailer;
pub use notifier::{Notice, Notifier, NotifierConfig};
pub use routing::{route_for, Role, Route};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AssignmentId, SubmissionId};
use crate::error::DispatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    // Sent as a side effect of a workflow mutation.
    NewSubmission,
    AreaEditorAssigned,
    AreaEditorUnassigned,
    RefereeInvited,
    RefereeAgreed,
    AgreementConfirmation,
    RefereeDeclined,
    ReportCompleted,
    ReportThanks,
    AssignmentCanceled,
    DecisionEntered,
    DecisionApproved,
    DecisionApprovedReferee,
    SubmissionWithdrawn,
    SubmissionWithdrawnReferee,
    SubmissionUnarchived,

    // Sent by the reminder scans.
    AreaEditorOverdue,
    InitialReviewOverdue,
    ResponseOverdue,
    ResponseEscalation,
    ReportDueSoon,
    ReportOverdue,
    ReportsComplete,
    DecisionOverdue,
    DecisionApprovalOverdue,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::NewSubmission => "new_submission",
            Action::AreaEditorAssigned => "area_editor_assigned",
            Action::AreaEditorUnassigned => "area_editor_unassigned",
            Action::RefereeInvited => "referee_invited",
            Action::RefereeAgreed => "referee_agreed",
            Action::AgreementConfirmation => "agreement_confirmation",
            Action::RefereeDeclined => "referee_declined",
            Action::ReportCompleted => "report_completed",
            Action::ReportThanks => "report_thanks",
            Action::AssignmentCanceled => "assignment_canceled",
            Action::DecisionEntered => "decision_entered",
            Action::DecisionApproved => "decision_approved",
            Action::DecisionApprovedReferee => "decision_approved_referee",
            Action::SubmissionWithdrawn => "submission_withdrawn",
            Action::SubmissionWithdrawnReferee => "submission_withdrawn_referee",
            Action::SubmissionUnarchived => "submission_unarchived",
            Action::AreaEditorOverdue => "area_editor_overdue",
            Action::InitialReviewOverdue => "initial_review_overdue",
            Action::ResponseOverdue => "response_overdue",
            Action::ResponseEscalation => "response_escalation",
            Action::ReportDueSoon => "report_due_soon",
            Action::ReportOverdue => "report_overdue",
            Action::ReportsComplete => "reports_complete",
            Action::DecisionOverdue => "decision_overdue",
            Action::DecisionApprovalOverdue => "decision_approval_overdue",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable trace of one accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRecord {
    pub action: String,
    pub submission_id: Option<SubmissionId>,
    pub assignment_id: Option<AssignmentId>,
    pub created_at: DateTime<Utc>,
}

impl SendRecord {
    pub fn key(&self) -> SendKey {
        SendKey {
            action: self.action.clone(),
            submission_id: self.submission_id,
            assignment_id: self.assignment_id,
        }
    }
}

/// The entity a send record is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SendKey {
    pub action: String,
    pub submission_id: Option<SubmissionId>,
    pub assignment_id: Option<AssignmentId>,
}

impl SendKey {
    pub fn submission(action: Action, submission_id: SubmissionId) -> Self {
        Self {
            action: action.as_str().to_string(),
            submission_id: Some(submission_id),
            assignment_id: None,
        }
    }

    pub fn assignment(
        action: Action,
        submission_id: SubmissionId,
        assignment_id: AssignmentId,
    ) -> Self {
        Self {
            action: action.as_str().to_string(),
            submission_id: Some(submission_id),
            assignment_id: Some(assignment_id),
        }
    }
}

/// A rendered-ready message handed to the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingMessage {
    pub action: Action,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub context: serde_json::Value,
    pub submission_id: Option<SubmissionId>,
    pub assignment_id: Option<AssignmentId>,
}

/// Renders and delivers a message.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn send(&self, message: &OutgoingMessage) -> Result<SendRecord, DispatchError>;
}
