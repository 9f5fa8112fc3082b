use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AreaId, SubmissionId, UserId};
use crate::error::{WorkflowError, WorkflowResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    NoDecision,
    Reject,
    MajorRevisions,
    MinorRevisions,
    Accept,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::NoDecision => "no_decision",
            Decision::Reject => "reject",
            Decision::MajorRevisions => "major_revisions",
            Decision::MinorRevisions => "minor_revisions",
            Decision::Accept => "accept",
        }
    }

    pub fn is_entered(&self) -> bool {
        *self != Decision::NoDecision
    }

    /// Whether the author is invited to resubmit after this decision.
    pub fn invites_revision(&self) -> bool {
        matches!(self, Decision::MajorRevisions | Decision::MinorRevisions)
    }
}

impl std::str::FromStr for Decision {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no_decision" => Ok(Decision::NoDecision),
            "reject" => Ok(Decision::Reject),
            "major_revisions" => Ok(Decision::MajorRevisions),
            "minor_revisions" => Ok(Decision::MinorRevisions),
            "accept" => Ok(Decision::Accept),
            other => Err(WorkflowError::Validation(format!(
                "unknown decision: {other}"
            ))),
        }
    }
}

/// A manuscript version. Every resubmission is its own row, linked to the
/// first version of the chain through `original_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub title: String,
    pub author: UserId,
    pub area: AreaId,
    pub original_id: SubmissionId,
    pub revision_number: i32,
    pub decision: Decision,
    pub decision_approved: bool,
    pub decision_entered_at: Option<DateTime<Utc>>,
    pub decision_comments: Option<String>,
    pub archived: bool,
    pub withdrawn: bool,
    pub sharing_token: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    /// Reviewable: neither archived nor withdrawn.
    pub fn is_active(&self) -> bool {
        !self.archived && !self.withdrawn
    }

    pub fn is_original(&self) -> bool {
        self.id == self.original_id
    }

    /// Records a decision proposed by the area editor. Returns whether the
    /// stored decision changed.
    ///
    /// `decision_entered_at` is only stamped when an already-entered
    /// decision is replaced; the first entry from `NoDecision` leaves it
    /// untouched.
    pub fn enter_decision(
        &mut self,
        decision: Decision,
        comments: Option<String>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<bool> {
        if !decision.is_entered() {
            return Err(WorkflowError::Validation(
                "decision must be one of reject, major_revisions, minor_revisions, accept"
                    .to_string(),
            ));
        }
        if self.decision_approved {
            return Err(WorkflowError::Validation(
                "decision has already been approved".to_string(),
            ));
        }
        if self.withdrawn {
            return Err(WorkflowError::Validation(
                "submission has been withdrawn".to_string(),
            ));
        }

        let changed = decision != self.decision;
        if changed && self.decision.is_entered() {
            self.decision_entered_at = Some(now);
        }
        self.decision = decision;
        self.decision_comments = comments;
        Ok(changed)
    }

    /// Approval archives the submission along with it.
    pub fn approve_decision(&mut self) -> WorkflowResult<()> {
        if !self.decision.is_entered() {
            return Err(WorkflowError::Validation(
                "no decision has been entered".to_string(),
            ));
        }
        if self.decision_approved {
            return Err(WorkflowError::Validation(
                "decision has already been approved".to_string(),
            ));
        }
        self.decision_approved = true;
        self.archived = true;
        Ok(())
    }

    pub fn withdraw(&mut self) -> WorkflowResult<()> {
        if self.withdrawn {
            return Err(WorkflowError::Validation(
                "submission is already withdrawn".to_string(),
            ));
        }
        self.withdrawn = true;
        self.archived = true;
        Ok(())
    }

    pub fn set_archived(&mut self, archived: bool) -> WorkflowResult<()> {
        if !archived && self.decision_approved {
            return Err(WorkflowError::Validation(
                "a submission with an approved decision stays archived".to_string(),
            ));
        }
        self.archived = archived;
        Ok(())
    }
}

/// Fields for a submission about to be inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSubmission {
    pub title: String,
    pub author: UserId,
    pub area: AreaId,
}

impl NewSubmission {
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.title.trim().is_empty() {
            return Err(WorkflowError::Validation("title is required".to_string()));
        }
        if self.title.chars().count() > 500 {
            return Err(WorkflowError::Validation(
                "title must be at most 500 characters".to_string(),
            ));
        }
        Ok(())
    }
}
