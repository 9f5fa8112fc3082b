//! Error types for the editorial workflow.
//!
//! Errors fall into the classes reported by [`WorkflowError::kind`]:
//!
//! - **Validation**: a field value was rejected before any state change.
//! - **StateTransition**: the requested transition is not allowed from the
//!   current state of the entity. Nothing was mutated.
//! - **Resource**: an attachment exceeded its size ceiling.
//! - **Persistence**: the store failed. Multi-step writes are all-or-nothing.
//! - **Dispatch**: the notification gateway failed. A committed state change
//!   is never rolled back because of this.

use thiserror::Error;

use crate::domain::RefereeState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    StateTransition,
    Resource,
    NotFound,
    Persistence,
    Dispatch,
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("referee has already responded to this invitation")]
    AlreadyResponded,

    #[error("report has already been submitted and can no longer be changed")]
    ReportImmutable,

    #[error("referee assignment has been canceled")]
    AssignmentCanceled,

    #[error("a recommendation is required to submit a report")]
    RecommendationRequired,

    #[error("cannot {action} while assignment is {from:?}")]
    InvalidTransition {
        from: RefereeState,
        action: &'static str,
    },

    #[error("attachment is {size_bytes} bytes, limit is {limit} bytes")]
    AttachmentTooLarge { size_bytes: u64, limit: u64 },

    #[error("{0} not found")]
    NotFound(String),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::Validation(_) => ErrorKind::Validation,
            WorkflowError::AlreadyResponded
            | WorkflowError::ReportImmutable
            | WorkflowError::AssignmentCanceled
            | WorkflowError::RecommendationRequired
            | WorkflowError::InvalidTransition { .. } => ErrorKind::StateTransition,
            WorkflowError::AttachmentTooLarge { .. } => ErrorKind::Resource,
            WorkflowError::NotFound(_) => ErrorKind::NotFound,
            WorkflowError::Persistence(_) => ErrorKind::Persistence,
            WorkflowError::Dispatch(_) => ErrorKind::Dispatch,
        }
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        WorkflowError::NotFound(what.to_string())
    }
}

impl From<sqlx::Error> for WorkflowError {
    fn from(err: sqlx::Error) -> Self {
        WorkflowError::Persistence(err.to_string())
    }
}

/// Failure to hand a message to the notification gateway.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("gateway did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("no recipients resolved for action {0}")]
    NoRecipients(&'static str),

    #[error("gateway error: {0}")]
    Gateway(String),
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            WorkflowError::Validation("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            WorkflowError::AlreadyResponded.kind(),
            ErrorKind::StateTransition
        );
        assert_eq!(
            WorkflowError::AttachmentTooLarge {
                size_bytes: 6,
                limit: 5
            }
            .kind(),
            ErrorKind::Resource
        );
        assert_eq!(
            WorkflowError::from(DispatchError::NoRecipients("x")).kind(),
            ErrorKind::Dispatch
        );
    }
}
