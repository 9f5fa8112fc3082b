use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{SubmissionId, UserId};

/// Link between a submission and its area editor. Replacing the editor
/// closes the current link with `replaced_at` and opens a new one, so the
/// history stays queryable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaEditorAssignment {
    pub id: i64,
    pub submission_id: SubmissionId,
    pub editor: UserId,
    pub assigned_at: DateTime<Utc>,
    pub replaced_at: Option<DateTime<Utc>>,
}

impl AreaEditorAssignment {
    pub fn is_current(&self) -> bool {
        self.replaced_at.is_none()
    }
}

/// Result of assigning an area editor: who held the submission before.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AreaEditorChange {
    pub previous: Option<UserId>,
    pub current: AreaEditorAssignment,
}

impl AreaEditorChange {
    pub fn is_reassignment(&self) -> bool {
        self.previous.is_some_and(|prev| prev != self.current.editor)
    }
}
