//! Editorial workflow domain: submissions, revision chains, referee
//! assignments, the derived review stage and its deadlines.

mod area_editor;
pub mod deadline;
mod referee;
pub mod revision;
mod settings;
pub mod stage;
mod submission;

pub use area_editor::{AreaEditorAssignment, AreaEditorChange};
pub use referee::{
    next_referee_letter, AssignmentChange, Attachment, NewRefereeAssignment, Recommendation, RefereeAssignment,
    RefereeState, ReportSubmission, MAX_ATTACHMENT_BYTES,
};
pub use settings::{days, DurationSettings};
pub use stage::{has_enough_referees, resolve_stage, Stage, StageSnapshot};
pub use submission::{Decision, NewSubmission, Submission};

use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type AreaId = i64;
pub type SubmissionId = i64;
pub type AssignmentId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub is_managing_editor: bool,
}
