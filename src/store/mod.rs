//! Persistence seam.
//!
//! [`PgStore`] is the production backend; [`MemoryStore`] backs the tests
//! and local runs with `DATABASE_URL=memory`.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    days, AreaEditorAssignment, AreaEditorChange, AssignmentChange, AssignmentId,
    DurationSettings, NewRefereeAssignment, NewSubmission, RefereeAssignment, Submission,
    SubmissionId, User, UserId,
};
use crate::error::WorkflowResult;
use crate::notify::{SendKey, SendRecord};

/// How far back an existing send record blocks a new one for the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendWindow {
    /// No guard: immediate notifications are logged, never deduplicated.
    Unguarded,
    /// Any earlier record blocks.
    Ever,
    /// Only a record younger than this many days blocks.
    NotWithinDays(i32),
}

impl SendWindow {
    /// Records created after this instant block a new send. `None` means
    /// every record blocks.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            SendWindow::Unguarded | SendWindow::Ever => None,
            SendWindow::NotWithinDays(n) => Some(now - days(*n)),
        }
    }

    pub fn blocks(&self, last: Option<&SendRecord>, now: DateTime<Utc>) -> bool {
        let Some(last) = last else {
            return false;
        };
        match self {
            SendWindow::Unguarded => false,
            SendWindow::Ever => true,
            SendWindow::NotWithinDays(_) => self.cutoff(now).is_some_and(|c| last.created_at > c),
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Loads the duration settings, creating the default row if missing.
    async fn settings(&self) -> WorkflowResult<DurationSettings>;
    async fn save_settings(&self, settings: &DurationSettings) -> WorkflowResult<()>;

    async fn create_user(
        &self,
        name: &str,
        email: &str,
        is_managing_editor: bool,
    ) -> WorkflowResult<User>;
    async fn user(&self, id: UserId) -> WorkflowResult<Option<User>>;
    async fn managing_editors(&self) -> WorkflowResult<Vec<User>>;

    async fn create_submission(
        &self,
        new: &NewSubmission,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Submission>;
    async fn submission(&self, id: SubmissionId) -> WorkflowResult<Option<Submission>>;
    async fn update_submission(&self, submission: &Submission) -> WorkflowResult<()>;
    /// Submissions that are neither archived nor withdrawn.
    async fn active_submissions(&self) -> WorkflowResult<Vec<Submission>>;
    async fn revision_chain(&self, original_id: SubmissionId) -> WorkflowResult<Vec<Submission>>;
    async fn latest_version_number(&self, original_id: SubmissionId) -> WorkflowResult<i32>;
    /// Inserts the next version of `predecessor_id` and archives the
    /// predecessor in one transaction. The revision number is taken from
    /// the chain at commit time.
    async fn submit_revision(
        &self,
        predecessor_id: SubmissionId,
        new: &NewSubmission,
        carry_area_editor: Option<UserId>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Submission>;

    async fn area_editor(
        &self,
        submission_id: SubmissionId,
    ) -> WorkflowResult<Option<AreaEditorAssignment>>;
    /// Replaces the current link (if any) and rotates the sharing token.
    async fn assign_area_editor(
        &self,
        submission_id: SubmissionId,
        editor: UserId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<AreaEditorChange>;

    async fn create_assignment(
        &self,
        new: &NewRefereeAssignment,
    ) -> WorkflowResult<RefereeAssignment>;
    async fn assignment(&self, id: AssignmentId) -> WorkflowResult<Option<RefereeAssignment>>;
    /// Writes the columns `change` owns, provided the stored row still
    /// admits it. Returns whether the row was written.
    async fn update_assignment(
        &self,
        assignment: &RefereeAssignment,
        change: AssignmentChange,
    ) -> WorkflowResult<bool>;
    /// Every assignment of a submission, canceled ones included.
    async fn assignments_for(
        &self,
        submission_id: SubmissionId,
    ) -> WorkflowResult<Vec<RefereeAssignment>>;

    async fn last_send(&self, key: &SendKey) -> WorkflowResult<Option<SendRecord>>;
    /// Inserts the record unless `window` is blocked by an existing one.
    /// Returns whether a row was written.
    async fn record_send(&self, record: &SendRecord, window: SendWindow) -> WorkflowResult<bool>;
    /// Moves the report deadline and records the reminder announcing it,
    /// atomically.
    async fn record_send_with_deadline(
        &self,
        record: &SendRecord,
        window: SendWindow,
        assignment_id: AssignmentId,
        report_due_at: DateTime<Utc>,
    ) -> WorkflowResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::t0;
    use chrono::Duration;

    fn record(at: DateTime<Utc>) -> SendRecord {
        SendRecord {
            action: "x".into(),
            submission_id: Some(1),
            assignment_id: None,
            created_at: at,
        }
    }

    #[test]
    fn ever_blocks_any_record() {
        let r = record(t0() - Duration::days(400));
        assert!(SendWindow::Ever.blocks(Some(&r), t0()));
        assert!(!SendWindow::Ever.blocks(None, t0()));
        assert!(!SendWindow::Unguarded.blocks(Some(&r), t0()));
    }

    #[test]
    fn cooldown_blocks_recent_records_only() {
        let window = SendWindow::NotWithinDays(2);
        assert!(window.blocks(Some(&record(t0() - Duration::days(1))), t0()));
        assert!(!window.blocks(Some(&record(t0() - Duration::days(3))), t0()));
    }
}
