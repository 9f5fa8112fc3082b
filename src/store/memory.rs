use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{SendWindow, Store};
use crate::domain::{
    AreaEditorAssignment, AreaEditorChange, AssignmentChange, AssignmentId, Decision,
    DurationSettings, NewRefereeAssignment, NewSubmission, RefereeAssignment, Submission,
    SubmissionId, User, UserId,
};
use crate::error::{WorkflowError, WorkflowResult};
use crate::notify::{SendKey, SendRecord};

#[derive(Default)]
struct Tables {
    settings: Option<DurationSettings>,
    users: Vec<User>,
    submissions: Vec<Submission>,
    area_editors: Vec<AreaEditorAssignment>,
    assignments: Vec<RefereeAssignment>,
    sends: Vec<SendRecord>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn submission_mut(&mut self, id: SubmissionId) -> WorkflowResult<&mut Submission> {
        self.submissions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| WorkflowError::not_found(format!("submission {id}")))
    }

    fn last_send(&self, key: &SendKey) -> Option<&SendRecord> {
        self.sends
            .iter()
            .filter(|r| r.key() == *key)
            .max_by_key(|r| r.created_at)
    }

    fn insert_send(&mut self, record: &SendRecord, window: SendWindow) -> bool {
        if window.blocks(self.last_send(&record.key()), record.created_at) {
            return false;
        }
        self.sends.push(record.clone());
        true
    }

    fn insert_submission(&mut self, new: &NewSubmission, now: DateTime<Utc>) -> Submission {
        let id = self.next_id();
        let submission = Submission {
            id,
            title: new.title.clone(),
            author: new.author,
            area: new.area,
            original_id: id,
            revision_number: 0,
            decision: Decision::NoDecision,
            decision_approved: false,
            decision_entered_at: None,
            decision_comments: None,
            archived: false,
            withdrawn: false,
            sharing_token: Uuid::new_v4(),
            created_at: now,
        };
        self.submissions.push(submission.clone());
        submission
    }

    fn link_area_editor(
        &mut self,
        submission_id: SubmissionId,
        editor: UserId,
        now: DateTime<Utc>,
    ) -> AreaEditorChange {
        let mut previous = None;
        for link in self
            .area_editors
            .iter_mut()
            .filter(|l| l.submission_id == submission_id && l.is_current())
        {
            previous = Some(link.editor);
            link.replaced_at = Some(now);
        }
        let current = AreaEditorAssignment {
            id: self.next_id(),
            submission_id,
            editor,
            assigned_at: now,
            replaced_at: None,
        };
        self.area_editors.push(current.clone());
        AreaEditorChange { previous, current }
    }
}

/// Store kept in process memory behind one lock. Every operation is
/// atomic with respect to the others.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write fail with a persistence error until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_writable(&self) -> WorkflowResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(WorkflowError::Persistence(
                "memory store is failing writes".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn send_records(&self) -> Vec<SendRecord> {
        self.tables.lock().await.sends.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn settings(&self) -> WorkflowResult<DurationSettings> {
        let mut tables = self.tables.lock().await;
        Ok(tables.settings.get_or_insert_with(Default::default).clone())
    }

    async fn save_settings(&self, settings: &DurationSettings) -> WorkflowResult<()> {
        self.check_writable()?;
        settings.validate()?;
        self.tables.lock().await.settings = Some(settings.clone());
        Ok(())
    }

    async fn create_user(
        &self,
        name: &str,
        email: &str,
        is_managing_editor: bool,
    ) -> WorkflowResult<User> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        if tables.users.iter().any(|u| u.email == email) {
            return Err(WorkflowError::Validation(format!(
                "a user with email {email} already exists"
            )));
        }
        let user = User {
            id: tables.next_id(),
            name: name.to_string(),
            email: email.to_string(),
            is_managing_editor,
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn user(&self, id: UserId) -> WorkflowResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.iter().find(|u| u.id == id).cloned())
    }

    async fn managing_editors(&self) -> WorkflowResult<Vec<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .iter()
            .filter(|u| u.is_managing_editor)
            .cloned()
            .collect())
    }

    async fn create_submission(
        &self,
        new: &NewSubmission,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Submission> {
        self.check_writable()?;
        Ok(self.tables.lock().await.insert_submission(new, now))
    }

    async fn submission(&self, id: SubmissionId) -> WorkflowResult<Option<Submission>> {
        let tables = self.tables.lock().await;
        Ok(tables.submissions.iter().find(|s| s.id == id).cloned())
    }

    async fn update_submission(&self, submission: &Submission) -> WorkflowResult<()> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        *tables.submission_mut(submission.id)? = submission.clone();
        Ok(())
    }

    async fn active_submissions(&self) -> WorkflowResult<Vec<Submission>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .submissions
            .iter()
            .filter(|s| s.is_active())
            .cloned()
            .collect())
    }

    async fn revision_chain(&self, original_id: SubmissionId) -> WorkflowResult<Vec<Submission>> {
        let tables = self.tables.lock().await;
        let mut chain: Vec<Submission> = tables
            .submissions
            .iter()
            .filter(|s| s.original_id == original_id)
            .cloned()
            .collect();
        chain.sort_by_key(|s| s.revision_number);
        Ok(chain)
    }

    async fn latest_version_number(&self, original_id: SubmissionId) -> WorkflowResult<i32> {
        let tables = self.tables.lock().await;
        Ok(tables
            .submissions
            .iter()
            .filter(|s| s.original_id == original_id)
            .map(|s| s.revision_number)
            .max()
            .unwrap_or(0))
    }

    async fn submit_revision(
        &self,
        predecessor_id: SubmissionId,
        new: &NewSubmission,
        carry_area_editor: Option<UserId>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Submission> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;

        let predecessor = tables.submission_mut(predecessor_id)?;
        predecessor.archived = true;
        let original_id = predecessor.original_id;

        let latest = tables
            .submissions
            .iter()
            .filter(|s| s.original_id == original_id)
            .map(|s| s.revision_number)
            .max()
            .unwrap_or(0);

        let mut revision = tables.insert_submission(new, now);
        revision.original_id = original_id;
        revision.revision_number = latest + 1;
        *tables.submission_mut(revision.id)? = revision.clone();

        if let Some(editor) = carry_area_editor {
            tables.link_area_editor(revision.id, editor, now);
        }
        Ok(revision)
    }

    async fn area_editor(
        &self,
        submission_id: SubmissionId,
    ) -> WorkflowResult<Option<AreaEditorAssignment>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .area_editors
            .iter()
            .find(|l| l.submission_id == submission_id && l.is_current())
            .cloned())
    }

    async fn assign_area_editor(
        &self,
        submission_id: SubmissionId,
        editor: UserId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<AreaEditorChange> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        tables.submission_mut(submission_id)?.sharing_token = Uuid::new_v4();
        Ok(tables.link_area_editor(submission_id, editor, now))
    }

    async fn create_assignment(
        &self,
        new: &NewRefereeAssignment,
    ) -> WorkflowResult<RefereeAssignment> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let clash = tables.assignments.iter().any(|a| {
            a.submission_id == new.submission_id
                && !a.canceled
                && (a.referee == new.referee || a.referee_letter == new.referee_letter)
        });
        if clash {
            return Err(new.conflict_error());
        }
        let assignment = RefereeAssignment {
            id: tables.next_id(),
            referee: new.referee,
            submission_id: new.submission_id,
            agreed: None,
            canceled: false,
            decline_comment: None,
            recommendation: None,
            comments_for_editor: None,
            attachment_for_editor: None,
            comments_for_author: None,
            attachment_for_author: None,
            report_completed: false,
            referee_letter: new.referee_letter.clone(),
            assigned_at: new.assigned_at,
            response_due_at: new.response_due_at,
            agreed_at: None,
            declined_at: None,
            report_due_at: None,
            report_originally_due_at: None,
            report_completed_at: None,
        };
        tables.assignments.push(assignment.clone());
        Ok(assignment)
    }

    async fn assignment(&self, id: AssignmentId) -> WorkflowResult<Option<RefereeAssignment>> {
        let tables = self.tables.lock().await;
        Ok(tables.assignments.iter().find(|a| a.id == id).cloned())
    }

    async fn update_assignment(
        &self,
        assignment: &RefereeAssignment,
        change: AssignmentChange,
    ) -> WorkflowResult<bool> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let slot = tables
            .assignments
            .iter_mut()
            .find(|a| a.id == assignment.id)
            .ok_or_else(|| WorkflowError::not_found(format!("assignment {}", assignment.id)))?;
        if !change.applies_to(slot) {
            return Ok(false);
        }
        change.apply(assignment, slot);
        Ok(true)
    }

    async fn assignments_for(
        &self,
        submission_id: SubmissionId,
    ) -> WorkflowResult<Vec<RefereeAssignment>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .assignments
            .iter()
            .filter(|a| a.submission_id == submission_id)
            .cloned()
            .collect())
    }

    async fn last_send(&self, key: &SendKey) -> WorkflowResult<Option<SendRecord>> {
        Ok(self.tables.lock().await.last_send(key).cloned())
    }

    async fn record_send(&self, record: &SendRecord, window: SendWindow) -> WorkflowResult<bool> {
        self.check_writable()?;
        Ok(self.tables.lock().await.insert_send(record, window))
    }

    async fn record_send_with_deadline(
        &self,
        record: &SendRecord,
        window: SendWindow,
        assignment_id: AssignmentId,
        report_due_at: DateTime<Utc>,
    ) -> WorkflowResult<bool> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let index = tables
            .assignments
            .iter()
            .position(|a| a.id == assignment_id)
            .ok_or_else(|| WorkflowError::not_found(format!("assignment {assignment_id}")))?;
        if !tables.insert_send(record, window) {
            return Ok(false);
        }
        tables.assignments[index].report_due_at = Some(report_due_at);
        Ok(true)
    }
}
