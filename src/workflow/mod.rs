//! Editorial actions.
//!
//! Every method validates, persists the change, then sends the immediate
//! notifications that go with it. Notification failures are logged and
//! never undo a committed change.


use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::domain::revision::{
    prepare_revision, previous_revision, previous_versions, RevisionRequest,
};
use crate::domain::{
    next_referee_letter, AreaEditorChange, AssignmentChange, AssignmentId, Decision,
    DurationSettings, NewRefereeAssignment, NewSubmission, RefereeAssignment, ReportSubmission,
    Submission, SubmissionId, User, UserId,
};
use crate::error::{WorkflowError, WorkflowResult};
use crate::notify::{Action, Notice, Notifier, SendKey};
use crate::review::{ReviewContext, SubmissionView};
use crate::scan::ScanEngine;
use crate::store::Store;

#[derive(Clone)]
pub struct Desk {
    store: Arc<dyn Store>,
    notifier: Notifier,
    scans: ScanEngine,
}

impl Desk {
    pub fn new(store: Arc<dyn Store>, notifier: Notifier, scans: ScanEngine) -> Self {
        Self {
            store,
            notifier,
            scans,
        }
    }

    async fn load_submission(&self, id: SubmissionId) -> WorkflowResult<Submission> {
        self.store
            .submission(id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("submission {id}")))
    }

    async fn load_assignment(&self, id: AssignmentId) -> WorkflowResult<RefereeAssignment> {
        self.store
            .assignment(id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("assignment {id}")))
    }

    async fn load_user(&self, id: UserId) -> WorkflowResult<User> {
        self.store
            .user(id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("user {id}")))
    }

    async fn area_editor_of(&self, submission_id: SubmissionId) -> WorkflowResult<Option<UserId>> {
        Ok(self
            .store
            .area_editor(submission_id)
            .await?
            .map(|link| link.editor))
    }

    /// Persists a transition computed on `assignment`. When a concurrent
    /// write got there first, the caller gets the error the transition
    /// raises against the stored row.
    async fn commit_assignment(
        &self,
        assignment: &RefereeAssignment,
        change: AssignmentChange,
    ) -> WorkflowResult<()> {
        if self.store.update_assignment(assignment, change).await? {
            return Ok(());
        }
        let stored = self.load_assignment(assignment.id).await?;
        Err(change.conflict(&stored))
    }

    fn require_active(submission: &Submission) -> WorkflowResult<()> {
        if !submission.is_active() {
            return Err(WorkflowError::Validation(format!(
                "submission {} is archived or withdrawn",
                submission.id
            )));
        }
        Ok(())
    }

    pub async fn register_user(
        &self,
        name: &str,
        email: &str,
        is_managing_editor: bool,
    ) -> WorkflowResult<User> {
        if name.trim().is_empty() {
            return Err(WorkflowError::Validation("name is required".to_string()));
        }
        if !email.contains('@') {
            return Err(WorkflowError::Validation(format!(
                "{email} is not an email address"
            )));
        }
        self.store
            .create_user(name.trim(), email.trim(), is_managing_editor)
            .await
    }

    pub async fn settings(&self) -> WorkflowResult<DurationSettings> {
        self.store.settings().await
    }

    pub async fn update_settings(&self, settings: DurationSettings) -> WorkflowResult<DurationSettings> {
        settings.validate()?;
        self.store.save_settings(&settings).await?;
        info!("duration settings updated");
        Ok(settings)
    }

    pub async fn submit(&self, new: NewSubmission, now: DateTime<Utc>) -> WorkflowResult<Submission> {
        new.validate()?;
        self.load_user(new.author).await?;
        let submission = self.store.create_submission(&new, now).await?;
        info!(submission_id = submission.id, "submission received");

        self.notifier
            .notify(Notice::for_submission(Action::NewSubmission, &submission, None), now)
            .await;
        Ok(submission)
    }

    /// Links `editor` to the submission, replacing any current area
    /// editor. Both the new and the replaced editor are told.
    pub async fn assign_area_editor(
        &self,
        submission_id: SubmissionId,
        editor: UserId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<AreaEditorChange> {
        let submission = self.load_submission(submission_id).await?;
        Self::require_active(&submission)?;
        self.load_user(editor).await?;
        if self.area_editor_of(submission_id).await? == Some(editor) {
            return Err(WorkflowError::Validation(format!(
                "user {editor} is already the area editor"
            )));
        }

        let change = self
            .store
            .assign_area_editor(submission_id, editor, now)
            .await?;
        info!(submission_id, editor, previous = ?change.previous, "area editor assigned");

        // Token rotated with the link.
        let submission = self.load_submission(submission_id).await?;
        self.notifier
            .notify(
                Notice::for_submission(Action::AreaEditorAssigned, &submission, Some(editor)),
                now,
            )
            .await;
        if change.is_reassignment() {
            self.notifier
                .notify(
                    Notice::for_submission(
                        Action::AreaEditorUnassigned,
                        &submission,
                        change.previous,
                    ),
                    now,
                )
                .await;
        }
        Ok(change)
    }

    pub async fn invite_referee(
        &self,
        submission_id: SubmissionId,
        referee: UserId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<RefereeAssignment> {
        let submission = self.load_submission(submission_id).await?;
        Self::require_active(&submission)?;
        if submission.decision.is_entered() {
            return Err(WorkflowError::Validation(
                "a decision has already been entered".to_string(),
            ));
        }
        self.load_user(referee).await?;

        let current = self.store.assignments_for(submission_id).await?;
        if current.iter().any(|a| a.referee == referee && !a.canceled) {
            return Err(WorkflowError::Validation(format!(
                "user {referee} has already been invited"
            )));
        }
        let chain = self.store.revision_chain(submission.original_id).await?;
        let previous = match previous_revision(&submission, &chain) {
            Some(prior) => self.store.assignments_for(prior.id).await?,
            None => Vec::new(),
        };
        let letter = next_referee_letter(referee, &current, &previous)?;

        let settings = self.store.settings().await?;
        let new = NewRefereeAssignment::invite(referee, submission_id, letter, &settings, now);
        let assignment = self.store.create_assignment(&new).await?;
        info!(
            submission_id,
            assignment_id = assignment.id,
            letter = %assignment.referee_letter,
            "referee invited"
        );

        let area_editor = self.area_editor_of(submission_id).await?;
        self.notifier
            .notify(
                Notice::for_assignment(Action::RefereeInvited, &submission, &assignment, area_editor)
                    .with_details(serde_json::json!({ "response_due_at": assignment.response_due_at })),
                now,
            )
            .await;
        Ok(assignment)
    }

    pub async fn respond(
        &self,
        assignment_id: AssignmentId,
        agreed: bool,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<RefereeAssignment> {
        let mut assignment = self.load_assignment(assignment_id).await?;
        let submission = self.load_submission(assignment.submission_id).await?;
        Self::require_active(&submission)?;
        let settings = self.store.settings().await?;

        assignment.respond(agreed, comment, &settings, now)?;
        self.commit_assignment(&assignment, AssignmentChange::Response).await?;
        info!(assignment_id, agreed, "referee responded");

        let area_editor = self.area_editor_of(submission.id).await?;
        if agreed {
            self.notifier
                .notify(
                    Notice::for_assignment(Action::RefereeAgreed, &submission, &assignment, area_editor),
                    now,
                )
                .await;
            self.notifier
                .notify(
                    Notice::for_assignment(
                        Action::AgreementConfirmation,
                        &submission,
                        &assignment,
                        area_editor,
                    )
                    .with_details(serde_json::json!({ "report_due_at": assignment.report_due_at })),
                    now,
                )
                .await;
        } else {
            self.notifier
                .notify(
                    Notice::for_assignment(
                        Action::RefereeDeclined,
                        &submission,
                        &assignment,
                        area_editor,
                    ),
                    now,
                )
                .await;
        }
        Ok(assignment)
    }

    pub async fn save_draft(
        &self,
        assignment_id: AssignmentId,
        report: ReportSubmission,
    ) -> WorkflowResult<RefereeAssignment> {
        let mut assignment = self.load_assignment(assignment_id).await?;
        assignment.save_draft(report)?;
        self.commit_assignment(&assignment, AssignmentChange::Report).await?;
        Ok(assignment)
    }

    /// Completes the report. When this makes enough reports complete, the
    /// area editor is told straight away instead of on the next scan.
    pub async fn submit_report(
        &self,
        assignment_id: AssignmentId,
        report: ReportSubmission,
        now: DateTime<Utc>,
    ) -> WorkflowResult<RefereeAssignment> {
        let mut assignment = self.load_assignment(assignment_id).await?;
        let submission = self.load_submission(assignment.submission_id).await?;

        assignment.submit_report(report, now)?;
        self.commit_assignment(&assignment, AssignmentChange::Report).await?;
        info!(
            assignment_id,
            submission_id = submission.id,
            recommendation = ?assignment.recommendation,
            "report submitted"
        );

        let area_editor = self.area_editor_of(submission.id).await?;
        self.notifier
            .notify(
                Notice::for_assignment(Action::ReportCompleted, &submission, &assignment, area_editor),
                now,
            )
            .await;
        self.notifier
            .notify(
                Notice::for_assignment(Action::ReportThanks, &submission, &assignment, area_editor),
                now,
            )
            .await;
        if let Err(e) = self.scans.reports_complete_for(submission.id, now).await {
            warn!(submission_id = submission.id, error = %e, "reports-complete check failed");
        }
        Ok(assignment)
    }

    pub async fn cancel_assignment(
        &self,
        assignment_id: AssignmentId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<RefereeAssignment> {
        let mut assignment = self.load_assignment(assignment_id).await?;
        let was_canceled = assignment.canceled;
        let notify_referee = assignment.cancel()?;
        if was_canceled {
            return Ok(assignment);
        }
        if !self
            .store
            .update_assignment(&assignment, AssignmentChange::Cancel)
            .await?
        {
            let stored = self.load_assignment(assignment_id).await?;
            if stored.canceled {
                return Ok(stored);
            }
            return Err(AssignmentChange::Cancel.conflict(&stored));
        }
        info!(assignment_id, notify_referee, "assignment canceled");

        if notify_referee {
            let submission = self.load_submission(assignment.submission_id).await?;
            let area_editor = self.area_editor_of(submission.id).await?;
            self.notifier
                .notify(
                    Notice::for_assignment(
                        Action::AssignmentCanceled,
                        &submission,
                        &assignment,
                        area_editor,
                    ),
                    now,
                )
                .await;
        }
        Ok(assignment)
    }

    pub async fn enter_decision(
        &self,
        submission_id: SubmissionId,
        decision: Decision,
        comments: Option<String>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Submission> {
        let mut submission = self.load_submission(submission_id).await?;
        Self::require_active(&submission)?;
        let changed = submission.enter_decision(decision, comments, now)?;
        self.store.update_submission(&submission).await?;
        info!(submission_id, decision = decision.as_str(), changed, "decision entered");

        if changed {
            let area_editor = self.area_editor_of(submission_id).await?;
            self.notifier
                .notify(
                    Notice::for_submission(Action::DecisionEntered, &submission, area_editor)
                        .with_details(serde_json::json!({ "decision": decision.as_str() })),
                    now,
                )
                .await;
        }
        Ok(submission)
    }

    /// Approves the entered decision, archiving the submission. The author
    /// is told, and every referee who reported on this version or an
    /// earlier one is thanked once across the whole chain.
    pub async fn approve_decision(
        &self,
        submission_id: SubmissionId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Submission> {
        let mut submission = self.load_submission(submission_id).await?;
        if submission.withdrawn {
            return Err(WorkflowError::Validation(
                "submission has been withdrawn".to_string(),
            ));
        }
        submission.approve_decision()?;
        self.store.update_submission(&submission).await?;
        info!(submission_id, decision = submission.decision.as_str(), "decision approved");

        let area_editor = self.area_editor_of(submission_id).await?;
        let details = serde_json::json!({ "decision": submission.decision.as_str() });
        self.notifier
            .notify(
                Notice::for_submission(Action::DecisionApproved, &submission, area_editor)
                    .with_details(details.clone()),
                now,
            )
            .await;

        for assignment in self.referees_to_thank(&submission).await? {
            self.notifier
                .notify(
                    Notice::for_assignment(
                        Action::DecisionApprovedReferee,
                        &submission,
                        &assignment,
                        area_editor,
                    )
                    .with_details(details.clone()),
                    now,
                )
                .await;
        }
        Ok(submission)
    }

    /// Latest completed assignment per referee across this version and the
    /// ones before it, leaving out reports an earlier approval in the chain
    /// already thanked for.
    async fn referees_to_thank(
        &self,
        submission: &Submission,
    ) -> WorkflowResult<Vec<RefereeAssignment>> {
        let chain = self.store.revision_chain(submission.original_id).await?;
        let versions: Vec<&Submission> = chain
            .iter()
            .filter(|v| v.revision_number <= submission.revision_number)
            .collect();

        let mut completed = Vec::new();
        for version in &versions {
            for assignment in self.store.assignments_for(version.id).await? {
                if assignment.report_completed {
                    completed.push((version.revision_number, assignment));
                }
            }
        }

        let mut thanked: HashSet<AssignmentId> = HashSet::new();
        for version in versions.iter().filter(|v| v.id != submission.id) {
            for (_, assignment) in &completed {
                let key = SendKey::assignment(
                    Action::DecisionApprovedReferee,
                    version.id,
                    assignment.id,
                );
                if self.store.last_send(&key).await?.is_some() {
                    thanked.insert(assignment.id);
                }
            }
        }

        let mut latest: HashMap<UserId, (i32, RefereeAssignment)> = HashMap::new();
        for (revision, assignment) in completed {
            let newer = latest
                .get(&assignment.referee)
                .map_or(true, |(rev, _)| revision > *rev);
            if newer {
                latest.insert(assignment.referee, (revision, assignment));
            }
        }
        latest.retain(|_, (_, a)| !thanked.contains(&a.id));
        let mut assignments: Vec<RefereeAssignment> =
            latest.into_values().map(|(_, a)| a).collect();
        assignments.sort_by_key(|a| a.id);
        Ok(assignments)
    }

    pub async fn withdraw(
        &self,
        submission_id: SubmissionId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Submission> {
        let mut submission = self.load_submission(submission_id).await?;
        submission.withdraw()?;
        self.store.update_submission(&submission).await?;
        info!(submission_id, "submission withdrawn");

        let area_editor = self.area_editor_of(submission_id).await?;
        self.notifier
            .notify(
                Notice::for_submission(Action::SubmissionWithdrawn, &submission, area_editor),
                now,
            )
            .await;
        let assignments = self.store.assignments_for(submission_id).await?;
        for assignment in assignments.iter().filter(|a| a.is_active()) {
            self.notifier
                .notify(
                    Notice::for_assignment(
                        Action::SubmissionWithdrawnReferee,
                        &submission,
                        assignment,
                        area_editor,
                    ),
                    now,
                )
                .await;
        }
        Ok(submission)
    }

    pub async fn set_archived(
        &self,
        submission_id: SubmissionId,
        archived: bool,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Submission> {
        let mut submission = self.load_submission(submission_id).await?;
        if submission.archived == archived {
            return Ok(submission);
        }
        if !archived && submission.withdrawn {
            return Err(WorkflowError::Validation(
                "a withdrawn submission stays archived".to_string(),
            ));
        }
        submission.set_archived(archived)?;
        self.store.update_submission(&submission).await?;
        info!(submission_id, archived, "archive flag changed");

        if !archived {
            let area_editor = self.area_editor_of(submission_id).await?;
            self.notifier
                .notify(
                    Notice::for_submission(Action::SubmissionUnarchived, &submission, area_editor),
                    now,
                )
                .await;
        }
        Ok(submission)
    }

    /// Creates the next version and archives `predecessor_id` together.
    /// The area editor carries over; referees are invited afresh.
    pub async fn submit_revision(
        &self,
        predecessor_id: SubmissionId,
        request: RevisionRequest,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Submission> {
        let predecessor = self.load_submission(predecessor_id).await?;
        let chain = self.store.revision_chain(predecessor.original_id).await?;
        let new = prepare_revision(&predecessor, &chain, request)?;
        let area_editor = self.area_editor_of(predecessor_id).await?;

        let revision = self
            .store
            .submit_revision(predecessor_id, &new, area_editor, now)
            .await?;
        info!(
            submission_id = revision.id,
            original_id = revision.original_id,
            revision_number = revision.revision_number,
            "revision submitted"
        );

        self.notifier
            .notify(
                Notice::for_submission(Action::NewSubmission, &revision, area_editor)
                    .with_details(serde_json::json!({ "revision_number": revision.revision_number })),
                now,
            )
            .await;
        Ok(revision)
    }

    pub async fn view(
        &self,
        submission_id: SubmissionId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<SubmissionView> {
        let submission = self.load_submission(submission_id).await?;
        let settings = self.store.settings().await?;
        let chain = self.store.revision_chain(submission.original_id).await?;
        let latest = self
            .store
            .latest_version_number(submission.original_id)
            .await?;
        let ctx = ReviewContext::load(self.store.as_ref(), submission, &settings).await?;

        Ok(SubmissionView {
            stage: ctx.stage,
            area_editor: ctx.area_editor,
            has_enough_referees: ctx.has_enough_referees(),
            is_latest_version: ctx.submission.revision_number == latest,
            previous_versions: previous_versions(&ctx.submission, &chain)
                .into_iter()
                .map(|s| s.id)
                .collect(),
            overdue: ctx.overdue(&settings, now),
            assignments: ctx.assignments,
            submission: ctx.submission,
        })
    }
}
