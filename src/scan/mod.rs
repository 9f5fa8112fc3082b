//! Reminder scans.
//!
//! Each scan selects candidates from the active submissions, drops those
//! whose send record is still inside the scan's idempotency window, then
//! dispatches and records one notification per remaining candidate. A
//! failed dispatch leaves no record, so the candidate comes back on the
//! next run.
//!
//! Runs of the same scan are serialised by a per-scan lock; an overlapping
//! run is skipped. The store's window check on insert catches what the lock
//! cannot, such as a second process.

mod scheduler;
#[cfg(test)]
mod tests;

pub use scheduler::spawn_scans;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::domain::deadline::{
    area_editor_assignment_overdue, decision_approval_overdue, decision_overdue,
    initial_review_overdue, report_due_soon, report_overdue, response_escalation_due,
    response_reminder_due,
};
use crate::domain::{AssignmentId, DurationSettings, RefereeAssignment, SubmissionId};
use crate::error::{WorkflowError, WorkflowResult};
use crate::notify::{Action, Notice, Notifier, SendKey};
use crate::review::ReviewContext;
use crate::store::{SendWindow, Store};

/// Decision reminders repeat at most this often.
const DECISION_OVERDUE_COOLDOWN_DAYS: i32 = 2;
const APPROVAL_OVERDUE_COOLDOWN_DAYS: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
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

impl ScanKind {
    pub const ALL: [ScanKind; 9] = [
        ScanKind::AreaEditorOverdue,
        ScanKind::InitialReviewOverdue,
        ScanKind::ResponseOverdue,
        ScanKind::ResponseEscalation,
        ScanKind::ReportDueSoon,
        ScanKind::ReportOverdue,
        ScanKind::ReportsComplete,
        ScanKind::DecisionOverdue,
        ScanKind::DecisionApprovalOverdue,
    ];

    /// The notification this scan sends.
    pub fn action(&self) -> Action {
        match self {
            ScanKind::AreaEditorOverdue => Action::AreaEditorOverdue,
            ScanKind::InitialReviewOverdue => Action::InitialReviewOverdue,
            ScanKind::ResponseOverdue => Action::ResponseOverdue,
            ScanKind::ResponseEscalation => Action::ResponseEscalation,
            ScanKind::ReportDueSoon => Action::ReportDueSoon,
            ScanKind::ReportOverdue => Action::ReportOverdue,
            ScanKind::ReportsComplete => Action::ReportsComplete,
            ScanKind::DecisionOverdue => Action::DecisionOverdue,
            ScanKind::DecisionApprovalOverdue => Action::DecisionApprovalOverdue,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.action().as_str()
    }

    fn window(&self, settings: &DurationSettings) -> SendWindow {
        match self {
            ScanKind::AreaEditorOverdue
            | ScanKind::ResponseOverdue
            | ScanKind::ResponseEscalation
            | ScanKind::ReportDueSoon
            | ScanKind::ReportsComplete => SendWindow::Ever,
            ScanKind::InitialReviewOverdue => {
                SendWindow::NotWithinDays(settings.days_to_remind_area_editor)
            }
            ScanKind::ReportOverdue => {
                SendWindow::NotWithinDays(settings.days_to_remind_overdue_referee)
            }
            ScanKind::DecisionOverdue => SendWindow::NotWithinDays(DECISION_OVERDUE_COOLDOWN_DAYS),
            ScanKind::DecisionApprovalOverdue => {
                SendWindow::NotWithinDays(APPROVAL_OVERDUE_COOLDOWN_DAYS)
            }
        }
    }
}

impl std::fmt::Display for ScanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanKind {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScanKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| WorkflowError::Validation(format!("unknown scan: {s}")))
    }
}

/// Counts from one scan run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub scan: ScanKind,
    pub candidates: usize,
    pub dispatched: usize,
    /// Still inside the idempotency window.
    pub skipped: usize,
    pub failed: usize,
    /// Another run of the same scan held the lock; nothing was done.
    pub overlapped: bool,
}

impl ScanReport {
    fn new(scan: ScanKind) -> Self {
        Self {
            scan,
            candidates: 0,
            dispatched: 0,
            skipped: 0,
            failed: 0,
            overlapped: false,
        }
    }

    fn count(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Dispatched => self.dispatched += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Dispatched,
    Skipped,
    Failed,
}

/// One notification a scan wants to send.
#[derive(Debug, Clone)]
struct Candidate {
    notice: Notice,
    key: SendKey,
    window: SendWindow,
    /// New report deadline persisted together with the send record.
    extension: Option<(AssignmentId, DateTime<Utc>)>,
}

impl Candidate {
    fn for_submission(kind: ScanKind, ctx: &ReviewContext, settings: &DurationSettings) -> Self {
        Self {
            notice: Notice::for_submission(kind.action(), &ctx.submission, ctx.area_editor),
            key: SendKey::submission(kind.action(), ctx.submission.id),
            window: kind.window(settings),
            extension: None,
        }
    }

    fn for_assignment(
        kind: ScanKind,
        ctx: &ReviewContext,
        assignment: &RefereeAssignment,
        settings: &DurationSettings,
    ) -> Self {
        Self {
            notice: Notice::for_assignment(
                kind.action(),
                &ctx.submission,
                assignment,
                ctx.area_editor,
            ),
            key: SendKey::assignment(kind.action(), ctx.submission.id, assignment.id),
            window: kind.window(settings),
            extension: None,
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.notice = self.notice.with_details(details);
        self
    }
}

#[derive(Clone)]
pub struct ScanEngine {
    store: Arc<dyn Store>,
    notifier: Notifier,
    locks: Arc<HashMap<ScanKind, Mutex<()>>>,
}

impl ScanEngine {
    pub fn new(store: Arc<dyn Store>, notifier: Notifier) -> Self {
        let locks = ScanKind::ALL
            .into_iter()
            .map(|kind| (kind, Mutex::new(())))
            .collect();
        Self {
            store,
            notifier,
            locks: Arc::new(locks),
        }
    }

    fn lock(&self, kind: ScanKind) -> WorkflowResult<&Mutex<()>> {
        self.locks
            .get(&kind)
            .ok_or_else(|| WorkflowError::not_found(format!("scan lock {kind}")))
    }

    /// Runs one scan as of `now`.
    pub async fn run(&self, kind: ScanKind, now: DateTime<Utc>) -> WorkflowResult<ScanReport> {
        let mut report = ScanReport::new(kind);
        let Ok(_guard) = self.lock(kind)?.try_lock() else {
            warn!(scan = %kind, "previous run still in progress, skipping");
            report.overlapped = true;
            return Ok(report);
        };

        let settings = self.store.settings().await?;
        let candidates = self.candidates(kind, &settings, now).await?;
        report.candidates = candidates.len();
        for candidate in candidates {
            report.count(self.process(candidate, now).await);
        }

        info!(
            scan = %kind,
            candidates = report.candidates,
            dispatched = report.dispatched,
            skipped = report.skipped,
            failed = report.failed,
            "scan finished"
        );
        Ok(report)
    }

    pub async fn run_all(&self, now: DateTime<Utc>) -> WorkflowResult<Vec<ScanReport>> {
        let mut reports = Vec::with_capacity(ScanKind::ALL.len());
        for kind in ScanKind::ALL {
            reports.push(self.run(kind, now).await?);
        }
        Ok(reports)
    }

    /// Fires the reports-complete notification for one submission if it has
    /// just become eligible. Called when a report is submitted.
    pub async fn reports_complete_for(
        &self,
        submission_id: SubmissionId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Option<Outcome>> {
        let _guard = self.lock(ScanKind::ReportsComplete)?.lock().await;
        let settings = self.store.settings().await?;
        let submission = self
            .store
            .submission(submission_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("submission {submission_id}")))?;
        if !submission.is_active() {
            return Ok(None);
        }
        let ctx = ReviewContext::load(self.store.as_ref(), submission, &settings).await?;
        match reports_complete(&ctx, &settings) {
            Some(candidate) => Ok(Some(self.process(candidate, now).await)),
            None => Ok(None),
        }
    }

    async fn contexts(&self, settings: &DurationSettings) -> WorkflowResult<Vec<ReviewContext>> {
        let mut contexts = Vec::new();
        for submission in self.store.active_submissions().await? {
            contexts.push(ReviewContext::load(self.store.as_ref(), submission, settings).await?);
        }
        Ok(contexts)
    }

    async fn candidates(
        &self,
        kind: ScanKind,
        settings: &DurationSettings,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Vec<Candidate>> {
        let contexts = self.contexts(settings).await?;
        let mut candidates = Vec::new();

        for ctx in &contexts {
            let submission = &ctx.submission;
            match kind {
                ScanKind::AreaEditorOverdue => {
                    if area_editor_assignment_overdue(submission, ctx.stage, settings, now) {
                        candidates.push(Candidate::for_submission(kind, ctx, settings));
                    }
                }
                ScanKind::InitialReviewOverdue => {
                    if initial_review_overdue(submission, ctx.stage, settings, now) {
                        candidates.push(Candidate::for_submission(kind, ctx, settings).with_details(
                            json!({ "days_in_review": (now - submission.created_at).num_days() }),
                        ));
                    }
                }
                ScanKind::ResponseOverdue => {
                    for a in ctx.assignments.iter().filter(|a| a.is_active()) {
                        if response_reminder_due(a, settings, now) {
                            candidates.push(Candidate::for_assignment(kind, ctx, a, settings));
                        }
                    }
                }
                ScanKind::ResponseEscalation => {
                    for a in ctx.assignments.iter().filter(|a| a.awaiting_response()) {
                        let reminder = SendKey::assignment(Action::ResponseOverdue, submission.id, a.id);
                        let Some(sent) = self.store.last_send(&reminder).await? else {
                            continue;
                        };
                        if response_escalation_due(a, sent.created_at, settings, now) {
                            candidates.push(
                                Candidate::for_assignment(kind, ctx, a, settings)
                                    .with_details(json!({ "reminded_at": sent.created_at })),
                            );
                        }
                    }
                }
                ScanKind::ReportDueSoon => {
                    for a in ctx.assignments.iter().filter(|a| a.is_active()) {
                        if report_due_soon(a, settings, now) {
                            candidates.push(
                                Candidate::for_assignment(kind, ctx, a, settings)
                                    .with_details(json!({ "report_due_at": a.report_due_at })),
                            );
                        }
                    }
                }
                ScanKind::ReportOverdue => {
                    for a in ctx.assignments.iter().filter(|a| a.is_active()) {
                        if let Some(candidate) = report_overdue_candidate(ctx, a, settings, now) {
                            candidates.push(candidate);
                        }
                    }
                }
                ScanKind::ReportsComplete => {
                    candidates.extend(reports_complete(ctx, settings));
                }
                ScanKind::DecisionOverdue => {
                    if decision_overdue(&ctx.snapshot, settings, now) {
                        candidates.push(Candidate::for_submission(kind, ctx, settings).with_details(
                            json!({ "reports_completed_at": ctx.snapshot.last_report_completed_at }),
                        ));
                    }
                }
                ScanKind::DecisionApprovalOverdue => {
                    if decision_approval_overdue(submission, ctx.stage, settings, now) {
                        candidates.push(Candidate::for_submission(kind, ctx, settings).with_details(
                            json!({ "decision": submission.decision.as_str() }),
                        ));
                    }
                }
            }
        }
        Ok(candidates)
    }

    /// Dispatch then record, for one candidate. Errors are logged here so
    /// one bad candidate never stops the run.
    async fn process(&self, candidate: Candidate, now: DateTime<Utc>) -> Outcome {
        let key = &candidate.key;
        match self.store.last_send(key).await {
            Ok(last) if candidate.window.blocks(last.as_ref(), now) => return Outcome::Skipped,
            Ok(_) => {}
            Err(e) => {
                error!(action = %key.action, submission_id = ?key.submission_id, assignment_id = ?key.assignment_id, error = %e, "could not read send records");
                return Outcome::Failed;
            }
        }

        let record = match self.notifier.dispatch_at(&candidate.notice, now).await {
            Ok(record) => record,
            Err(e) => {
                warn!(action = %key.action, submission_id = ?key.submission_id, assignment_id = ?key.assignment_id, error = %e, "dispatch failed, will retry next run");
                return Outcome::Failed;
            }
        };

        let written = match candidate.extension {
            Some((assignment_id, due)) => {
                self.store
                    .record_send_with_deadline(&record, candidate.window, assignment_id, due)
                    .await
            }
            None => self.store.record_send(&record, candidate.window).await,
        };
        match written {
            Ok(true) => Outcome::Dispatched,
            Ok(false) => {
                warn!(action = %key.action, submission_id = ?key.submission_id, assignment_id = ?key.assignment_id, "send already recorded by a concurrent run");
                Outcome::Skipped
            }
            Err(e) => {
                error!(action = %key.action, submission_id = ?key.submission_id, assignment_id = ?key.assignment_id, error = %e, "dispatched but could not record send");
                Outcome::Failed
            }
        }
    }
}

/// The referee is told the extended deadline, which is only stored once
/// the reminder has gone out.
fn report_overdue_candidate(
    ctx: &ReviewContext,
    assignment: &RefereeAssignment,
    settings: &DurationSettings,
    now: DateTime<Utc>,
) -> Option<Candidate> {
    if !report_overdue(assignment, now) {
        return None;
    }
    let mut extended = assignment.clone();
    let new_due = extended.extend_report_deadline(settings.days_to_extend_missed_report_deadlines)?;
    let mut candidate = Candidate::for_assignment(ScanKind::ReportOverdue, ctx, &extended, settings)
        .with_details(json!({
            "previous_due": assignment.report_due_at,
            "new_due": new_due,
            "extended_by_days": settings.days_to_extend_missed_report_deadlines,
        }));
    candidate.extension = Some((assignment.id, new_due));
    Some(candidate)
}

/// Enough active reports are in and no decision has been entered. The
/// message differs on whether further active referees are still working.
fn reports_complete(ctx: &ReviewContext, settings: &DurationSettings) -> Option<Candidate> {
    let snapshot = &ctx.snapshot;
    if snapshot.decision.is_entered()
        || snapshot.active_completed < snapshot.reports_expected.max(1)
    {
        return None;
    }
    let outstanding = snapshot.active_incomplete();
    Some(
        Candidate::for_submission(ScanKind::ReportsComplete, ctx, settings).with_details(json!({
            "completed": snapshot.active_completed,
            "expected": snapshot.reports_expected,
            "outstanding": outstanding,
            "all_complete": outstanding == 0,
            "instruction": if outstanding == 0 {
                "All reports are in. Please enter a decision."
            } else {
                "The minimum number of reports is in. Further reports are still outstanding; secure them or enter a decision."
            },
        })),
    )
}

