use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::deadline::{overdue_flags, OverdueFlags};
use crate::domain::{
    has_enough_referees, resolve_stage, DurationSettings, RefereeAssignment, Stage,
    StageSnapshot, Submission, UserId,
};
use crate::error::WorkflowResult;
use crate::store::Store;

/// A submission together with everything its stage is derived from.
#[derive(Debug, Clone)]
pub struct ReviewContext {
    pub submission: Submission,
    pub area_editor: Option<UserId>,
    pub assignments: Vec<RefereeAssignment>,
    pub snapshot: StageSnapshot,
    pub stage: Stage,
}

impl ReviewContext {
    pub async fn load(
        store: &dyn Store,
        submission: Submission,
        settings: &DurationSettings,
    ) -> WorkflowResult<Self> {
        let area_editor = store.area_editor(submission.id).await?.map(|l| l.editor);
        let assignments = store.assignments_for(submission.id).await?;
        Ok(Self::assemble(
            submission,
            area_editor,
            assignments,
            settings.reports_expected(),
        ))
    }

    pub fn assemble(
        submission: Submission,
        area_editor: Option<UserId>,
        assignments: Vec<RefereeAssignment>,
        reports_expected: usize,
    ) -> Self {
        let snapshot = StageSnapshot::capture(
            &submission,
            area_editor.is_some(),
            &assignments,
            reports_expected,
        );
        let stage = resolve_stage(&snapshot);
        Self {
            submission,
            area_editor,
            assignments,
            snapshot,
            stage,
        }
    }

    pub fn has_enough_referees(&self) -> bool {
        has_enough_referees(&self.snapshot)
    }

    pub fn overdue(&self, settings: &DurationSettings, now: DateTime<Utc>) -> OverdueFlags {
        overdue_flags(
            &self.submission,
            &self.snapshot,
            &self.assignments,
            settings,
            now,
        )
    }
}

/// Read model returned to API clients.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionView {
    pub submission: Submission,
    pub stage: Stage,
    pub area_editor: Option<UserId>,
    pub has_enough_referees: bool,
    pub is_latest_version: bool,
    pub previous_versions: Vec<i64>,
    pub assignments: Vec<RefereeAssignment>,
    pub overdue: OverdueFlags,
}
