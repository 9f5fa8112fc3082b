//! Overdue checks.
//!
//! Each check takes the current time explicitly so it can be evaluated
//! against any instant.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::settings::{days, DurationSettings};
use super::stage::{resolve_stage, Stage, StageSnapshot};
use super::{RefereeAssignment, Submission};

pub fn area_editor_assignment_overdue(
    submission: &Submission,
    stage: Stage,
    settings: &DurationSettings,
    now: DateTime<Utc>,
) -> bool {
    stage == Stage::PreInitialReview
        && now > submission.created_at + days(settings.days_to_assign_area_editor)
}

pub fn initial_review_overdue(
    submission: &Submission,
    stage: Stage,
    settings: &DurationSettings,
    now: DateTime<Utc>,
) -> bool {
    stage == Stage::InInitialReview
        && now > submission.created_at + days(settings.days_for_initial_review)
}

/// The invitation has gone unanswered past its deadline plus the grace
/// period before the referee is reminded.
pub fn response_reminder_due(
    assignment: &RefereeAssignment,
    settings: &DurationSettings,
    now: DateTime<Utc>,
) -> bool {
    assignment.response_overdue(now)
        && now
            > assignment.response_due_at + days(settings.days_to_remind_unanswered_invitation)
}

/// The area editor is told once the referee ignored a reminder for long
/// enough.
pub fn response_escalation_due(
    assignment: &RefereeAssignment,
    reminder_sent_at: DateTime<Utc>,
    settings: &DurationSettings,
    now: DateTime<Utc>,
) -> bool {
    assignment.awaiting_response()
        && now > reminder_sent_at + days(settings.days_to_wait_after_invitation_reminder)
}

/// Report deadline lies within the early-reminder window.
pub fn report_due_soon(
    assignment: &RefereeAssignment,
    settings: &DurationSettings,
    now: DateTime<Utc>,
) -> bool {
    let Some(due) = assignment.report_due_at else {
        return false;
    };
    assignment.awaiting_report()
        && now <= due
        && now >= due - days(settings.days_before_deadline_to_remind_referee)
}

pub fn report_overdue(assignment: &RefereeAssignment, now: DateTime<Utc>) -> bool {
    assignment.awaiting_report() && assignment.report_overdue(now)
}

pub fn decision_overdue(
    snapshot: &StageSnapshot,
    settings: &DurationSettings,
    now: DateTime<Utc>,
) -> bool {
    if resolve_stage(snapshot) != Stage::PostExternalReview {
        return false;
    }
    snapshot.last_report_completed_at.is_some_and(|completed| {
        now > completed + days(settings.days_after_reports_completed_to_submit_decision)
    })
}

/// Never fires for a decision that was entered once and never changed,
/// since only a change stamps `decision_entered_at`.
pub fn decision_approval_overdue(
    submission: &Submission,
    stage: Stage,
    settings: &DurationSettings,
    now: DateTime<Utc>,
) -> bool {
    stage == Stage::ReviewComplete
        && submission.decision_entered_at.is_some_and(|entered| {
            now > entered + days(settings.days_to_remind_overdue_decision_approval)
        })
}

/// Every overdue condition of one submission at a given instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OverdueFlags {
    pub area_editor_assignment: bool,
    pub initial_review: bool,
    pub referee_responses: Vec<i64>,
    pub referee_reports: Vec<i64>,
    pub decision: bool,
    pub decision_approval: bool,
}

pub fn overdue_flags(
    submission: &Submission,
    snapshot: &StageSnapshot,
    assignments: &[RefereeAssignment],
    settings: &DurationSettings,
    now: DateTime<Utc>,
) -> OverdueFlags {
    let stage = resolve_stage(snapshot);
    OverdueFlags {
        area_editor_assignment: area_editor_assignment_overdue(submission, stage, settings, now),
        initial_review: initial_review_overdue(submission, stage, settings, now),
        referee_responses: assignments
            .iter()
            .filter(|a| a.response_overdue(now))
            .map(|a| a.id)
            .collect(),
        referee_reports: assignments
            .iter()
            .filter(|a| report_overdue(a, now))
            .map(|a| a.id)
            .collect(),
        decision: decision_overdue(snapshot, settings, now),
        decision_approval: decision_approval_overdue(submission, stage, settings, now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Decision;
    use crate::test_utils::{assignment, submission, t0};
    use chrono::Duration;

    fn settings() -> DurationSettings {
        DurationSettings::default()
    }

    #[test]
    fn area_editor_overdue_after_configured_days() {
        let s = submission(1);
        let deadline = s.created_at + Duration::days(2);
        assert!(!area_editor_assignment_overdue(
            &s,
            Stage::PreInitialReview,
            &settings(),
            deadline
        ));
        assert!(area_editor_assignment_overdue(
            &s,
            Stage::PreInitialReview,
            &settings(),
            deadline + Duration::seconds(1)
        ));
        assert!(!area_editor_assignment_overdue(
            &s,
            Stage::InInitialReview,
            &settings(),
            deadline + Duration::days(30)
        ));
    }

    #[test]
    fn initial_review_overdue_only_in_initial_review() {
        let s = submission(1);
        let late = s.created_at + Duration::days(15);
        assert!(initial_review_overdue(&s, Stage::InInitialReview, &settings(), late));
        assert!(!initial_review_overdue(&s, Stage::InExternalReview, &settings(), late));
    }

    #[test]
    fn response_reminder_waits_for_grace_period() {
        let a = assignment(1, 1, 5);
        let due = a.response_due_at;
        assert!(!response_reminder_due(&a, &settings(), due + Duration::hours(12)));
        assert!(response_reminder_due(&a, &settings(), due + Duration::days(2)));
    }

    #[test]
    fn escalation_after_waiting_period() {
        let a = assignment(1, 1, 5);
        let sent = t0() + Duration::days(5);
        assert!(!response_escalation_due(&a, sent, &settings(), sent + Duration::hours(2)));
        assert!(response_escalation_due(&a, sent, &settings(), sent + Duration::days(2)));
    }

    #[test]
    fn report_due_soon_window() {
        let mut a = assignment(1, 1, 5);
        a.respond(true, None, &settings(), t0()).unwrap();
        let due = a.report_due_at.unwrap();
        assert!(!report_due_soon(&a, &settings(), due - Duration::days(8)));
        assert!(report_due_soon(&a, &settings(), due - Duration::days(6)));
        assert!(!report_due_soon(&a, &settings(), due + Duration::seconds(1)));
        assert!(report_overdue(&a, due + Duration::seconds(1)));
    }

    #[test]
    fn decision_overdue_counts_from_last_report() {
        let snapshot = StageSnapshot {
            has_area_editor: true,
            non_canceled: 2,
            active: 2,
            active_completed: 2,
            reports_expected: 2,
            decision: Decision::NoDecision,
            decision_approved: false,
            last_report_completed_at: Some(t0()),
        };
        assert!(!decision_overdue(&snapshot, &settings(), t0() + Duration::days(5)));
        assert!(decision_overdue(&snapshot, &settings(), t0() + Duration::days(6)));

        let decided = StageSnapshot {
            decision: Decision::Accept,
            ..snapshot
        };
        assert!(!decision_overdue(&decided, &settings(), t0() + Duration::days(6)));
    }

    #[test]
    fn approval_overdue_requires_entered_at_stamp() {
        let mut sub = submission(1);
        sub.enter_decision(Decision::Accept, None, t0()).unwrap();
        let later = t0() + Duration::days(3);
        assert!(!decision_approval_overdue(&sub, Stage::ReviewComplete, &settings(), later));

        sub.enter_decision(Decision::Reject, None, t0()).unwrap();
        assert!(decision_approval_overdue(&sub, Stage::ReviewComplete, &settings(), later));
        assert!(!decision_approval_overdue(&sub, Stage::ReviewApproved, &settings(), later));
    }
}
