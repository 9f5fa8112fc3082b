use chrono::Duration;
use serde_json::json;

use super::*;
use crate::domain::{Decision, NewSubmission, Recommendation, ReportSubmission, Stage, Submission};
use crate::notify::NotifierConfig;
use crate::test_utils::{t0, Harness};

async fn submitted(h: &Harness) -> Submission {
    h.desk
        .submit(
            NewSubmission {
                title: "Sparse cuts in expanders".into(),
                author: h.author.id,
                area: 1,
            },
            t0(),
        )
        .await
        .unwrap()
}

/// Submission with an area editor and `n` pending invitations, all at t0.
async fn in_external_review(h: &Harness, n: usize) -> (Submission, Vec<RefereeAssignment>) {
    let submission = submitted(h).await;
    h.desk
        .assign_area_editor(submission.id, h.area_editor.id, t0())
        .await
        .unwrap();
    let mut assignments = Vec::new();
    for referee in h.referees.iter().take(n) {
        assignments.push(
            h.desk
                .invite_referee(submission.id, referee.id, t0())
                .await
                .unwrap(),
        );
    }
    (submission, assignments)
}

fn report() -> ReportSubmission {
    ReportSubmission {
        recommendation: Some(Recommendation::MinorRevisions),
        comments_for_editor: Some("Careful work.".into()),
        comments_for_author: Some("Tighten section 3.".into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn area_editor_overdue_fires_once_after_deadline() {
    let h = Harness::new().await;
    let submission = submitted(&h).await;
    let deadline = submission.created_at + Duration::days(2);

    let early = h.scans.run(ScanKind::AreaEditorOverdue, deadline).await.unwrap();
    assert_eq!(early.candidates, 0);

    let late = deadline + Duration::seconds(1);
    let report = h.scans.run(ScanKind::AreaEditorOverdue, late).await.unwrap();
    assert_eq!(report.candidates, 1);
    assert_eq!(report.dispatched, 1);

    let sent = h.gateway.sent_for(Action::AreaEditorOverdue);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec![h.managing_editor.email.clone()]);
    assert_eq!(sent[0].submission_id, Some(submission.id));

    let again = h
        .scans
        .run(ScanKind::AreaEditorOverdue, late + Duration::days(30))
        .await
        .unwrap();
    assert_eq!(again.dispatched, 0);
    assert_eq!(again.skipped, 1);
}

#[tokio::test]
async fn withdrawn_submissions_are_not_scanned() {
    let h = Harness::new().await;
    let submission = submitted(&h).await;
    h.desk.withdraw(submission.id, t0()).await.unwrap();

    let report = h
        .scans
        .run(ScanKind::AreaEditorOverdue, t0() + Duration::days(10))
        .await
        .unwrap();
    assert_eq!(report.candidates, 0);
}

#[tokio::test]
async fn initial_review_reminder_repeats_after_cooldown() {
    let h = Harness::new().await;
    let submission = submitted(&h).await;
    h.desk
        .assign_area_editor(submission.id, h.area_editor.id, t0())
        .await
        .unwrap();

    let first = t0() + Duration::days(15);
    let r = h.scans.run(ScanKind::InitialReviewOverdue, first).await.unwrap();
    assert_eq!(r.dispatched, 1);

    let r = h
        .scans
        .run(ScanKind::InitialReviewOverdue, first + Duration::days(2))
        .await
        .unwrap();
    assert_eq!(r.skipped, 1);

    let r = h
        .scans
        .run(ScanKind::InitialReviewOverdue, first + Duration::days(4))
        .await
        .unwrap();
    assert_eq!(r.dispatched, 1);

    let sent = h.gateway.sent_for(Action::InitialReviewOverdue);
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].to, vec![h.area_editor.email.clone()]);
    assert_eq!(sent[0].cc, vec![h.managing_editor.email.clone()]);
}

#[tokio::test]
async fn unanswered_invitation_is_reminded_then_escalated() {
    let h = Harness::new().await;
    let (_, assignments) = in_external_review(&h, 1).await;
    let due = assignments[0].response_due_at;

    let within_grace = h
        .scans
        .run(ScanKind::ResponseOverdue, due + Duration::hours(12))
        .await
        .unwrap();
    assert_eq!(within_grace.candidates, 0);

    let reminded_at = due + Duration::days(1) + Duration::seconds(1);
    let r = h.scans.run(ScanKind::ResponseOverdue, reminded_at).await.unwrap();
    assert_eq!(r.dispatched, 1);
    let reminder = &h.gateway.sent_for(Action::ResponseOverdue)[0];
    assert_eq!(reminder.to, vec![h.referees[0].email.clone()]);
    assert_eq!(reminder.cc, vec![h.area_editor.email.clone()]);

    let too_soon = h
        .scans
        .run(ScanKind::ResponseEscalation, reminded_at + Duration::hours(6))
        .await
        .unwrap();
    assert_eq!(too_soon.candidates, 0);

    let later = reminded_at + Duration::days(1) + Duration::seconds(1);
    let r = h.scans.run(ScanKind::ResponseEscalation, later).await.unwrap();
    assert_eq!(r.dispatched, 1);
    let escalation = &h.gateway.sent_for(Action::ResponseEscalation)[0];
    assert_eq!(escalation.to, vec![h.area_editor.email.clone()]);
    assert_eq!(escalation.cc, vec![h.managing_editor.email.clone()]);

    let r = h
        .scans
        .run(ScanKind::ResponseEscalation, later + Duration::days(5))
        .await
        .unwrap();
    assert_eq!(r.dispatched, 0);
    assert_eq!(r.skipped, 1);
}

#[tokio::test]
async fn declined_and_canceled_referees_are_not_chased() {
    let h = Harness::new().await;
    let (_, assignments) = in_external_review(&h, 2).await;
    h.desk
        .respond(assignments[0].id, false, Some("busy".into()), t0())
        .await
        .unwrap();
    h.desk.cancel_assignment(assignments[1].id, t0()).await.unwrap();

    let r = h
        .scans
        .run(ScanKind::ResponseOverdue, t0() + Duration::days(10))
        .await
        .unwrap();
    assert_eq!(r.candidates, 0);
}

#[tokio::test]
async fn report_due_soon_fires_inside_window() {
    let h = Harness::new().await;
    let (_, assignments) = in_external_review(&h, 1).await;
    let agreed = h
        .desk
        .respond(assignments[0].id, true, None, t0())
        .await
        .unwrap();
    let due = agreed.report_due_at.unwrap();

    let r = h
        .scans
        .run(ScanKind::ReportDueSoon, due - Duration::days(8))
        .await
        .unwrap();
    assert_eq!(r.candidates, 0);

    let r = h
        .scans
        .run(ScanKind::ReportDueSoon, due - Duration::days(6))
        .await
        .unwrap();
    assert_eq!(r.dispatched, 1);

    let r = h
        .scans
        .run(ScanKind::ReportDueSoon, due - Duration::days(5))
        .await
        .unwrap();
    assert_eq!(r.skipped, 1);
}

#[tokio::test]
async fn overdue_report_extends_deadline_and_announces_it() {
    let h = Harness::new().await;
    let (_, assignments) = in_external_review(&h, 1).await;
    let agreed = h
        .desk
        .respond(assignments[0].id, true, None, t0())
        .await
        .unwrap();
    let due = agreed.report_due_at.unwrap();
    let now = due + Duration::days(1);

    let r = h.scans.run(ScanKind::ReportOverdue, now).await.unwrap();
    assert_eq!(r.dispatched, 1);

    let new_due = due + Duration::days(7);
    let stored = h.store.assignment(agreed.id).await.unwrap().unwrap();
    assert_eq!(stored.report_due_at, Some(new_due));
    assert_eq!(stored.report_originally_due_at, Some(due));

    let sent = h.gateway.sent_for(Action::ReportOverdue);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].context["details"]["new_due"], json!(new_due));
    assert_eq!(sent[0].context["assignment"]["report_due_at"], json!(new_due));

    let again = h.scans.run(ScanKind::ReportOverdue, now).await.unwrap();
    assert_eq!(again.dispatched, 0);

    // Missing the extended deadline extends it again.
    let r = h
        .scans
        .run(ScanKind::ReportOverdue, new_due + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(r.dispatched, 1);
    let stored = h.store.assignment(agreed.id).await.unwrap().unwrap();
    assert_eq!(stored.report_due_at, Some(due + Duration::days(14)));
}

#[tokio::test]
async fn failed_dispatch_leaves_no_record_and_is_retried() {
    let h = Harness::new().await;
    let (_, assignments) = in_external_review(&h, 1).await;
    let agreed = h
        .desk
        .respond(assignments[0].id, true, None, t0())
        .await
        .unwrap();
    let due = agreed.report_due_at.unwrap();
    let now = due + Duration::days(1);
    let records_before = h.store.send_records().await.len();

    h.gateway.set_failing(true);
    let r = h.scans.run(ScanKind::ReportOverdue, now).await.unwrap();
    assert_eq!(r.failed, 1);
    assert_eq!(h.store.send_records().await.len(), records_before);
    let stored = h.store.assignment(agreed.id).await.unwrap().unwrap();
    assert_eq!(stored.report_due_at, Some(due));

    h.gateway.set_failing(false);
    let r = h.scans.run(ScanKind::ReportOverdue, now).await.unwrap();
    assert_eq!(r.dispatched, 1);
    let stored = h.store.assignment(agreed.id).await.unwrap().unwrap();
    assert_eq!(stored.report_due_at, Some(due + Duration::days(7)));
}

#[tokio::test]
async fn hung_gateway_times_out_and_scan_moves_on() {
    let h = Harness::with_notifier(NotifierConfig {
        timeout: std::time::Duration::from_millis(50),
        attempts: 2,
    })
    .await;
    let (_, assignments) = in_external_review(&h, 2).await;
    let mut due = None;
    for a in &assignments {
        let agreed = h.desk.respond(a.id, true, None, t0()).await.unwrap();
        due = agreed.report_due_at;
    }
    let due = due.unwrap();
    let now = due + Duration::days(1);

    h.gateway.stall_for(&h.referees[0].email);
    let calls_before = h.gateway.calls();
    let r = h.scans.run(ScanKind::ReportOverdue, now).await.unwrap();
    assert_eq!(r.candidates, 2);
    assert_eq!(r.failed, 1);
    assert_eq!(r.dispatched, 1);
    // Both attempts on the hung message, one on the healthy one.
    assert_eq!(h.gateway.calls() - calls_before, 3);

    let records: Vec<Option<AssignmentId>> = h
        .store
        .send_records()
        .await
        .into_iter()
        .filter(|rec| rec.action == Action::ReportOverdue.as_str())
        .map(|rec| rec.assignment_id)
        .collect();
    assert_eq!(records, vec![Some(assignments[1].id)]);

    let hung = h.store.assignment(assignments[0].id).await.unwrap().unwrap();
    assert_eq!(hung.report_due_at, Some(due));
    let moved_on = h.store.assignment(assignments[1].id).await.unwrap().unwrap();
    assert_eq!(moved_on.report_due_at, Some(due + Duration::days(7)));
}

#[tokio::test]
async fn completing_enough_reports_notifies_once() {
    let h = Harness::new().await;
    let (submission, assignments) = in_external_review(&h, 2).await;
    for a in &assignments {
        h.desk.respond(a.id, true, None, t0()).await.unwrap();
    }

    let at = t0() + Duration::days(10);
    h.desk.submit_report(assignments[0].id, report(), at).await.unwrap();
    let view = h.desk.view(submission.id, at).await.unwrap();
    assert_eq!(view.stage, Stage::InExternalReview);
    assert!(h.gateway.sent_for(Action::ReportsComplete).is_empty());

    h.desk.submit_report(assignments[1].id, report(), at).await.unwrap();
    let view = h.desk.view(submission.id, at).await.unwrap();
    assert_eq!(view.stage, Stage::PostExternalReview);

    let sent = h.gateway.sent_for(Action::ReportsComplete);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec![h.area_editor.email.clone()]);
    assert_eq!(sent[0].context["details"]["all_complete"], json!(true));

    let r = h.scans.run(ScanKind::ReportsComplete, at).await.unwrap();
    assert_eq!(r.dispatched, 0);
    let r = h.scans.run(ScanKind::ReportsComplete, at).await.unwrap();
    assert_eq!(r.dispatched, 0);
}

#[tokio::test]
async fn reports_complete_scan_catches_missed_trigger() {
    let h = Harness::new().await;
    let (_, assignments) = in_external_review(&h, 2).await;
    for a in &assignments {
        h.desk.respond(a.id, true, None, t0()).await.unwrap();
    }
    h.gateway.set_failing(true);
    for a in &assignments {
        h.desk.submit_report(a.id, report(), t0()).await.unwrap();
    }
    h.gateway.set_failing(false);

    let r = h.scans.run(ScanKind::ReportsComplete, t0()).await.unwrap();
    assert_eq!(r.dispatched, 1);
    let r = h.scans.run(ScanKind::ReportsComplete, t0()).await.unwrap();
    assert_eq!(r.dispatched, 0);
    assert_eq!(h.gateway.sent_for(Action::ReportsComplete).len(), 1);
}

#[tokio::test]
async fn minimum_reached_with_referee_outstanding() {
    let h = Harness::new().await;
    h.save_settings(DurationSettings {
        number_of_reports_expected: 1,
        ..Default::default()
    })
    .await;
    let (_, assignments) = in_external_review(&h, 2).await;
    for a in &assignments {
        h.desk.respond(a.id, true, None, t0()).await.unwrap();
    }
    h.desk
        .submit_report(assignments[0].id, report(), t0())
        .await
        .unwrap();

    let sent = h.gateway.sent_for(Action::ReportsComplete);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].context["details"]["all_complete"], json!(false));
    assert_eq!(sent[0].context["details"]["outstanding"], json!(1));
}

#[tokio::test]
async fn decision_overdue_after_reports_complete() {
    let h = Harness::new().await;
    let (_, assignments) = in_external_review(&h, 2).await;
    for a in &assignments {
        h.desk.respond(a.id, true, None, t0()).await.unwrap();
        h.desk.submit_report(a.id, report(), t0()).await.unwrap();
    }

    let r = h
        .scans
        .run(ScanKind::DecisionOverdue, t0() + Duration::days(5))
        .await
        .unwrap();
    assert_eq!(r.candidates, 0);

    let late = t0() + Duration::days(5) + Duration::seconds(1);
    let r = h.scans.run(ScanKind::DecisionOverdue, late).await.unwrap();
    assert_eq!(r.dispatched, 1);
    let r = h
        .scans
        .run(ScanKind::DecisionOverdue, late + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(r.skipped, 1);
    let r = h
        .scans
        .run(ScanKind::DecisionOverdue, late + Duration::days(3))
        .await
        .unwrap();
    assert_eq!(r.dispatched, 1);
}

// A decision entered once is never stamped, so approval reminders only
// start after the decision has been changed.
#[tokio::test]
async fn approval_reminder_needs_changed_decision() {
    let h = Harness::new().await;
    let submission = submitted(&h).await;
    h.desk
        .enter_decision(submission.id, Decision::Accept, None, t0())
        .await
        .unwrap();

    let r = h
        .scans
        .run(ScanKind::DecisionApprovalOverdue, t0() + Duration::days(10))
        .await
        .unwrap();
    assert_eq!(r.candidates, 0);

    let changed_at = t0() + Duration::days(1);
    h.desk
        .enter_decision(submission.id, Decision::Reject, None, changed_at)
        .await
        .unwrap();

    let late = changed_at + Duration::days(1) + Duration::seconds(1);
    let r = h.scans.run(ScanKind::DecisionApprovalOverdue, late).await.unwrap();
    assert_eq!(r.dispatched, 1);
    let sent = h.gateway.sent_for(Action::DecisionApprovalOverdue);
    assert_eq!(sent[0].to, vec![h.managing_editor.email.clone()]);

    h.desk.approve_decision(submission.id, late).await.unwrap();
    let r = h
        .scans
        .run(ScanKind::DecisionApprovalOverdue, late + Duration::days(5))
        .await
        .unwrap();
    assert_eq!(r.candidates, 0);
}

#[tokio::test]
async fn second_run_dispatches_nothing() {
    let h = Harness::new().await;
    let _fresh = submitted(&h).await;
    let (_, pending) = in_external_review(&h, 2).await;
    let (_, agreeing) = in_external_review(&h, 3).await;
    for a in &agreeing {
        h.desk.respond(a.id, true, None, t0()).await.unwrap();
    }
    h.desk
        .submit_report(agreeing[0].id, report(), t0() + Duration::days(3))
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);

    for offset in [3, 5, 8, 16, 22, 30, 45] {
        let now = t0() + Duration::days(offset) + Duration::hours(1);
        for kind in ScanKind::ALL {
            h.scans.run(kind, now).await.unwrap();
            let second = h.scans.run(kind, now).await.unwrap();
            assert_eq!(second.dispatched, 0, "{kind} dispatched twice at day {offset}");
        }
    }
}

#[tokio::test]
async fn overlapping_run_is_skipped() {
    let h = Harness::new().await;
    submitted(&h).await;
    let kind = ScanKind::AreaEditorOverdue;
    let _held = h.scans.lock(kind).unwrap().lock().await;

    let r = h.scans.run(kind, t0() + Duration::days(3)).await.unwrap();
    assert!(r.overlapped);
    assert_eq!(r.dispatched, 0);
}

#[test]
fn scan_names_round_trip() {
    for kind in ScanKind::ALL {
        assert_eq!(kind.as_str().parse::<ScanKind>().unwrap(), kind);
    }
    assert!("weekly_digest".parse::<ScanKind>().is_err());
}
