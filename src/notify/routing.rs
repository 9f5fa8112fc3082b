use serde::Serialize;

use super::Action;

/// Recipient roles a route can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    ManagingEditors,
    AreaEditor,
    Referee,
    Author,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub action: Action,
    pub to: &'static [Role],
    pub cc: &'static [Role],
}

use Role::*;

const fn route(action: Action, to: &'static [Role], cc: &'static [Role]) -> Route {
    Route { action, to, cc }
}

static ROUTES: &[Route] = &[
    route(Action::NewSubmission, &[ManagingEditors], &[]),
    route(Action::AreaEditorAssigned, &[AreaEditor], &[]),
    route(Action::AreaEditorUnassigned, &[AreaEditor], &[]),
    route(Action::RefereeInvited, &[Referee], &[]),
    route(Action::RefereeAgreed, &[AreaEditor], &[]),
    route(Action::AgreementConfirmation, &[Referee], &[]),
    route(Action::RefereeDeclined, &[AreaEditor], &[]),
    route(Action::ReportCompleted, &[AreaEditor], &[]),
    route(Action::ReportThanks, &[Referee], &[]),
    route(Action::AssignmentCanceled, &[Referee], &[]),
    route(Action::DecisionEntered, &[ManagingEditors], &[]),
    route(Action::DecisionApproved, &[Author], &[AreaEditor]),
    route(Action::DecisionApprovedReferee, &[Referee], &[]),
    route(
        Action::SubmissionWithdrawn,
        &[Author],
        &[ManagingEditors, AreaEditor],
    ),
    route(Action::SubmissionWithdrawnReferee, &[Referee], &[]),
    route(
        Action::SubmissionUnarchived,
        &[ManagingEditors, AreaEditor],
        &[],
    ),
    route(Action::AreaEditorOverdue, &[ManagingEditors], &[]),
    route(Action::InitialReviewOverdue, &[AreaEditor], &[ManagingEditors]),
    route(Action::ResponseOverdue, &[Referee], &[AreaEditor]),
    route(Action::ResponseEscalation, &[AreaEditor], &[ManagingEditors]),
    route(Action::ReportDueSoon, &[Referee], &[]),
    route(Action::ReportOverdue, &[Referee], &[]),
    route(Action::ReportsComplete, &[AreaEditor], &[ManagingEditors]),
    route(Action::DecisionOverdue, &[AreaEditor], &[]),
    route(Action::DecisionApprovalOverdue, &[ManagingEditors], &[]),
];

pub fn route_for(action: Action) -> Route {
    ROUTES
        .iter()
        .copied()
        .find(|r| r.action == action)
        .unwrap_or(Route {
            action,
            to: &[ManagingEditors],
            cc: &[],
        })
}
