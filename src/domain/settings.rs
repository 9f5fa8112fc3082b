use chrono::Duration;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{WorkflowError, WorkflowResult};

/// Upper bound for every duration parameter.
pub const MAX_SETTING_VALUE: i32 = 1000;

/// Journal-wide deadline parameters. Persisted as a single row and created
/// with the defaults below the first time it is read.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct DurationSettings {
    pub days_to_assign_area_editor: i32,
    pub days_for_initial_review: i32,
    pub days_to_remind_area_editor: i32,
    pub days_for_external_review: i32,
    pub days_to_respond_to_referee_request: i32,
    pub days_to_remind_unanswered_invitation: i32,
    pub days_to_wait_after_invitation_reminder: i32,
    pub days_before_deadline_to_remind_referee: i32,
    pub days_to_remind_overdue_referee: i32,
    pub days_to_extend_missed_report_deadlines: i32,
    pub days_after_reports_completed_to_submit_decision: i32,
    pub days_to_remind_overdue_decision_approval: i32,
    pub number_of_reports_expected: i32,
}

impl Default for DurationSettings {
    fn default() -> Self {
        Self {
            days_to_assign_area_editor: 2,
            days_for_initial_review: 14,
            days_to_remind_area_editor: 3,
            days_for_external_review: 28,
            days_to_respond_to_referee_request: 3,
            days_to_remind_unanswered_invitation: 1,
            days_to_wait_after_invitation_reminder: 1,
            days_before_deadline_to_remind_referee: 7,
            days_to_remind_overdue_referee: 1,
            days_to_extend_missed_report_deadlines: 7,
            days_after_reports_completed_to_submit_decision: 5,
            days_to_remind_overdue_decision_approval: 1,
            number_of_reports_expected: 2,
        }
    }
}

impl DurationSettings {
    fn named_values(&self) -> [(&'static str, i32); 13] {
        [
            ("days_to_assign_area_editor", self.days_to_assign_area_editor),
            ("days_for_initial_review", self.days_for_initial_review),
            ("days_to_remind_area_editor", self.days_to_remind_area_editor),
            ("days_for_external_review", self.days_for_external_review),
            (
                "days_to_respond_to_referee_request",
                self.days_to_respond_to_referee_request,
            ),
            (
                "days_to_remind_unanswered_invitation",
                self.days_to_remind_unanswered_invitation,
            ),
            (
                "days_to_wait_after_invitation_reminder",
                self.days_to_wait_after_invitation_reminder,
            ),
            (
                "days_before_deadline_to_remind_referee",
                self.days_before_deadline_to_remind_referee,
            ),
            (
                "days_to_remind_overdue_referee",
                self.days_to_remind_overdue_referee,
            ),
            (
                "days_to_extend_missed_report_deadlines",
                self.days_to_extend_missed_report_deadlines,
            ),
            (
                "days_after_reports_completed_to_submit_decision",
                self.days_after_reports_completed_to_submit_decision,
            ),
            (
                "days_to_remind_overdue_decision_approval",
                self.days_to_remind_overdue_decision_approval,
            ),
            ("number_of_reports_expected", self.number_of_reports_expected),
        ]
    }

    /// Checks every value is within `[0, 1000]` and that the early report
    /// reminder falls strictly inside the external review period.
    pub fn validate(&self) -> WorkflowResult<()> {
        for (name, value) in self.named_values() {
            if !(0..=MAX_SETTING_VALUE).contains(&value) {
                return Err(WorkflowError::Validation(format!(
                    "{name} must be between 0 and {MAX_SETTING_VALUE}, got {value}"
                )));
            }
        }
        if self.days_for_external_review <= self.days_before_deadline_to_remind_referee {
            return Err(WorkflowError::Validation(
                "days_for_external_review must exceed days_before_deadline_to_remind_referee"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn reports_expected(&self) -> usize {
        self.number_of_reports_expected.max(0) as usize
    }
}

/// Converts a day count from the settings into a chrono duration.
pub fn days(n: i32) -> Duration {
    Duration::days(i64::from(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        DurationSettings::default().validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range_values() {
        let settings = DurationSettings {
            days_for_initial_review: 1001,
            ..Default::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("days_for_initial_review"));

        let settings = DurationSettings {
            number_of_reports_expected: -1,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn early_reminder_must_precede_deadline() {
        let settings = DurationSettings {
            days_for_external_review: 7,
            days_before_deadline_to_remind_referee: 7,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(WorkflowError::Validation(_))
        ));
    }

    #[test]
    fn boundary_values_accepted() {
        let settings = DurationSettings {
            days_to_assign_area_editor: 0,
            days_for_external_review: 1000,
            ..Default::default()
        };
        settings.validate().unwrap();
    }
}
