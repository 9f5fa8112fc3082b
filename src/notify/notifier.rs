use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, error, warn};

use super::routing::{route_for, Role};
use super::{Action, Gateway, OutgoingMessage, SendRecord};
use crate::domain::{RefereeAssignment, Submission, UserId};
use crate::error::{DispatchError, WorkflowError, WorkflowResult};
use crate::store::{SendWindow, Store};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF_MS: u64 = 200;

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Upper bound for a single gateway call.
    pub timeout: Duration,
    /// Gateway calls per message before giving up.
    pub attempts: u32,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            attempts: DEFAULT_ATTEMPTS,
        }
    }
}

/// What a message is about. Recipients are resolved from these fields
/// according to the action's route.
#[derive(Debug, Clone)]
pub struct Notice {
    pub action: Action,
    pub submission: Option<Submission>,
    pub assignment: Option<RefereeAssignment>,
    pub area_editor: Option<UserId>,
    pub details: serde_json::Value,
}

impl Notice {
    pub fn for_submission(
        action: Action,
        submission: &Submission,
        area_editor: Option<UserId>,
    ) -> Self {
        Self {
            action,
            submission: Some(submission.clone()),
            assignment: None,
            area_editor,
            details: serde_json::Value::Null,
        }
    }

    pub fn for_assignment(
        action: Action,
        submission: &Submission,
        assignment: &RefereeAssignment,
        area_editor: Option<UserId>,
    ) -> Self {
        Self {
            action,
            submission: Some(submission.clone()),
            assignment: Some(assignment.clone()),
            area_editor,
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    fn submission_id(&self) -> Option<i64> {
        self.submission.as_ref().map(|s| s.id)
    }

    fn assignment_id(&self) -> Option<i64> {
        self.assignment.as_ref().map(|a| a.id)
    }
}

/// Resolves recipients, calls the gateway with a timeout and bounded
/// retries, and persists the resulting send record.
#[derive(Clone)]
pub struct Notifier {
    store: Arc<dyn Store>,
    gateway: Arc<dyn Gateway>,
    config: NotifierConfig,
}

impl Notifier {
    pub fn new(store: Arc<dyn Store>, gateway: Arc<dyn Gateway>, config: NotifierConfig) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    async fn addresses(&self, roles: &[Role], notice: &Notice) -> WorkflowResult<Vec<String>> {
        let mut addresses = Vec::new();
        for role in roles {
            let users = match role {
                Role::ManagingEditors => self.store.managing_editors().await?,
                Role::AreaEditor => self.user(notice.area_editor).await?,
                Role::Referee => self.user(notice.assignment.as_ref().map(|a| a.referee)).await?,
                Role::Author => self.user(notice.submission.as_ref().map(|s| s.author)).await?,
            };
            for user in users {
                if !addresses.contains(&user.email) {
                    addresses.push(user.email);
                }
            }
        }
        Ok(addresses)
    }

    async fn user(&self, id: Option<UserId>) -> WorkflowResult<Vec<crate::domain::User>> {
        match id {
            Some(id) => Ok(self.store.user(id).await?.into_iter().collect()),
            None => Ok(Vec::new()),
        }
    }

    async fn message(&self, notice: &Notice) -> WorkflowResult<OutgoingMessage> {
        let route = route_for(notice.action);
        let to = self.addresses(route.to, notice).await?;
        if to.is_empty() {
            return Err(DispatchError::NoRecipients(notice.action.as_str()).into());
        }
        let mut cc = self.addresses(route.cc, notice).await?;
        cc.retain(|address| !to.contains(address));

        Ok(OutgoingMessage {
            action: notice.action,
            to,
            cc,
            context: json!({
                "submission": notice.submission,
                "assignment": notice.assignment,
                "details": notice.details,
            }),
            submission_id: notice.submission_id(),
            assignment_id: notice.assignment_id(),
        })
    }

    async fn dispatch(&self, notice: &Notice) -> WorkflowResult<SendRecord> {
        let message = self.message(notice).await?;
        let attempts = self.config.attempts.max(1);
        let mut last_error = DispatchError::Gateway("no attempt made".to_string());

        for attempt in 1..=attempts {
            let result = tokio::time::timeout(self.config.timeout, self.gateway.send(&message))
                .await
                .unwrap_or(Err(DispatchError::Timeout(self.config.timeout)));
            match result {
                Ok(record) => {
                    debug!(action = %notice.action, attempt, "notification dispatched");
                    return Ok(record);
                }
                Err(e) => {
                    warn!(action = %notice.action, attempt, error = %e, "dispatch attempt failed");
                    last_error = e;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS * u64::from(attempt)))
                    .await;
            }
        }
        Err(WorkflowError::Dispatch(last_error))
    }

    /// Hands the notice to the gateway. The returned record is stamped
    /// with `now` so it lines up with the caller's clock. Nothing is
    /// persisted.
    pub async fn dispatch_at(
        &self,
        notice: &Notice,
        now: DateTime<Utc>,
    ) -> WorkflowResult<SendRecord> {
        let mut record = self.dispatch(notice).await?;
        record.created_at = now;
        Ok(record)
    }

    /// Dispatches the notice and stores its send record.
    pub async fn deliver(&self, notice: &Notice, now: DateTime<Utc>) -> WorkflowResult<SendRecord> {
        let record = self.dispatch_at(notice, now).await?;
        self.store.record_send(&record, SendWindow::Unguarded).await?;
        Ok(record)
    }

    /// Immediate notification after a committed mutation. Failures are
    /// logged and swallowed; the mutation stands.
    pub async fn notify(&self, notice: Notice, now: DateTime<Utc>) {
        if let Err(e) = self.deliver(&notice, now).await {
            error!(
                action = %notice.action,
                submission_id = ?notice.submission_id(),
                assignment_id = ?notice.assignment_id(),
                error = %e,
                "notification failed after state change"
            );
        }
    }
}
