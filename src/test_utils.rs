//! Fixtures shared by the unit and scenario tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::domain::{
    days, Decision, DurationSettings, RefereeAssignment, Submission, SubmissionId, User,
};
use crate::error::DispatchError;
use crate::notify::{Action, Gateway, Notifier, NotifierConfig, OutgoingMessage, SendRecord};
use crate::scan::ScanEngine;
use crate::store::{MemoryStore, Store};
use crate::workflow::Desk;

/// Fixed reference instant for deterministic tests.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub fn submission(id: SubmissionId) -> Submission {
    Submission {
        id,
        title: format!("Submission {id}"),
        author: 1,
        area: 1,
        original_id: id,
        revision_number: 0,
        decision: Decision::NoDecision,
        decision_approved: false,
        decision_entered_at: None,
        decision_comments: None,
        archived: false,
        withdrawn: false,
        sharing_token: Uuid::nil(),
        created_at: t0(),
    }
}

/// A pending invitation issued at `t0` with the default response window.
pub fn assignment(id: i64, submission_id: SubmissionId, referee: i64) -> RefereeAssignment {
    let settings = DurationSettings::default();
    RefereeAssignment {
        id,
        referee,
        submission_id,
        agreed: None,
        canceled: false,
        decline_comment: None,
        recommendation: None,
        comments_for_editor: None,
        attachment_for_editor: None,
        comments_for_author: None,
        attachment_for_author: None,
        report_completed: false,
        referee_letter: "A".to_string(),
        assigned_at: t0(),
        response_due_at: t0() + days(settings.days_to_respond_to_referee_request),
        agreed_at: None,
        declined_at: None,
        report_due_at: None,
        report_originally_due_at: None,
        report_completed_at: None,
    }
}

/// Gateway double that keeps every message it accepts. It can be told to
/// fail outright, or to hang on messages for one address.
#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<OutgoingMessage>>,
    failing: AtomicBool,
    stalled: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl RecordingGateway {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Messages to `address` never complete.
    pub fn stall_for(&self, address: &str) {
        *self.stalled.lock().unwrap() = Some(address.to_string());
    }

    /// Every `send` call, completed or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_for(&self, action: Action) -> Vec<OutgoingMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.action == action)
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl Gateway for RecordingGateway {
    async fn send(&self, message: &OutgoingMessage) -> Result<SendRecord, DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let stalled = self.stalled.lock().unwrap().clone();
        if stalled.is_some_and(|address| message.to.contains(&address)) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(DispatchError::Gateway("mail relay unavailable".to_string()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(SendRecord {
            action: message.action.as_str().to_string(),
            submission_id: message.submission_id,
            assignment_id: message.assignment_id,
            created_at: Utc::now(),
        })
    }
}

/// A desk wired to an in-memory store, with a managing editor, an area
/// editor, an author and three referees already registered.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<RecordingGateway>,
    pub scans: ScanEngine,
    pub desk: Desk,
    pub managing_editor: User,
    pub area_editor: User,
    pub author: User,
    pub referees: Vec<User>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_notifier(NotifierConfig {
            timeout: Duration::from_secs(1),
            attempts: 1,
        })
        .await
    }

    pub async fn with_notifier(config: NotifierConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(RecordingGateway::default());
        let notifier = Notifier::new(store.clone(), gateway.clone(), config);
        let scans = ScanEngine::new(store.clone(), notifier.clone());
        let desk = Desk::new(store.clone(), notifier, scans.clone());

        let managing_editor = store
            .create_user("Morgan Editor", "me@journal.test", true)
            .await
            .unwrap();
        let area_editor = store
            .create_user("Avery Area", "ae@journal.test", false)
            .await
            .unwrap();
        let author = store
            .create_user("Sam Author", "author@uni.test", false)
            .await
            .unwrap();
        let mut referees = Vec::new();
        for n in 1..=3 {
            referees.push(
                store
                    .create_user(&format!("Referee {n}"), &format!("ref{n}@uni.test"), false)
                    .await
                    .unwrap(),
            );
        }

        Self {
            store,
            gateway,
            scans,
            desk,
            managing_editor,
            area_editor,
            author,
            referees,
        }
    }

    pub async fn save_settings(&self, settings: DurationSettings) {
        self.store.save_settings(&settings).await.unwrap();
    }
}
