use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{SendWindow, Store};
use crate::domain::{
    AreaEditorAssignment, AreaEditorChange, AssignmentChange, AssignmentId, DurationSettings,
    NewRefereeAssignment, NewSubmission, Recommendation, RefereeAssignment, Submission,
    SubmissionId, User, UserId,
};
use crate::error::{WorkflowError, WorkflowResult};
use crate::notify::{SendKey, SendRecord};

const SUBMISSION_COLUMNS: &str = "id, title, author, area, original_id, revision_number, \
    decision, decision_approved, decision_entered_at, decision_comments, archived, withdrawn, \
    sharing_token, created_at";

const ASSIGNMENT_COLUMNS: &str = "a.id, a.referee, a.submission_id, a.agreed, a.canceled, \
    a.decline_comment, a.recommendation, a.comments_for_editor, a.attachment_for_editor, \
    a.comments_for_author, a.attachment_for_author, a.report_completed, a.referee_letter, \
    a.assigned_at, a.response_due_at, a.agreed_at, a.declined_at, a.report_due_at, \
    a.report_originally_due_at, a.report_completed_at";

const SETTINGS_COLUMNS: &str = "days_to_assign_area_editor, days_for_initial_review, \
    days_to_remind_area_editor, days_for_external_review, days_to_respond_to_referee_request, \
    days_to_remind_unanswered_invitation, days_to_wait_after_invitation_reminder, \
    days_before_deadline_to_remind_referee, days_to_remind_overdue_referee, \
    days_to_extend_missed_report_deadlines, days_after_reports_completed_to_submit_decision, \
    days_to_remind_overdue_decision_approval, number_of_reports_expected";

#[derive(Debug, FromRow)]
struct SubmissionRow {
    id: i64,
    title: String,
    author: i64,
    area: i64,
    original_id: Option<i64>,
    revision_number: i32,
    decision: String,
    decision_approved: bool,
    decision_entered_at: Option<DateTime<Utc>>,
    decision_comments: Option<String>,
    archived: bool,
    withdrawn: bool,
    sharing_token: Uuid,
    created_at: DateTime<Utc>,
}

impl TryFrom<SubmissionRow> for Submission {
    type Error = WorkflowError;

    fn try_from(row: SubmissionRow) -> Result<Self, Self::Error> {
        Ok(Submission {
            id: row.id,
            title: row.title,
            author: row.author,
            area: row.area,
            original_id: row.original_id.unwrap_or(row.id),
            revision_number: row.revision_number,
            decision: row.decision.parse()?,
            decision_approved: row.decision_approved,
            decision_entered_at: row.decision_entered_at,
            decision_comments: row.decision_comments,
            archived: row.archived,
            withdrawn: row.withdrawn,
            sharing_token: row.sharing_token,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AssignmentRow {
    id: i64,
    referee: i64,
    submission_id: i64,
    agreed: Option<bool>,
    canceled: bool,
    decline_comment: Option<String>,
    recommendation: Option<String>,
    comments_for_editor: Option<String>,
    attachment_for_editor: Option<String>,
    comments_for_author: Option<String>,
    attachment_for_author: Option<String>,
    report_completed: bool,
    referee_letter: String,
    assigned_at: DateTime<Utc>,
    response_due_at: DateTime<Utc>,
    agreed_at: Option<DateTime<Utc>>,
    declined_at: Option<DateTime<Utc>>,
    report_due_at: Option<DateTime<Utc>>,
    report_originally_due_at: Option<DateTime<Utc>>,
    report_completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<AssignmentRow> for RefereeAssignment {
    type Error = WorkflowError;

    fn try_from(row: AssignmentRow) -> Result<Self, Self::Error> {
        Ok(RefereeAssignment {
            id: row.id,
            referee: row.referee,
            submission_id: row.submission_id,
            agreed: row.agreed,
            canceled: row.canceled,
            decline_comment: row.decline_comment,
            recommendation: row
                .recommendation
                .as_deref()
                .map(str::parse::<Recommendation>)
                .transpose()?,
            comments_for_editor: row.comments_for_editor,
            attachment_for_editor: row.attachment_for_editor,
            comments_for_author: row.comments_for_author,
            attachment_for_author: row.attachment_for_author,
            report_completed: row.report_completed,
            referee_letter: row.referee_letter,
            assigned_at: row.assigned_at,
            response_due_at: row.response_due_at,
            agreed_at: row.agreed_at,
            declined_at: row.declined_at,
            report_due_at: row.report_due_at,
            report_originally_due_at: row.report_originally_due_at,
            report_completed_at: row.report_completed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AreaEditorRow {
    id: i64,
    submission_id: i64,
    editor: i64,
    assigned_at: DateTime<Utc>,
    replaced_at: Option<DateTime<Utc>>,
}

impl From<AreaEditorRow> for AreaEditorAssignment {
    fn from(row: AreaEditorRow) -> Self {
        AreaEditorAssignment {
            id: row.id,
            submission_id: row.submission_id,
            editor: row.editor,
            assigned_at: row.assigned_at,
            replaced_at: row.replaced_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    name: String,
    email: String,
    is_managing_editor: bool,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            name: row.name,
            email: row.email,
            is_managing_editor: row.is_managing_editor,
        }
    }
}

#[derive(Debug, FromRow)]
struct SendRow {
    action: String,
    submission_id: Option<i64>,
    assignment_id: Option<i64>,
    created_at: DateTime<Utc>,
}

impl From<SendRow> for SendRecord {
    fn from(row: SendRow) -> Self {
        SendRecord {
            action: row.action,
            submission_id: row.submission_id,
            assignment_id: row.assignment_id,
            created_at: row.created_at,
        }
    }
}

fn submissions(rows: Vec<SubmissionRow>) -> WorkflowResult<Vec<Submission>> {
    rows.into_iter().map(Submission::try_from).collect()
}

fn assignments(rows: Vec<AssignmentRow>) -> WorkflowResult<Vec<RefereeAssignment>> {
    rows.into_iter().map(RefereeAssignment::try_from).collect()
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    async fn write_settings(
        &self,
        settings: &DurationSettings,
        overwrite: bool,
    ) -> WorkflowResult<()> {
        let conflict = if overwrite {
            "ON CONFLICT (id) DO UPDATE SET \
             days_to_assign_area_editor = EXCLUDED.days_to_assign_area_editor, \
             days_for_initial_review = EXCLUDED.days_for_initial_review, \
             days_to_remind_area_editor = EXCLUDED.days_to_remind_area_editor, \
             days_for_external_review = EXCLUDED.days_for_external_review, \
             days_to_respond_to_referee_request = EXCLUDED.days_to_respond_to_referee_request, \
             days_to_remind_unanswered_invitation = EXCLUDED.days_to_remind_unanswered_invitation, \
             days_to_wait_after_invitation_reminder = EXCLUDED.days_to_wait_after_invitation_reminder, \
             days_before_deadline_to_remind_referee = EXCLUDED.days_before_deadline_to_remind_referee, \
             days_to_remind_overdue_referee = EXCLUDED.days_to_remind_overdue_referee, \
             days_to_extend_missed_report_deadlines = EXCLUDED.days_to_extend_missed_report_deadlines, \
             days_after_reports_completed_to_submit_decision = EXCLUDED.days_after_reports_completed_to_submit_decision, \
             days_to_remind_overdue_decision_approval = EXCLUDED.days_to_remind_overdue_decision_approval, \
             number_of_reports_expected = EXCLUDED.number_of_reports_expected"
        } else {
            "ON CONFLICT (id) DO NOTHING"
        };
        let sql = format!(
            "INSERT INTO journal_settings (id, {SETTINGS_COLUMNS}) \
             VALUES (1, $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) {conflict}"
        );
        sqlx::query(&sql)
            .bind(settings.days_to_assign_area_editor)
            .bind(settings.days_for_initial_review)
            .bind(settings.days_to_remind_area_editor)
            .bind(settings.days_for_external_review)
            .bind(settings.days_to_respond_to_referee_request)
            .bind(settings.days_to_remind_unanswered_invitation)
            .bind(settings.days_to_wait_after_invitation_reminder)
            .bind(settings.days_before_deadline_to_remind_referee)
            .bind(settings.days_to_remind_overdue_referee)
            .bind(settings.days_to_extend_missed_report_deadlines)
            .bind(settings.days_after_reports_completed_to_submit_decision)
            .bind(settings.days_to_remind_overdue_decision_approval)
            .bind(settings.number_of_reports_expected)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_submission(
        tx: &mut Transaction<'_, Postgres>,
        new: &NewSubmission,
        original_id: Option<SubmissionId>,
        revision_number: i32,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Submission> {
        let sql = format!(
            "INSERT INTO submissions (title, author, area, original_id, revision_number, \
             sharing_token, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {SUBMISSION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, SubmissionRow>(&sql)
            .bind(&new.title)
            .bind(new.author)
            .bind(new.area)
            .bind(original_id)
            .bind(revision_number)
            .bind(Uuid::new_v4())
            .bind(now)
            .fetch_one(&mut **tx)
            .await?;
        Submission::try_from(row)
    }

    async fn insert_area_editor(
        tx: &mut Transaction<'_, Postgres>,
        submission_id: SubmissionId,
        editor: UserId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<AreaEditorAssignment> {
        let row = sqlx::query_as::<_, AreaEditorRow>(
            r#"
            INSERT INTO area_editor_assignments (submission_id, editor, assigned_at)
            VALUES ($1, $2, $3)
            RETURNING id, submission_id, editor, assigned_at, replaced_at
            "#,
        )
        .bind(submission_id)
        .bind(editor)
        .bind(now)
        .fetch_one(&mut **tx)
        .await?;
        Ok(row.into())
    }

    /// Inserts a send record unless blocked by the window. Holds a
    /// transaction-scoped advisory lock on the key so concurrent writers
    /// of the same key serialize.
    async fn insert_send(
        tx: &mut Transaction<'_, Postgres>,
        record: &SendRecord,
        window: SendWindow,
    ) -> WorkflowResult<bool> {
        sqlx::query(
            "SELECT pg_advisory_xact_lock(hashtext($1 || ':' || COALESCE($2, 0) || ':' || COALESCE($3, 0))::bigint)",
        )
        .bind(&record.action)
        .bind(record.submission_id)
        .bind(record.assignment_id)
        .execute(&mut **tx)
        .await?;

        let result = if window == SendWindow::Unguarded {
            sqlx::query(
                r#"
                INSERT INTO send_records (action, submission_id, assignment_id, created_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(&record.action)
            .bind(record.submission_id)
            .bind(record.assignment_id)
            .bind(record.created_at)
            .execute(&mut **tx)
            .await?
        } else {
            sqlx::query(
                r#"
                INSERT INTO send_records (action, submission_id, assignment_id, created_at)
                SELECT $1, $2, $3, $4
                WHERE NOT EXISTS (
                    SELECT 1 FROM send_records
                    WHERE action = $1
                      AND submission_id IS NOT DISTINCT FROM $2
                      AND assignment_id IS NOT DISTINCT FROM $3
                      AND ($5::timestamptz IS NULL OR created_at > $5)
                )
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(&record.action)
            .bind(record.submission_id)
            .bind(record.assignment_id)
            .bind(record.created_at)
            .bind(window.cutoff(record.created_at))
            .execute(&mut **tx)
            .await?
        };
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn settings(&self) -> WorkflowResult<DurationSettings> {
        let sql = format!("SELECT {SETTINGS_COLUMNS} FROM journal_settings WHERE id = 1");
        if let Some(settings) = sqlx::query_as::<_, DurationSettings>(&sql)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(settings);
        }
        self.write_settings(&DurationSettings::default(), false)
            .await?;
        Ok(sqlx::query_as::<_, DurationSettings>(&sql)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn save_settings(&self, settings: &DurationSettings) -> WorkflowResult<()> {
        settings.validate()?;
        self.write_settings(settings, true).await
    }

    async fn create_user(
        &self,
        name: &str,
        email: &str,
        is_managing_editor: bool,
    ) -> WorkflowResult<User> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (name, email, is_managing_editor)
            VALUES ($1, $2, $3)
            RETURNING id, name, email, is_managing_editor
            "#,
        )
        .bind(name)
        .bind(email)
        .bind(is_managing_editor)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn user(&self, id: UserId) -> WorkflowResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, is_managing_editor FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn managing_editors(&self) -> WorkflowResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, is_managing_editor FROM users \
             WHERE is_managing_editor ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn create_submission(
        &self,
        new: &NewSubmission,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Submission> {
        let mut tx = self.pool.begin().await?;
        let mut submission = Self::insert_submission(&mut tx, new, None, 0, now).await?;
        sqlx::query("UPDATE submissions SET original_id = id WHERE id = $1")
            .bind(submission.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        submission.original_id = submission.id;
        Ok(submission)
    }

    async fn submission(&self, id: SubmissionId) -> WorkflowResult<Option<Submission>> {
        let sql = format!("SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = $1");
        sqlx::query_as::<_, SubmissionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Submission::try_from)
            .transpose()
    }

    async fn update_submission(&self, submission: &Submission) -> WorkflowResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE submissions
            SET title = $2, area = $3, decision = $4, decision_approved = $5,
                decision_entered_at = $6, decision_comments = $7, archived = $8, withdrawn = $9
            WHERE id = $1
            "#,
        )
        .bind(submission.id)
        .bind(&submission.title)
        .bind(submission.area)
        .bind(submission.decision.as_str())
        .bind(submission.decision_approved)
        .bind(submission.decision_entered_at)
        .bind(&submission.decision_comments)
        .bind(submission.archived)
        .bind(submission.withdrawn)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(WorkflowError::not_found(format!(
                "submission {}",
                submission.id
            )));
        }
        Ok(())
    }

    async fn active_submissions(&self) -> WorkflowResult<Vec<Submission>> {
        let sql = format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions \
             WHERE NOT archived AND NOT withdrawn ORDER BY id"
        );
        let rows = sqlx::query_as::<_, SubmissionRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        submissions(rows)
    }

    async fn revision_chain(&self, original_id: SubmissionId) -> WorkflowResult<Vec<Submission>> {
        let sql = format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions \
             WHERE original_id = $1 ORDER BY revision_number"
        );
        let rows = sqlx::query_as::<_, SubmissionRow>(&sql)
            .bind(original_id)
            .fetch_all(&self.pool)
            .await?;
        submissions(rows)
    }

    async fn latest_version_number(&self, original_id: SubmissionId) -> WorkflowResult<i32> {
        let latest: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(revision_number), 0) FROM submissions WHERE original_id = $1",
        )
        .bind(original_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(latest)
    }

    async fn submit_revision(
        &self,
        predecessor_id: SubmissionId,
        new: &NewSubmission,
        carry_area_editor: Option<UserId>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Submission> {
        let mut tx = self.pool.begin().await?;

        let original_id: i64 = sqlx::query_scalar(
            "UPDATE submissions SET archived = true WHERE id = $1 \
             RETURNING COALESCE(original_id, id)",
        )
        .bind(predecessor_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| WorkflowError::not_found(format!("submission {predecessor_id}")))?;

        let latest: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(revision_number), 0) FROM submissions WHERE original_id = $1",
        )
        .bind(original_id)
        .fetch_one(&mut *tx)
        .await?;

        let revision =
            Self::insert_submission(&mut tx, new, Some(original_id), latest + 1, now).await?;
        if let Some(editor) = carry_area_editor {
            Self::insert_area_editor(&mut tx, revision.id, editor, now).await?;
        }

        tx.commit().await?;
        Ok(revision)
    }

    async fn area_editor(
        &self,
        submission_id: SubmissionId,
    ) -> WorkflowResult<Option<AreaEditorAssignment>> {
        let row = sqlx::query_as::<_, AreaEditorRow>(
            r#"
            SELECT id, submission_id, editor, assigned_at, replaced_at
            FROM area_editor_assignments
            WHERE submission_id = $1 AND replaced_at IS NULL
            "#,
        )
        .bind(submission_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(AreaEditorAssignment::from))
    }

    async fn assign_area_editor(
        &self,
        submission_id: SubmissionId,
        editor: UserId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<AreaEditorChange> {
        let mut tx = self.pool.begin().await?;

        let rotated = sqlx::query("UPDATE submissions SET sharing_token = $2 WHERE id = $1")
            .bind(submission_id)
            .bind(Uuid::new_v4())
            .execute(&mut *tx)
            .await?;
        if rotated.rows_affected() == 0 {
            return Err(WorkflowError::not_found(format!(
                "submission {submission_id}"
            )));
        }

        let previous: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE area_editor_assignments SET replaced_at = $2
            WHERE submission_id = $1 AND replaced_at IS NULL
            RETURNING editor
            "#,
        )
        .bind(submission_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let current = Self::insert_area_editor(&mut tx, submission_id, editor, now).await?;
        tx.commit().await?;
        Ok(AreaEditorChange { previous, current })
    }

    async fn create_assignment(
        &self,
        new: &NewRefereeAssignment,
    ) -> WorkflowResult<RefereeAssignment> {
        let sql = format!(
            "WITH a AS ( \
                INSERT INTO referee_assignments \
                    (referee, submission_id, referee_letter, assigned_at, response_due_at) \
                VALUES ($1, $2, $3, $4, $5) RETURNING * \
             ) SELECT {ASSIGNMENT_COLUMNS} FROM a"
        );
        let row = sqlx::query_as::<_, AssignmentRow>(&sql)
            .bind(new.referee)
            .bind(new.submission_id)
            .bind(&new.referee_letter)
            .bind(new.assigned_at)
            .bind(new.response_due_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(db) = &e {
                    if db.is_unique_violation() {
                        return new.conflict_error();
                    }
                }
                WorkflowError::from(e)
            })?;
        RefereeAssignment::try_from(row)
    }

    async fn assignment(&self, id: AssignmentId) -> WorkflowResult<Option<RefereeAssignment>> {
        let sql = format!("SELECT {ASSIGNMENT_COLUMNS} FROM referee_assignments a WHERE a.id = $1");
        sqlx::query_as::<_, AssignmentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(RefereeAssignment::try_from)
            .transpose()
    }

    async fn update_assignment(
        &self,
        assignment: &RefereeAssignment,
        change: AssignmentChange,
    ) -> WorkflowResult<bool> {
        let query = match change {
            AssignmentChange::Response => sqlx::query(
                r#"
                UPDATE referee_assignments
                SET agreed = $2, decline_comment = $3, agreed_at = $4, declined_at = $5,
                    report_due_at = $6, report_originally_due_at = $7
                WHERE id = $1 AND agreed IS NULL AND NOT canceled
                "#,
            )
            .bind(assignment.id)
            .bind(assignment.agreed)
            .bind(&assignment.decline_comment)
            .bind(assignment.agreed_at)
            .bind(assignment.declined_at)
            .bind(assignment.report_due_at)
            .bind(assignment.report_originally_due_at),
            AssignmentChange::Report => sqlx::query(
                r#"
                UPDATE referee_assignments
                SET recommendation = $2, comments_for_editor = $3, attachment_for_editor = $4,
                    comments_for_author = $5, attachment_for_author = $6,
                    report_completed = $7, report_completed_at = $8
                WHERE id = $1 AND agreed = TRUE AND NOT report_completed AND NOT canceled
                "#,
            )
            .bind(assignment.id)
            .bind(assignment.recommendation.map(|r| r.as_str()))
            .bind(&assignment.comments_for_editor)
            .bind(&assignment.attachment_for_editor)
            .bind(&assignment.comments_for_author)
            .bind(&assignment.attachment_for_author)
            .bind(assignment.report_completed)
            .bind(assignment.report_completed_at),
            AssignmentChange::Cancel => sqlx::query(
                "UPDATE referee_assignments SET canceled = TRUE \
                 WHERE id = $1 AND NOT canceled AND NOT report_completed",
            )
            .bind(assignment.id),
        };
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn assignments_for(
        &self,
        submission_id: SubmissionId,
    ) -> WorkflowResult<Vec<RefereeAssignment>> {
        let sql = format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM referee_assignments a \
             WHERE a.submission_id = $1 ORDER BY a.id"
        );
        let rows = sqlx::query_as::<_, AssignmentRow>(&sql)
            .bind(submission_id)
            .fetch_all(&self.pool)
            .await?;
        assignments(rows)
    }

    async fn last_send(&self, key: &SendKey) -> WorkflowResult<Option<SendRecord>> {
        let row = sqlx::query_as::<_, SendRow>(
            r#"
            SELECT action, submission_id, assignment_id, created_at
            FROM send_records
            WHERE action = $1
              AND submission_id IS NOT DISTINCT FROM $2
              AND assignment_id IS NOT DISTINCT FROM $3
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(&key.action)
        .bind(key.submission_id)
        .bind(key.assignment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(SendRecord::from))
    }

    async fn record_send(&self, record: &SendRecord, window: SendWindow) -> WorkflowResult<bool> {
        let mut tx = self.pool.begin().await?;
        let inserted = Self::insert_send(&mut tx, record, window).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn record_send_with_deadline(
        &self,
        record: &SendRecord,
        window: SendWindow,
        assignment_id: AssignmentId,
        report_due_at: DateTime<Utc>,
    ) -> WorkflowResult<bool> {
        let mut tx = self.pool.begin().await?;
        if !Self::insert_send(&mut tx, record, window).await? {
            return Ok(false);
        }
        let updated = sqlx::query("UPDATE referee_assignments SET report_due_at = $2 WHERE id = $1")
            .bind(assignment_id)
            .bind(report_due_at)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(WorkflowError::not_found(format!(
                "assignment {assignment_id}"
            )));
        }
        tx.commit().await?;
        Ok(true)
    }
}
