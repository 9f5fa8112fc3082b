use axum::{
    extract::{Multipart, Path, State},
    http::header,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use crate::domain::revision::RevisionRequest;
use crate::domain::{
    AreaEditorChange, AreaId, AssignmentId, Attachment, Decision, DurationSettings,
    NewSubmission, Recommendation, RefereeAssignment, ReportSubmission, Submission,
    SubmissionId, User, UserId, MAX_ATTACHMENT_BYTES,
};
use crate::error::{WorkflowError, WorkflowResult};
use crate::review::SubmissionView;
use crate::scan::{ScanKind, ScanReport};
use crate::state::AppState;

type ApiResult<T> = Result<Json<T>, WorkflowError>;

/// Request body ceiling on the upload route. Files above
/// `MAX_ATTACHMENT_BYTES` but under this are refused with a size error.
pub const UPLOAD_BODY_LIMIT: usize = 2 * MAX_ATTACHMENT_BYTES as usize;

#[derive(Deserialize)]
pub struct UserForm {
    name: String,
    email: String,
    #[serde(default)]
    is_managing_editor: bool,
}

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Json(form): Json<UserForm>,
) -> ApiResult<User> {
    let user = state
        .desk
        .register_user(&form.name, &form.email, form.is_managing_editor)
        .await?;
    Ok(Json(user))
}

pub async fn get_settings(State(state): State<Arc<AppState>>) -> ApiResult<DurationSettings> {
    Ok(Json(state.desk.settings().await?))
}

pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<DurationSettings>,
) -> ApiResult<DurationSettings> {
    Ok(Json(state.desk.update_settings(settings).await?))
}

#[derive(Deserialize)]
pub struct SubmissionForm {
    title: String,
    author: UserId,
    area: AreaId,
}

pub async fn create_submission(
    State(state): State<Arc<AppState>>,
    Json(form): Json<SubmissionForm>,
) -> ApiResult<Submission> {
    let new = NewSubmission {
        title: form.title.trim().to_string(),
        author: form.author,
        area: form.area,
    };
    Ok(Json(state.desk.submit(new, Utc::now()).await?))
}

pub async fn view_submission(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<SubmissionId>,
) -> ApiResult<SubmissionView> {
    Ok(Json(state.desk.view(submission_id, Utc::now()).await?))
}

#[derive(Deserialize)]
pub struct AreaEditorForm {
    editor: UserId,
}

pub async fn assign_area_editor(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<SubmissionId>,
    Json(form): Json<AreaEditorForm>,
) -> ApiResult<AreaEditorChange> {
    let change = state
        .desk
        .assign_area_editor(submission_id, form.editor, Utc::now())
        .await?;
    Ok(Json(change))
}

#[derive(Deserialize)]
pub struct InviteForm {
    referee: UserId,
}

pub async fn invite_referee(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<SubmissionId>,
    Json(form): Json<InviteForm>,
) -> ApiResult<RefereeAssignment> {
    let assignment = state
        .desk
        .invite_referee(submission_id, form.referee, Utc::now())
        .await?;
    Ok(Json(assignment))
}

#[derive(Deserialize)]
pub struct DecisionForm {
    decision: String,
    comments: Option<String>,
}

pub async fn enter_decision(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<SubmissionId>,
    Json(form): Json<DecisionForm>,
) -> ApiResult<Submission> {
    let decision: Decision = form.decision.parse()?;
    let submission = state
        .desk
        .enter_decision(submission_id, decision, form.comments, Utc::now())
        .await?;
    Ok(Json(submission))
}

pub async fn approve_decision(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<SubmissionId>,
) -> ApiResult<Submission> {
    Ok(Json(
        state.desk.approve_decision(submission_id, Utc::now()).await?,
    ))
}

pub async fn withdraw_submission(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<SubmissionId>,
) -> ApiResult<Submission> {
    Ok(Json(state.desk.withdraw(submission_id, Utc::now()).await?))
}

#[derive(Deserialize)]
pub struct ArchiveForm {
    archived: bool,
}

pub async fn set_archived(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<SubmissionId>,
    Json(form): Json<ArchiveForm>,
) -> ApiResult<Submission> {
    let submission = state
        .desk
        .set_archived(submission_id, form.archived, Utc::now())
        .await?;
    Ok(Json(submission))
}

pub async fn submit_revision(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<SubmissionId>,
    Json(request): Json<RevisionRequest>,
) -> ApiResult<Submission> {
    let revision = state
        .desk
        .submit_revision(submission_id, request, Utc::now())
        .await?;
    Ok(Json(revision))
}

#[derive(Deserialize)]
pub struct RespondForm {
    agreed: bool,
    comment: Option<String>,
}

pub async fn respond(
    State(state): State<Arc<AppState>>,
    Path(assignment_id): Path<AssignmentId>,
    Json(form): Json<RespondForm>,
) -> ApiResult<RefereeAssignment> {
    let assignment = state
        .desk
        .respond(assignment_id, form.agreed, form.comment, Utc::now())
        .await?;
    Ok(Json(assignment))
}

/// Report fields as posted. Attachments are references returned by the
/// upload endpoint.
#[derive(Deserialize)]
pub struct ReportForm {
    recommendation: Option<String>,
    comments_for_editor: Option<String>,
    attachment_for_editor: Option<String>,
    comments_for_author: Option<String>,
    attachment_for_author: Option<String>,
}

async fn resolve_attachment(
    state: &AppState,
    reference: Option<String>,
) -> WorkflowResult<Option<Attachment>> {
    match reference.filter(|r| !r.is_empty()) {
        Some(r) => Ok(Some(state.files.attachment(&r).await?)),
        None => Ok(None),
    }
}

async fn report_from_form(state: &AppState, form: ReportForm) -> WorkflowResult<ReportSubmission> {
    let recommendation = form
        .recommendation
        .filter(|r| !r.is_empty())
        .map(|r| r.parse::<Recommendation>())
        .transpose()?;
    Ok(ReportSubmission {
        recommendation,
        comments_for_editor: form.comments_for_editor,
        attachment_for_editor: resolve_attachment(state, form.attachment_for_editor).await?,
        comments_for_author: form.comments_for_author,
        attachment_for_author: resolve_attachment(state, form.attachment_for_author).await?,
    })
}

pub async fn save_report_draft(
    State(state): State<Arc<AppState>>,
    Path(assignment_id): Path<AssignmentId>,
    Json(form): Json<ReportForm>,
) -> ApiResult<RefereeAssignment> {
    let report = report_from_form(&state, form).await?;
    Ok(Json(state.desk.save_draft(assignment_id, report).await?))
}

pub async fn submit_report(
    State(state): State<Arc<AppState>>,
    Path(assignment_id): Path<AssignmentId>,
    Json(form): Json<ReportForm>,
) -> ApiResult<RefereeAssignment> {
    let report = report_from_form(&state, form).await?;
    let assignment = state
        .desk
        .submit_report(assignment_id, report, Utc::now())
        .await?;
    Ok(Json(assignment))
}

pub async fn cancel_assignment(
    State(state): State<Arc<AppState>>,
    Path(assignment_id): Path<AssignmentId>,
) -> ApiResult<RefereeAssignment> {
    Ok(Json(
        state
            .desk
            .cancel_assignment(assignment_id, Utc::now())
            .await?,
    ))
}

/// `all` runs every scan in turn.
pub async fn run_scan(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Vec<ScanReport>> {
    let now = Utc::now();
    let reports = if name == "all" {
        state.scans.run_all(now).await?
    } else {
        let kind: ScanKind = name.parse()?;
        vec![state.scans.run(kind, now).await?]
    };
    Ok(Json(reports))
}

pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<Attachment> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| WorkflowError::Validation(format!("bad multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("attachment").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| WorkflowError::Validation(format!("reading upload: {e}")))?;
        if data.is_empty() {
            return Err(WorkflowError::Validation("uploaded file is empty".to_string()));
        }
        Attachment {
            reference: filename.clone(),
            size_bytes: data.len() as u64,
        }
        .check_size()?;

        let attachment = state.files.save(&filename, &data).await?;
        tracing::info!(
            reference = %attachment.reference,
            size_bytes = attachment.size_bytes,
            "file uploaded"
        );
        return Ok(Json(attachment));
    }
    Err(WorkflowError::Validation(
        "multipart field \"file\" is required".to_string(),
    ))
}

pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, WorkflowError> {
    let content = state.files.read(&reference).await?;
    let mime = mime_guess::from_path(&reference)
        .first_raw()
        .unwrap_or("application/octet-stream");
    Ok((
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", reference),
            ),
        ],
        content,
    ))
}
