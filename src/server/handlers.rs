//! Route handlers.
//!
//! - `GET    /`                     browser UI
//! - `GET    /health`               liveness
//! - `GET    /api/templates`        template names and titles
//! - `POST   /api/runs`             multipart upload → `202 {id}`
//! - `GET    /api/runs/:id`         run status
//! - `GET    /api/runs/:id/result`  normalised result (when done)
//! - `GET    /api/runs/:id/report`  PDF download (when done; discards the run)
//! - `DELETE /api/runs/:id`         cancel and discard

use super::state::{AppState, RunHandle, RunProgress};
use crate::analyze::Pipeline;
use crate::config::PipelineConfig;
use crate::error::{ErrorKind, ScanbriefError};
use crate::output::NormalizedResult;
use crate::pipeline::input::Document;
use crate::prompts::AUTO_TEMPLATE;
use crate::state::{RunState, Stage};
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const INDEX_HTML: &str = include_str!("index.html");

// ── Errors ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

/// Errors a handler can answer with.
#[derive(Debug)]
pub enum ApiError {
    NotFound(Uuid),
    /// The run exists but has not finished successfully.
    NotReady(String),
    BadRequest(String),
    /// The upload was rejected before a run was created.
    Upload(ScanbriefError),
    Multipart(MultipartError),
    Internal(String),
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::Multipart(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, error) = match self {
            ApiError::NotFound(id) => (StatusCode::NOT_FOUND, "RUN_NOT_FOUND", format!("no run with id {id}")),
            ApiError::NotReady(msg) => (StatusCode::CONFLICT, "RUN_NOT_READY", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Upload(e) => match e.kind() {
                ErrorKind::UnsupportedFormat => {
                    (StatusCode::UNSUPPORTED_MEDIA_TYPE, "UNSUPPORTED_FORMAT", e.to_string())
                }
                ErrorKind::Extraction => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "EXTRACTION_FAILED", e.to_string())
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", e.to_string()),
            },
            ApiError::Multipart(e) => {
                let status = e.status();
                let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
                    "PAYLOAD_TOO_LARGE"
                } else {
                    "BAD_MULTIPART"
                };
                (status, code, e.body_text())
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };
        if status.is_server_error() {
            warn!("{} {}: {}", status.as_u16(), code, error);
        }
        (status, Json(ErrorBody { error, code })).into_response()
    }
}

// ── Response bodies ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct RunErrorBody {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct RunStatusResponse {
    pub id: Uuid,
    /// `active`, `done` or `failed`.
    pub state: &'static str,
    /// Current stage while active, failing stage when failed.
    pub stage: Option<Stage>,
    pub error: Option<RunErrorBody>,
}

impl RunStatusResponse {
    fn new(id: Uuid, status: RunState) -> Self {
        match status {
            RunState::Active { stage } => Self {
                id,
                state: "active",
                stage: Some(stage),
                error: None,
            },
            RunState::Done => Self {
                id,
                state: "done",
                stage: None,
                error: None,
            },
            RunState::Failed {
                stage,
                kind,
                message,
            } => Self {
                id,
                state: "failed",
                stage: Some(stage),
                error: Some(RunErrorBody {
                    stage,
                    kind,
                    message,
                }),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TemplateInfo {
    pub name: String,
    pub title: String,
}

// ── Handlers ─────────────────────────────────────────────────────────────

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn list_templates(State(state): State<AppState>) -> Json<Vec<TemplateInfo>> {
    let mut out = vec![TemplateInfo {
        name: AUTO_TEMPLATE.to_string(),
        title: "Detect automatically".to_string(),
    }];
    out.extend(state.config.templates.iter().map(|t| TemplateInfo {
        name: t.name.clone(),
        title: t.title.clone(),
    }));
    Json(out)
}

/// Upload fields: `file` (required), `template`, `target_language`.
pub async fn create_run(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let mut file: Option<(Vec<u8>, Option<String>, Option<String>)> = None;
    let mut template: Option<String> = None;
    let mut target_language: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().map(str::to_string);
                let mime = field.content_type().map(str::to_string);
                let data = field.bytes().await?;
                debug!(
                    "Received file field: name={:?}, content_type={:?}, {} bytes",
                    file_name,
                    mime,
                    data.len()
                );
                file = Some((data.to_vec(), mime, file_name));
            }
            "template" => template = non_blank(field.text().await?),
            "target_language" => target_language = non_blank(field.text().await?),
            other => debug!("Ignoring multipart field '{}'", other),
        }
    }

    let (bytes, mime, file_name) = file
        .ok_or_else(|| ApiError::BadRequest("no file provided; use the 'file' field".into()))?;
    let doc = Document::from_upload_async(bytes, mime, file_name)
        .await
        .map_err(ApiError::Upload)?;

    let id = Uuid::new_v4();
    let (handle, status) = RunHandle::new();
    let cancel = handle.cancel.clone();

    let mut config = (*state.config).clone();
    if let Some(t) = template {
        config.template = t;
    }
    if target_language.is_some() {
        config.prompt.target_language = target_language;
    }
    config.progress_callback = Some(Arc::new(RunProgress {
        id,
        status: status.clone(),
    }));

    state.insert(id, handle).await;
    info!(run = %id, template = %config.template, "Run accepted");
    tokio::spawn(execute(state, id, config, doc, cancel, status));

    Ok((StatusCode::ACCEPTED, Json(CreatedResponse { id })))
}

fn non_blank(s: String) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

/// Drive one run to completion and store its outcome.
///
/// The pipeline runs in its own task so a panic still ends in a terminal
/// `Failed(_, Internal)` state with a finish time.
async fn execute(
    state: AppState,
    id: Uuid,
    config: PipelineConfig,
    doc: Document,
    cancel: CancellationToken,
    status: watch::Sender<RunState>,
) {
    let pipeline = Pipeline::new(config);
    let task = tokio::spawn(async move { pipeline.run(doc, &cancel).await });
    let outcome = task.await;

    let mut runs = state.runs.write().await;
    let Some(handle) = runs.get_mut(&id) else {
        debug!(run = %id, "Run discarded before completion");
        return;
    };
    handle.finished = Some(Instant::now());
    match outcome {
        Ok(Ok(output)) => {
            handle.result = Some(output.result);
            handle.report = Some(output.report);
            status.send_replace(RunState::Done);
            info!(run = %id, "Run done in {}ms", output.stats.total_duration_ms);
        }
        // The failure state was already published by the progress callback.
        Ok(Err(failure)) => warn!(run = %id, "Run failed: {}", failure),
        Err(e) => {
            let stage = match handle.status() {
                RunState::Active { stage } => stage,
                _ => Stage::Uploaded,
            };
            error!(run = %id, "Run task aborted at {}: {}", stage, e);
            status.send_replace(RunState::Failed {
                stage,
                kind: ErrorKind::Internal,
                message: format!("run task aborted: {e}"),
            });
        }
    }
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunStatusResponse>, ApiError> {
    let runs = state.runs.read().await;
    let handle = runs.get(&id).ok_or(ApiError::NotFound(id))?;
    Ok(Json(RunStatusResponse::new(id, handle.status())))
}

pub async fn get_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<NormalizedResult>, ApiError> {
    let runs = state.runs.read().await;
    let handle = runs.get(&id).ok_or(ApiError::NotFound(id))?;
    match &handle.result {
        Some(result) => Ok(Json(result.clone())),
        None => Err(not_ready(handle)),
    }
}

/// Serve the report once; the run is discarded afterwards.
pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let mut runs = state.runs.write().await;
    let handle = runs.get(&id).ok_or(ApiError::NotFound(id))?;
    if handle.report.is_none() {
        return Err(not_ready(handle));
    }
    let report = runs
        .remove(&id)
        .and_then(|h| h.report)
        .ok_or_else(|| ApiError::Internal("report vanished".into()))?;
    drop(runs);

    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        report.file_name
    ))
    .map_err(|e| ApiError::Internal(format!("bad file name: {e}")))?;
    info!(run = %id, "Report downloaded ({} bytes)", report.bytes.len());

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        report.bytes,
    )
        .into_response())
}

pub async fn delete_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let handle = state
        .runs
        .write()
        .await
        .remove(&id)
        .ok_or(ApiError::NotFound(id))?;
    handle.cancel.cancel();
    info!(run = %id, "Run cancelled and discarded");
    Ok(StatusCode::NO_CONTENT)
}

fn not_ready(handle: &RunHandle) -> ApiError {
    match handle.status() {
        RunState::Failed { stage, message, .. } => {
            ApiError::NotReady(format!("run failed at {stage}: {message}"))
        }
        RunState::Active { stage } => ApiError::NotReady(format!("run is still {stage}")),
        RunState::Done => ApiError::NotReady("run has no report".into()),
    }
}
