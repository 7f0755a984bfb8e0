//! Handlers for the `/api/tasks` resource.

use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use papertrans::lifecycle::SubmissionRequest;
use papertrans::{Job, PapertransError, StorageError, ValidationError};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub task_id: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub file: Option<String>,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/tasks/submit
///
/// Multipart form with a `file` field, optional `lang_in`, `lang_out` and
/// `pages`; every other field is forwarded to the engine as a parameter.
pub async fn submit_task(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<SubmitResponse>> {
    let mut request = SubmissionRequest::default();
    let mut upload: Option<Bytes> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                request.filename = field.file_name().map(str::to_string);
                upload = Some(field.bytes().await?);
            }
            "lang_in" => request.lang_in = Some(field.text().await?),
            "lang_out" => request.lang_out = Some(field.text().await?),
            "pages" => request.pages = Some(field.text().await?),
            "" => {}
            _ => {
                let value = field.text().await?;
                request.params.insert(name, value);
            }
        }
    }

    let upload = upload.ok_or_else(|| PapertransError::from(ValidationError::MissingFile))?;
    let job = state.controller.submit(request, upload.as_ref()).await?;

    tracing::info!(job_id = %job.id, filename = %job.filename, "Task submitted");

    Ok(Json(SubmitResponse {
        success: true,
        task_id: job.id,
    }))
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// GET /api/tasks/list
///
/// All tasks, most recent first.
pub async fn list_tasks(State(state): State<AppState>) -> AppResult<Json<Vec<Job>>> {
    Ok(Json(state.controller.list()?))
}

/// GET /api/tasks/detail/{id}
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Job>> {
    Ok(Json(state.controller.get(&id)?))
}

/// GET /api/tasks/logs/{id}
///
/// The log as plain text, or a placeholder before the task has started.
pub async fn get_task_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let text = state.controller.read_log(&id).await?;
    Ok(([(CONTENT_TYPE, "text/plain; charset=utf-8")], text))
}

/// GET /api/tasks/logs/{id}/stream
///
/// Server-sent events: one `data` event per log line, then an `end` event
/// once the task's log is closed.
pub async fn stream_task_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let lines = state.controller.subscribe_logs(&id).await?;
    let events = lines
        .map(|line| Event::default().data(line))
        .chain(stream::once(async { Event::default().event("end").data("") }))
        .map(Ok);

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

/// GET /api/tasks/download/{id}?file=<name>
///
/// Streams one of the task's outputs as an attachment; the first output
/// when `file` is omitted.
pub async fn download_output(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> AppResult<Response> {
    let download = state
        .controller
        .resolve_download(&id, query.file.as_deref())?;

    let file = tokio::fs::File::open(&download.path).await.map_err(|e| {
        PapertransError::from(StorageError::ReadFile {
            path: download.path.clone(),
            source: e,
        })
    })?;

    let mime = mime_guess::from_path(&download.name).first_or_octet_stream();
    let content_type = HeaderValue::from_str(mime.essence_str())
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let disposition = HeaderValue::from_str(&content_disposition(&download.name))
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        [(CONTENT_TYPE, content_type), (CONTENT_DISPOSITION, disposition)],
        body,
    )
        .into_response())
}

/// `attachment` disposition with an ASCII fallback name and the exact name
/// percent-encoded per RFC 5987.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    )
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

/// DELETE /api/tasks/delete/{id}
///
/// Removes the task record, its log, its input and every output.
pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DeleteResponse>> {
    state.controller.delete(&id).await?;
    tracing::info!(job_id = %id, "Task deleted");
    Ok(Json(DeleteResponse { success: true }))
}
