use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::handlers::tasks;
use crate::state::AppState;

/// Room for multipart boundaries and the small text fields next to the file.
const MULTIPART_SLACK_BYTES: u64 = 1024 * 1024;

/// Build the application router.
///
/// ```text
/// POST   /api/tasks/submit              -> submit_task
/// GET    /api/tasks/list                -> list_tasks
/// GET    /api/tasks/detail/{id}         -> get_task
/// GET    /api/tasks/logs/{id}           -> get_task_log
/// GET    /api/tasks/logs/{id}/stream    -> stream_task_log (SSE)
/// GET    /api/tasks/download/{id}       -> download_output
/// DELETE /api/tasks/delete/{id}         -> delete_task
/// ```
pub fn build_router(state: AppState) -> Router {
    let body_limit = state
        .max_upload_bytes
        .saturating_add(MULTIPART_SLACK_BYTES)
        .try_into()
        .unwrap_or(usize::MAX);

    let tasks = Router::new()
        .route(
            "/submit",
            post(tasks::submit_task).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/list", get(tasks::list_tasks))
        .route("/detail/{id}", get(tasks::get_task))
        .route("/logs/{id}", get(tasks::get_task_log))
        .route("/logs/{id}/stream", get(tasks::stream_task_log))
        .route("/download/{id}", get(tasks::download_output))
        .route("/delete/{id}", delete(tasks::delete_task));

    Router::new()
        .nest("/api/tasks", tasks)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
