use std::sync::Arc;

use papertrans::JobController;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheap to clone: the controller sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<JobController>,
    /// Largest accepted upload, also used to size the request body limit.
    pub max_upload_bytes: u64,
}

impl AppState {
    pub fn new(controller: Arc<JobController>, max_upload_bytes: u64) -> Self {
        Self {
            controller,
            max_upload_bytes,
        }
    }
}
