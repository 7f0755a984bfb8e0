use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use papertrans::{PapertransError, QueueError};

/// Application-level error type for HTTP handlers.
///
/// Wraps [`PapertransError`] for service errors and adds HTTP-specific
/// variants. Every variant renders as
/// `{"success": false, "error": <message>, "code": <CODE>}`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Service(#[from] PapertransError),

    /// The multipart body could not be read (malformed or over the size limit).
    #[error(transparent)]
    Multipart(#[from] MultipartError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Status, machine-readable code and client-facing message.
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Service(err) => classify(err),
            AppError::Multipart(err) => (err.status(), "INVALID_UPLOAD", err.body_text()),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                internal()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        let body = json!({
            "success": false,
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn classify(err: &PapertransError) -> (StatusCode, &'static str, String) {
    match err {
        PapertransError::Validation(e) => {
            (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
        }
        PapertransError::Queue(QueueError::Full { .. }) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "QUEUE_FULL",
            err.to_string(),
        ),
        PapertransError::Queue(QueueError::Closed) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "SHUTTING_DOWN",
            err.to_string(),
        ),
        PapertransError::JobNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
        PapertransError::OutputNotFound { .. } => {
            (StatusCode::NOT_FOUND, "OUTPUT_NOT_FOUND", err.to_string())
        }
        other => {
            tracing::error!(error = %other, "Service error");
            internal()
        }
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use papertrans::{StorageError, ValidationError};

    fn status_and_code(err: PapertransError) -> (StatusCode, &'static str) {
        let (status, code, _) = AppError::from(err).parts();
        (status, code)
    }

    #[test]
    fn test_validation_is_bad_request() {
        assert_eq!(
            status_and_code(ValidationError::MissingFile.into()),
            (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
        );
        assert_eq!(
            status_and_code(ValidationError::FileTooLarge { limit_bytes: 1 }.into()),
            (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
        );
    }

    #[test]
    fn test_full_queue_is_unavailable() {
        assert_eq!(
            status_and_code(QueueError::Full { capacity: 3 }.into()),
            (StatusCode::SERVICE_UNAVAILABLE, "QUEUE_FULL")
        );
    }

    #[test]
    fn test_missing_resources_are_not_found() {
        assert_eq!(
            status_and_code(PapertransError::JobNotFound("x".into())),
            (StatusCode::NOT_FOUND, "NOT_FOUND")
        );
        assert_eq!(
            status_and_code(PapertransError::OutputNotFound {
                job_id: "x".into(),
                file: "y.pdf".into(),
            }),
            (StatusCode::NOT_FOUND, "OUTPUT_NOT_FOUND")
        );
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err: PapertransError = StorageError::InvalidName("/etc/passwd".into()).into();
        let (status, code, message) = AppError::from(err).parts();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(code, "INTERNAL_ERROR");
        assert!(!message.contains("passwd"));
    }
}
