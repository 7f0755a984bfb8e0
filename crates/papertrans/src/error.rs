use std::path::PathBuf;
use thiserror::Error;

use crate::db::DatabaseError;
use crate::sanitize::redact_path;
use crate::store::StoreError;
use crate::worker::scheduler::QueueError;

#[derive(Error, Debug)]
pub enum PapertransError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Job '{0}' not found")]
    JobNotFound(String),

    #[error("Output '{file}' not found for job '{job_id}'")]
    OutputNotFound { job_id: String, file: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Submission problems reported synchronously, before any job exists.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no file uploaded")]
    MissingFile,

    #[error("invalid filename '{0}'")]
    InvalidFilename(String),

    #[error("unsupported file type '{0}': only PDF documents are accepted")]
    UnsupportedFileType(String),

    #[error("file exceeds the maximum upload size of {limit_bytes} bytes")]
    FileTooLarge { limit_bytes: u64 },

    #[error("invalid page range '{0}'")]
    InvalidPages(String),

    #[error("invalid language code '{0}'")]
    InvalidLanguage(String),

    #[error("invalid parameter name '{0}'")]
    InvalidParamKey(String),

    #[error("parameter '{0}' is reserved")]
    ReservedParam(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),

    #[error("Upload exceeds the limit of {limit_bytes} bytes")]
    TooLarge { limit_bytes: u64 },

    #[error("Invalid file name '{0}'")]
    InvalidName(String),

    #[error("Invalid output pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("No '*.{extension}' output in '{workspace}'")]
    NoOutputProduced { workspace: PathBuf, extension: String },
}

impl StorageError {
    /// Same message with every path cut down to its file name, for text that
    /// ends up in job records and job logs.
    pub fn redacted(&self) -> String {
        match self {
            StorageError::CreateDirectory { path, source } => {
                format!("Failed to create directory '{}': {}", redact_path(path), source)
            }
            StorageError::WriteFile { path, source } => {
                format!("Failed to write file '{}': {}", redact_path(path), source)
            }
            StorageError::ReadFile { path, source } => {
                format!("Failed to read file '{}': {}", redact_path(path), source)
            }
            StorageError::MoveFile { from, to, source } => format!(
                "Failed to move file from '{}' to '{}': {}",
                redact_path(from),
                redact_path(to),
                source
            ),
            StorageError::FileExists(path) => {
                format!("File already exists: {}", redact_path(path))
            }
            StorageError::NoOutputProduced {
                workspace,
                extension,
            } => format!(
                "No '*.{}' output in '{}'",
                extension,
                redact_path(workspace)
            ),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PapertransError>;
