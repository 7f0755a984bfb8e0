//! Supervised execution of the external translation engine.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::error::StorageError;

pub mod command;
pub mod runner;

pub use command::{param_arg, Credentials, EngineCommand, ParamArg, RESERVED_PARAMS};
pub use runner::{Engine, ExecutionResult};

/// Machine-readable failure category recorded with a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    #[serde(rename = "IOFailure")]
    IoFailure,
    MissingCredentials,
    ExecutionFailure,
    NoOutputProduced,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::IoFailure => "IOFailure",
            FailureKind::MissingCredentials => "MissingCredentials",
            FailureKind::ExecutionFailure => "ExecutionFailure",
            FailureKind::NoOutputProduced => "NoOutputProduced",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("{}", .0.redacted())]
    Io(#[from] StorageError),

    #[error("no API key available: set OPENAI_API_KEY or pass openai-api-key")]
    MissingCredentials,

    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for the engine: {0}")]
    Wait(#[source] std::io::Error),

    #[error("engine terminated unsuccessfully ({status})")]
    ExitStatus { status: String },

    #[error("engine exited cleanly but produced no '*.{extension}' output")]
    NoOutputProduced { extension: String },

    #[error("none of the {failed} engine output(s) could be moved to the output area")]
    Finalize { failed: usize },

    #[error("job processing panicked: {0}")]
    Panicked(String),
}

impl ExecutionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ExecutionError::Io(_) | ExecutionError::Finalize { .. } => FailureKind::IoFailure,
            ExecutionError::MissingCredentials => FailureKind::MissingCredentials,
            ExecutionError::Spawn { .. }
            | ExecutionError::Wait(_)
            | ExecutionError::ExitStatus { .. }
            | ExecutionError::Panicked(_) => FailureKind::ExecutionFailure,
            ExecutionError::NoOutputProduced { .. } => FailureKind::NoOutputProduced,
        }
    }

    /// The text stored in the job's `error` field: `"<Kind>: <cause>"`.
    pub fn job_error(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}
