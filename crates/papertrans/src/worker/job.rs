use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Additional engine parameters, forwarded to the command line in key order.
pub type EngineParams = BTreeMap<String, String>;

/// Lifecycle state of a job.
///
/// `Queued → Running → {Success | Failed}`; terminal states admit no transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }

    /// States from which a job may move into `self`.
    pub fn predecessors(&self) -> &'static [JobStatus] {
        match self {
            JobStatus::Queued => &[],
            JobStatus::Running => &[JobStatus::Queued],
            JobStatus::Success | JobStatus::Failed => &[JobStatus::Running],
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        next.predecessors().contains(self)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored status string is not one of the known states.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Generates a job identifier: creation timestamp plus a random suffix.
///
/// The timestamp prefix keeps identifiers traceable and roughly sortable;
/// the suffix makes two submissions in the same second distinct.
pub fn new_job_id(created_at: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", created_at.format("%Y%m%d-%H%M%S"), &suffix[..8])
}

/// One document-translation request and its lifecycle record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    /// Original upload name (final path component only).
    pub filename: String,
    pub status: JobStatus,
    pub lang_in: String,
    pub lang_out: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<String>,
    #[serde(default)]
    pub params: EngineParams,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub output_files: Vec<String>,
}

impl Job {
    /// Creates a freshly submitted job in the `queued` state.
    pub fn queued(
        filename: String,
        lang_in: String,
        lang_out: String,
        pages: Option<String>,
        params: EngineParams,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: new_job_id(created_at),
            filename,
            status: JobStatus::Queued,
            lang_in,
            lang_out,
            pages,
            params,
            created_at,
            started_at: None,
            completed_at: None,
            error: None,
            output_files: Vec::new(),
        }
    }

    /// Applies an update in place. Callers check the transition first.
    pub fn apply(&mut self, update: &JobUpdate) {
        self.status = update.status;
        if let Some(at) = update.started_at {
            self.started_at = Some(at);
        }
        if let Some(at) = update.completed_at {
            self.completed_at = Some(at);
        }
        if let Some(error) = &update.error {
            self.error = Some(error.clone());
        }
        if let Some(outputs) = &update.output_files {
            self.output_files = outputs.clone();
        }
    }
}

/// A partial update describing one status transition.
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub output_files: Option<Vec<String>>,
}

impl JobUpdate {
    pub fn running(at: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Running,
            started_at: Some(at),
            completed_at: None,
            error: None,
            output_files: None,
        }
    }

    pub fn failed(at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            started_at: None,
            completed_at: Some(at),
            error: Some(error.into()),
            output_files: None,
        }
    }

    pub fn succeeded(at: DateTime<Utc>, output_files: Vec<String>) -> Self {
        Self {
            status: JobStatus::Success,
            started_at: None,
            completed_at: Some(at),
            error: None,
            output_files: Some(output_files),
        }
    }

    /// Checks the record invariants this update would establish.
    pub fn validate(&self) -> Result<(), String> {
        if self.status.is_terminal() != self.completed_at.is_some() {
            return Err(format!(
                "completed_at must be set exactly for terminal states (status {})",
                self.status
            ));
        }
        let has_outputs = self.output_files.as_ref().is_some_and(|o| !o.is_empty());
        if (self.status == JobStatus::Success) != has_outputs {
            return Err(format!(
                "output_files must be non-empty exactly for success (status {})",
                self.status
            ));
        }
        let has_error = self.error.as_ref().is_some_and(|e| !e.is_empty());
        if (self.status == JobStatus::Failed) != has_error {
            return Err(format!(
                "error must be set exactly for failed jobs (status {})",
                self.status
            ));
        }
        Ok(())
    }
}
