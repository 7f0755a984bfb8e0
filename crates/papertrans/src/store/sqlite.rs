use chrono::{DateTime, SecondsFormat, Utc};

use super::{check_update, JobStore, StoreError, UpdateOutcome};
use crate::db::job_repo::{self, JobRow, StatusChange, TransitionRow};
use crate::db::{Database, DatabaseError};
use crate::worker::job::{EngineParams, Job, JobStatus, JobUpdate};

/// SQLite-backed [`JobStore`].
#[derive(Clone)]
pub struct SqliteJobStore {
    db: Database,
}

impl SqliteJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl JobStore for SqliteJobStore {
    fn create(&self, job: &Job) -> Result<(), StoreError> {
        let row = to_row(job)?;
        if !job_repo::insert(&self.db, &row)? {
            return Err(StoreError::DuplicateId(job.id.clone()));
        }
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Job, StoreError> {
        match job_repo::find_by_id(&self.db, id)? {
            Some(row) => from_row(row),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    fn list(&self) -> Result<Vec<Job>, StoreError> {
        job_repo::list_all(&self.db)?
            .into_iter()
            .map(from_row)
            .collect()
    }

    fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        job_repo::list_by_status(&self.db, status.as_str())?
            .into_iter()
            .map(from_row)
            .collect()
    }

    fn update_status(&self, id: &str, update: &JobUpdate) -> Result<UpdateOutcome, StoreError> {
        check_update(id, update)?;

        let output_files = update
            .output_files
            .as_ref()
            .map(|files| {
                serde_json::to_string(files).map_err(|source| DatabaseError::Json {
                    column: "output_files",
                    source,
                })
            })
            .transpose()?;

        let change = StatusChange {
            status: update.status.as_str().to_string(),
            started_at: update.started_at.map(format_timestamp),
            completed_at: update.completed_at.map(format_timestamp),
            error: update.error.clone(),
            output_files,
        };
        let allowed: Vec<&str> = update
            .status
            .predecessors()
            .iter()
            .map(JobStatus::as_str)
            .collect();

        match job_repo::transition(&self.db, id, &allowed, &change)? {
            TransitionRow::Applied => Ok(UpdateOutcome::Applied),
            TransitionRow::Missing => Ok(UpdateOutcome::Missing),
            TransitionRow::Rejected { current } => {
                let current: JobStatus = current.parse().map_err(|e| StoreError::Corrupt {
                    id: id.to_string(),
                    reason: format!("{}", e),
                })?;
                Ok(UpdateOutcome::Rejected { current })
            }
        }
    }

    fn delete(&self, id: &str) -> Result<Job, StoreError> {
        match job_repo::delete(&self.db, id)? {
            Some(row) => from_row(row),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }
}

/// Nanosecond precision keeps stored values equal to in-memory ones and
/// fixed-width strings sort chronologically.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn to_row(job: &Job) -> Result<JobRow, StoreError> {
    let params = serde_json::to_string(&job.params).map_err(|source| DatabaseError::Json {
        column: "params",
        source,
    })?;
    let output_files = if job.output_files.is_empty() {
        None
    } else {
        Some(
            serde_json::to_string(&job.output_files).map_err(|source| DatabaseError::Json {
                column: "output_files",
                source,
            })?,
        )
    };

    Ok(JobRow {
        id: job.id.clone(),
        filename: job.filename.clone(),
        status: job.status.as_str().to_string(),
        lang_in: job.lang_in.clone(),
        lang_out: job.lang_out.clone(),
        pages: job.pages.clone(),
        params,
        created_at: format_timestamp(job.created_at),
        started_at: job.started_at.map(format_timestamp),
        completed_at: job.completed_at.map(format_timestamp),
        error: job.error.clone(),
        output_files,
    })
}

fn from_row(row: JobRow) -> Result<Job, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        id: row.id.clone(),
        reason,
    };
    let parse_ts = |column: &str, value: &str| {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| corrupt(format!("{}: {}", column, e)))
    };

    let status: JobStatus = row
        .status
        .parse()
        .map_err(|e| corrupt(format!("{}", e)))?;
    let params: EngineParams =
        serde_json::from_str(&row.params).map_err(|e| corrupt(format!("params: {}", e)))?;
    let output_files: Vec<String> = match row.output_files.as_deref() {
        Some(raw) => {
            serde_json::from_str(raw).map_err(|e| corrupt(format!("output_files: {}", e)))?
        }
        None => Vec::new(),
    };
    let created_at = parse_ts("created_at", &row.created_at)?;
    let started_at = row
        .started_at
        .as_deref()
        .map(|v| parse_ts("started_at", v))
        .transpose()?;
    let completed_at = row
        .completed_at
        .as_deref()
        .map(|v| parse_ts("completed_at", v))
        .transpose()?;

    Ok(Job {
        id: row.id,
        filename: row.filename,
        status,
        lang_in: row.lang_in,
        lang_out: row.lang_out,
        pages: row.pages,
        params,
        created_at,
        started_at,
        completed_at,
        error: row.error,
        output_files,
    })
}
