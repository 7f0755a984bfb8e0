//! Durable job records.
//!
//! [`JobStore`] is the only way the rest of the crate touches job records.
//! [`SqliteJobStore`] persists them across restarts; [`MemoryJobStore`] keeps
//! them in a map and is meant for tests and embedding.

use thiserror::Error;

use crate::db::DatabaseError;
use crate::worker::job::{Job, JobStatus, JobUpdate};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Job '{0}' already exists")]
    DuplicateId(String),

    #[error("Job '{0}' not found")]
    NotFound(String),

    #[error("Invalid update for job '{id}': {reason}")]
    InvalidUpdate { id: String, reason: String },

    #[error("Stored job '{id}' is corrupt: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Job store lock poisoned")]
    LockPoisoned,
}

/// What happened to an [`JobStore::update_status`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The transition was persisted.
    Applied,
    /// The record no longer exists (deleted meanwhile). No-op.
    Missing,
    /// The stored status does not allow this transition. No-op.
    Rejected { current: JobStatus },
}

/// Storage contract for job records.
///
/// All operations are synchronous and safe to call concurrently from the
/// submission path and the worker.
pub trait JobStore: Send + Sync {
    /// Persists a new record. Fails with [`StoreError::DuplicateId`] if the id exists.
    fn create(&self, job: &Job) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Result<Job, StoreError>;

    /// All records, most recent first.
    fn list(&self) -> Result<Vec<Job>, StoreError>;

    /// Records in `status`, oldest first.
    fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError>;

    /// Applies one state-machine transition.
    ///
    /// Late updates for deleted or already-terminal jobs are accepted and
    /// reported as [`UpdateOutcome::Missing`] / [`UpdateOutcome::Rejected`].
    fn update_status(&self, id: &str, update: &JobUpdate) -> Result<UpdateOutcome, StoreError>;

    /// Removes the record and returns it as it stood at removal.
    ///
    /// Removal and read are one atomic step: every transition applied before
    /// it is visible in the returned job, every later one sees
    /// [`UpdateOutcome::Missing`].
    fn delete(&self, id: &str) -> Result<Job, StoreError>;
}

fn check_update(id: &str, update: &JobUpdate) -> Result<(), StoreError> {
    update.validate().map_err(|reason| StoreError::InvalidUpdate {
        id: id.to_string(),
        reason,
    })
}
