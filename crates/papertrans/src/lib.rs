pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod joblog;
pub mod lifecycle;
pub mod sanitize;
pub mod storage;
pub mod store;
pub mod worker;

pub use config::{EngineConfig, ServiceConfig};
pub use engine::{Credentials, Engine, ExecutionError, FailureKind};
pub use error::{ConfigError, PapertransError, Result, StorageError, ValidationError};
pub use joblog::{LogEvent, LogSink};
pub use lifecycle::{Download, JobController, RecoveryReport, SubmissionRequest, LOG_PLACEHOLDER};
pub use storage::ArtifactManager;
pub use store::{JobStore, MemoryJobStore, SqliteJobStore, StoreError, UpdateOutcome};
pub use worker::{Job, JobStatus, QueueError, Scheduler};
