use std::path::PathBuf;
use std::sync::Arc;

use futures_util::stream::{self, BoxStream, StreamExt};
use log::{info, warn};
use tokio::io::AsyncRead;

use super::processor::JobProcessor;
use super::submission::{SubmissionDefaults, SubmissionRequest};
use crate::config::ServiceConfig;
use crate::db::Database;
use crate::engine::Engine;
use crate::error::{PapertransError, Result, StorageError, ValidationError};
use crate::joblog::LogSink;
use crate::storage::ArtifactManager;
use crate::store::{JobStore, SqliteJobStore, StoreError};
use crate::worker::job::{Job, JobStatus};
use crate::worker::scheduler::{QueueError, Scheduler};

/// Returned by [`JobController::read_log`] when a job has no log yet.
pub const LOG_PLACEHOLDER: &str = "log not available: the job has not started yet";

/// A finalized output ready to be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub name: String,
    pub path: PathBuf,
}

/// What [`JobController::recover`] found in the store at startup.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Queued jobs put back on the queue, oldest first.
    pub requeued: Vec<String>,
    /// Queued jobs left waiting because the queue filled up.
    pub deferred: Vec<String>,
    /// Jobs that were running when the service stopped.
    pub interrupted: Vec<String>,
}

/// Entry point for everything that happens to a job.
///
/// Owns the scheduler and its single worker; submissions and queries may be
/// issued concurrently from any task.
pub struct JobController {
    store: Arc<dyn JobStore>,
    artifacts: ArtifactManager,
    logs: LogSink,
    scheduler: Scheduler,
    defaults: SubmissionDefaults,
}

impl JobController {
    /// Opens the SQLite store under the configured data directory and starts
    /// the worker. Must be called from within a tokio runtime.
    pub fn open(config: &ServiceConfig) -> Result<Self> {
        let db = Database::open(&config.database_path())?;
        Self::start(config, Arc::new(SqliteJobStore::new(db)))
    }

    /// Starts the worker on top of an existing store.
    pub fn start(config: &ServiceConfig, store: Arc<dyn JobStore>) -> Result<Self> {
        let artifacts = ArtifactManager::new(
            config.uploads_dir(),
            config.outputs_dir(),
            config.max_upload_bytes,
        );
        artifacts.ensure_layout()?;
        let logs_dir = config.logs_dir();
        std::fs::create_dir_all(&logs_dir).map_err(|e| StorageError::CreateDirectory {
            path: logs_dir.clone(),
            source: e,
        })?;
        let logs = LogSink::new(&logs_dir);

        let engine = Engine::new(config.engine.clone(), artifacts.clone());
        let processor = JobProcessor::new(
            Arc::clone(&store),
            artifacts.clone(),
            logs.clone(),
            engine,
        );
        let supervisor = processor.clone();
        let scheduler = Scheduler::start_supervised(
            config.queue_capacity,
            move |job_id: String| {
                let processor = processor.clone();
                async move { processor.process(&job_id).await }
            },
            move |job_id: &str, reason: &str| supervisor.abandon(job_id, reason),
        );

        info!(
            "Job service ready (data directory {})",
            config.data_dir.display()
        );

        Ok(Self {
            store,
            artifacts,
            logs,
            scheduler,
            defaults: SubmissionDefaults {
                lang_in: config.default_lang_in.clone(),
                lang_out: config.default_lang_out.clone(),
            },
        })
    }

    /// Validates a request, stores its upload and queues it.
    ///
    /// On any failure nothing is left behind: no record, no input file.
    pub async fn submit<R>(&self, request: SubmissionRequest, upload: R) -> Result<Job>
    where
        R: AsyncRead + Unpin,
    {
        let job = request.into_job(&self.defaults)?;
        self.store.create(&job)?;

        if let Err(e) = self
            .artifacts
            .store_input(&job.id, &job.filename, upload)
            .await
        {
            self.rollback(&job);
            return Err(match e {
                StorageError::TooLarge { limit_bytes } => {
                    ValidationError::FileTooLarge { limit_bytes }.into()
                }
                other => other.into(),
            });
        }

        if let Err(e) = self.scheduler.enqueue(&job.id) {
            warn!("Rejecting job {}: {}", job.id, e);
            self.artifacts.remove(&job.id, &job.filename, &[]);
            self.rollback(&job);
            return Err(e.into());
        }

        info!("Job {} queued ({})", job.id, job.filename);
        Ok(job)
    }

    fn rollback(&self, job: &Job) {
        if let Err(e) = self.store.delete(&job.id) {
            warn!("Cannot roll back job {}: {}", job.id, e);
        }
    }

    pub fn get(&self, job_id: &str) -> Result<Job> {
        self.store.get(job_id).map_err(|e| match e {
            StoreError::NotFound(id) => PapertransError::JobNotFound(id),
            other => other.into(),
        })
    }

    /// All jobs, most recent first.
    pub fn list(&self) -> Result<Vec<Job>> {
        Ok(self.store.list()?)
    }

    /// Current log text, or [`LOG_PLACEHOLDER`] before the job has started.
    pub async fn read_log(&self, job_id: &str) -> Result<String> {
        self.get(job_id)?;
        Ok(self
            .logs
            .read(job_id)
            .await?
            .unwrap_or_else(|| LOG_PLACEHOLDER.to_string()))
    }

    /// Log lines written so far, followed by live lines until the job's log
    /// is closed. Lines written between the snapshot and the subscription
    /// may appear twice.
    pub async fn subscribe_logs(&self, job_id: &str) -> Result<BoxStream<'static, String>> {
        self.get(job_id)?;
        // Subscribe before the snapshot so nothing falls in between.
        let live = self.logs.follow(job_id);
        let snapshot = self.logs.read(job_id).await?.unwrap_or_default();
        let backlog: Vec<String> = snapshot.lines().map(str::to_string).collect();

        // A terminal job's writer may already be gone; nothing more will come.
        let status = self.get(job_id)?.status;
        if status.is_terminal() {
            Ok(stream::iter(backlog).boxed())
        } else {
            Ok(stream::iter(backlog).chain(live).boxed())
        }
    }

    /// Resolves a download request against the job's recorded outputs.
    ///
    /// Without `file`, the first output is served.
    pub fn resolve_download(&self, job_id: &str, file: Option<&str>) -> Result<Download> {
        let job = self.get(job_id)?;
        let not_found = |name: &str| PapertransError::OutputNotFound {
            job_id: job_id.to_string(),
            file: name.to_string(),
        };

        let name = match file.map(str::trim).filter(|f| !f.is_empty()) {
            Some(name) => name,
            None => job
                .output_files
                .first()
                .map(String::as_str)
                .ok_or_else(|| not_found(""))?,
        };
        if !job.output_files.iter().any(|o| o == name) {
            return Err(not_found(name));
        }

        let path = self.artifacts.output_path(name)?;
        if !path.is_file() {
            return Err(not_found(name));
        }
        Ok(Download {
            name: name.to_string(),
            path,
        })
    }

    /// Deletes a job and every file it owns.
    ///
    /// The record goes first and comes back as it stood at that moment, so
    /// the files removed here are exactly the ones it recorded. A running job
    /// keeps running; its late outputs are discarded when it ends.
    pub async fn delete(&self, job_id: &str) -> Result<()> {
        let job = self.store.delete(job_id).map_err(|e| match e {
            StoreError::NotFound(id) => PapertransError::JobNotFound(id),
            other => other.into(),
        })?;

        self.artifacts
            .remove(&job.id, &job.filename, &job.output_files);
        self.logs.remove(&job.id).await;

        info!("Job {} deleted", job.id);
        Ok(())
    }

    /// Re-queues jobs left `queued` by a previous run and reports jobs that
    /// were interrupted while running. Call once, right after startup.
    pub fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for job in self.store.list_by_status(JobStatus::Queued)? {
            if !report.deferred.is_empty() {
                report.deferred.push(job.id);
                continue;
            }
            match self.scheduler.enqueue(&job.id) {
                Ok(()) => report.requeued.push(job.id),
                Err(QueueError::Full { .. }) => report.deferred.push(job.id),
                Err(e) => return Err(e.into()),
            }
        }
        for job in self.store.list_by_status(JobStatus::Running)? {
            warn!(
                "Job {} was interrupted while running; it stays running until deleted",
                job.id
            );
            report.interrupted.push(job.id);
        }

        if !report.requeued.is_empty() {
            info!("Re-queued {} job(s) from a previous run", report.requeued.len());
        }
        if !report.deferred.is_empty() {
            warn!(
                "{} queued job(s) did not fit in the queue; they are picked up at next start",
                report.deferred.len()
            );
        }
        Ok(report)
    }

    /// Jobs waiting in the queue.
    pub fn pending(&self) -> usize {
        self.scheduler.pending()
    }

    /// Stops accepting jobs. The running job finishes; queued ones stay
    /// `queued` in the store for [`JobController::recover`].
    pub fn stop(&self) {
        self.scheduler.stop();
    }

    /// [`JobController::stop`], then waits for the running job to finish.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
