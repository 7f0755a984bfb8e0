use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use tracing::Instrument;

use crate::engine::{Engine, ExecutionError};
use crate::error::StorageError;
use crate::joblog::{JobLogWriter, LogSink};
use crate::sanitize::redact_path;
use crate::storage::ArtifactManager;
use crate::store::{JobStore, StoreError, UpdateOutcome};
use crate::worker::job::{Job, JobStatus, JobUpdate};

/// Drives one dequeued job through `running` to a terminal state.
#[derive(Clone)]
pub struct JobProcessor {
    store: Arc<dyn JobStore>,
    artifacts: ArtifactManager,
    logs: LogSink,
    engine: Engine,
}

impl JobProcessor {
    pub fn new(
        store: Arc<dyn JobStore>,
        artifacts: ArtifactManager,
        logs: LogSink,
        engine: Engine,
    ) -> Self {
        Self {
            store,
            artifacts,
            logs,
            engine,
        }
    }

    /// Processes `job_id` to completion. Never fails: every problem ends up in
    /// the job record and its log.
    pub async fn process(&self, job_id: &str) {
        let span = tracing::info_span!("job.execute", job_id = %job_id);
        self.process_inner(job_id).instrument(span).await
    }

    async fn process_inner(&self, job_id: &str) {
        let job = match self.store.get(job_id) {
            Ok(job) => job,
            Err(StoreError::NotFound(_)) => {
                debug!("Job {} was deleted before it started", job_id);
                return;
            }
            Err(e) => {
                error!("Cannot load job {}: {}", job_id, e);
                return;
            }
        };
        if job.status != JobStatus::Queued {
            warn!("Skipping job {}: already {}", job_id, job.status);
            return;
        }

        match self.store.update_status(job_id, &JobUpdate::running(Utc::now())) {
            Ok(UpdateOutcome::Applied) => {}
            Ok(UpdateOutcome::Missing) => {
                debug!("Job {} was deleted before it started", job_id);
                return;
            }
            Ok(UpdateOutcome::Rejected { current }) => {
                warn!("Skipping job {}: already {}", job_id, current);
                return;
            }
            Err(e) => {
                error!("Cannot mark job {} as running: {}", job_id, e);
                return;
            }
        }
        info!("Job {} started ({})", job_id, job.filename);

        let mut log = match self.logs.open(job_id).await {
            Ok(log) => log,
            Err(e) => {
                self.fail(&job, None, ExecutionError::Io(e)).await;
                return;
            }
        };

        match self.execute(&job, &mut log).await {
            Ok(outputs) => self.succeed(&job, &mut log, outputs).await,
            Err(e) => self.fail(&job, Some(&mut log), e).await,
        }
    }

    /// Prepares the workspace, runs the engine and finalizes its outputs.
    async fn execute(
        &self,
        job: &Job,
        log: &mut JobLogWriter,
    ) -> Result<Vec<String>, ExecutionError> {
        log.append(&format!(
            "Job {} started: {} ({} -> {})",
            job.id, job.filename, job.lang_in, job.lang_out
        ))
        .await?;

        let input = self.artifacts.input_path(&job.id, &job.filename);
        if !input.is_file() {
            return Err(ExecutionError::Io(StorageError::ReadFile {
                path: input,
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }));
        }
        let workspace = self.artifacts.prepare_workspace(&job.id)?;

        let files = self.engine.run(job, &input, &workspace, log).await?;

        // Outputs are in the output area from here on; log failures must not
        // abort the run.
        let report = self.artifacts.finalize(&job.id, &files);
        for (file, reason) in &report.failed {
            let line = format!("WARNING: could not finalize {}: {}", redact_path(file), reason);
            if let Err(e) = log.append(&line).await {
                warn!("Cannot write finalize warning for job {}: {}", job.id, e);
            }
        }
        self.artifacts.cleanup_workspace(&job.id);

        if report.finalized.is_empty() {
            return Err(ExecutionError::Finalize {
                failed: report.failed.len(),
            });
        }
        Ok(report.finalized)
    }

    async fn succeed(&self, job: &Job, log: &mut JobLogWriter, outputs: Vec<String>) {
        let summary = format!(
            "Job completed: {} output file(s): {}",
            outputs.len(),
            outputs.join(", ")
        );
        if let Err(e) = log.append(&summary).await {
            warn!("Cannot write completion line for job {}: {}", job.id, e);
        }

        let update = JobUpdate::succeeded(Utc::now(), outputs.clone());
        match self.store.update_status(&job.id, &update) {
            Ok(UpdateOutcome::Applied) => {
                info!("Job {} succeeded with {} output(s)", job.id, outputs.len());
            }
            Ok(UpdateOutcome::Missing) => {
                info!("Job {} was deleted while running; discarding its outputs", job.id);
                self.discard(job, &outputs).await;
            }
            Ok(UpdateOutcome::Rejected { current }) => {
                warn!("Job {} finished but is already {}", job.id, current);
            }
            Err(e) => error!("Cannot record success of job {}: {}", job.id, e),
        }
    }

    async fn fail(&self, job: &Job, log: Option<&mut JobLogWriter>, err: ExecutionError) {
        let message = err.job_error();
        warn!("Job {} failed: {}", job.id, message);

        if let Some(log) = log {
            if let Err(e) = log.append(&format!("ERROR: {}", message)).await {
                warn!("Cannot write error line for job {}: {}", job.id, e);
            }
        }
        self.artifacts.cleanup_workspace(&job.id);

        match self
            .store
            .update_status(&job.id, &JobUpdate::failed(Utc::now(), message))
        {
            Ok(UpdateOutcome::Applied) => {}
            Ok(UpdateOutcome::Missing) => {
                debug!("Job {} was deleted while running", job.id);
                self.discard(job, &[]).await;
            }
            Ok(UpdateOutcome::Rejected { current }) => {
                warn!("Job {} failed but is already {}", job.id, current);
            }
            Err(e) => error!("Cannot record failure of job {}: {}", job.id, e),
        }
    }

    /// Records a run that died without reaching [`JobProcessor::process`]'s
    /// own failure handling (a panic). The job's log writer is gone by now, so
    /// only the record and the workspace are touched.
    pub fn abandon(&self, job_id: &str, reason: &str) {
        let message = ExecutionError::Panicked(reason.to_string()).job_error();
        error!("Job {} aborted: {}", job_id, message);
        self.artifacts.cleanup_workspace(job_id);

        match self
            .store
            .update_status(job_id, &JobUpdate::failed(Utc::now(), message))
        {
            Ok(UpdateOutcome::Applied) | Ok(UpdateOutcome::Missing) => {}
            Ok(UpdateOutcome::Rejected { current }) => {
                warn!("Aborted job {} left as {}", job_id, current);
            }
            Err(e) => error!("Cannot record failure of job {}: {}", job_id, e),
        }
    }

    /// Removes what a run recreated after its job was deleted.
    async fn discard(&self, job: &Job, outputs: &[String]) {
        self.artifacts.remove(&job.id, &job.filename, outputs);
        self.logs.remove(&job.id).await;
    }
}
