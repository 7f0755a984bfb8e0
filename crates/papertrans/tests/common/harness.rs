//! Test harness for isolated job-service instances.
//!
//! The `TestHarness` struct provides:
//! - A temporary data directory (uploads, outputs, logs, database)
//! - A fake engine script invoked through `sh`
//! - Helpers to submit documents and wait for jobs to finish

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tempfile::TempDir;

use papertrans::engine::Credentials;
use papertrans::lifecycle::SubmissionRequest;
use papertrans::{
    EngineConfig, Job, JobController, JobStatus, JobStore, MemoryJobStore, PapertransError,
    ServiceConfig,
};

use super::engines::{self, FakeEngine};

pub const TEST_API_KEY: &str = "sk-test-0123456789";
pub const PDF_BYTES: &[u8] = b"%PDF-1.4\n% fake document\n%%EOF\n";

const WAIT_TIMEOUT: Duration = Duration::from_secs(15);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Isolated environment for driving a [`JobController`] end to end.
pub struct TestHarness {
    /// Temporary directory holding everything the harness creates.
    temp_dir: TempDir,
    /// Service configuration pointing into `temp_dir`.
    pub config: ServiceConfig,
    /// Arguments of the last engine invocation, one per line.
    pub args_file: PathBuf,
    /// `OPENAI_API_KEY` as seen by the last engine invocation.
    pub env_file: PathBuf,
    /// Gated engines wait for this file before running.
    pub gate_file: PathBuf,
    script_path: PathBuf,
}

impl TestHarness {
    /// A harness whose engine translates successfully with a configured API key.
    pub fn new() -> Self {
        Self::with_engine(FakeEngine::Translate)
    }

    pub fn with_engine(engine: FakeEngine) -> Self {
        Self::build(engine, false)
    }

    /// Like [`TestHarness::with_engine`], but the engine blocks until
    /// [`TestHarness::release`] is called.
    pub fn gated(engine: FakeEngine) -> Self {
        Self::build(engine, true)
    }

    fn build(engine: FakeEngine, gated: bool) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let args_file = base.join("engine-args.txt");
        let env_file = base.join("engine-env.txt");
        let gate_file = base.join("gate");
        let script_path = base.join("engine.sh");
        let script = engines::render(
            engine,
            &args_file,
            &env_file,
            gated.then_some(gate_file.as_path()),
        );
        std::fs::write(&script_path, script).expect("Failed to write engine script");

        let mut config = ServiceConfig::with_data_dir(base.join("data"));
        config.engine = EngineConfig {
            program: "sh".to_string(),
            program_args: vec![script_path.to_string_lossy().into_owned()],
            credentials: Credentials {
                api_key: Some(SecretString::from(TEST_API_KEY)),
                ..EngineConfig::default().credentials
            },
            ..EngineConfig::default()
        };

        Self {
            temp_dir,
            config,
            args_file,
            env_file,
            gate_file,
            script_path,
        }
    }

    /// Removes the configured API key.
    pub fn without_api_key(mut self) -> Self {
        self.config.engine.credentials.api_key = None;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Starts a controller backed by SQLite in the data directory.
    pub fn start(&self) -> JobController {
        JobController::open(&self.config).expect("Failed to start controller")
    }

    /// Starts a controller backed by the in-memory store.
    pub fn start_in_memory(&self) -> JobController {
        JobController::start(&self.config, Arc::new(MemoryJobStore::new()))
            .expect("Failed to start controller")
    }

    /// Starts a controller on top of `store`.
    pub fn start_with_store(&self, store: Arc<dyn JobStore>) -> JobController {
        JobController::start(&self.config, store).expect("Failed to start controller")
    }

    /// Lets a gated engine continue.
    pub fn release(&self) {
        std::fs::write(&self.gate_file, b"go").expect("Failed to open gate");
    }

    pub async fn submit(
        &self,
        controller: &JobController,
        request: SubmissionRequest,
    ) -> Result<Job, PapertransError> {
        controller.submit(request, PDF_BYTES).await
    }

    /// Submits `filename` with default languages and no parameters.
    pub async fn submit_pdf(&self, controller: &JobController, filename: &str) -> Job {
        self.submit(controller, SubmissionRequest::new(filename))
            .await
            .expect("Submission should be accepted")
    }

    /// Polls until the job reaches a terminal state.
    pub async fn wait_for_terminal(&self, controller: &JobController, id: &str) -> Job {
        self.wait_for(controller, id, |job| job.status.is_terminal())
            .await
    }

    pub async fn wait_for_status(
        &self,
        controller: &JobController,
        id: &str,
        status: JobStatus,
    ) -> Job {
        self.wait_for(controller, id, |job| job.status == status)
            .await
    }

    async fn wait_for<F>(&self, controller: &JobController, id: &str, done: F) -> Job
    where
        F: Fn(&Job) -> bool,
    {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        loop {
            let job = controller.get(id).expect("Job should exist");
            if done(&job) {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "Timed out waiting for job {} (status {})",
                id,
                job.status
            );
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Arguments of the last engine invocation.
    pub fn engine_args(&self) -> Vec<String> {
        std::fs::read_to_string(&self.args_file)
            .expect("Engine did not record its arguments")
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// `OPENAI_API_KEY` seen by the last engine invocation.
    pub fn engine_env_key(&self) -> String {
        std::fs::read_to_string(&self.env_file).expect("Engine did not record its environment")
    }

    pub fn uploads(&self) -> Vec<String> {
        list_files(&self.config.uploads_dir())
    }

    pub fn outputs(&self) -> Vec<String> {
        list_files(&self.config.outputs_dir())
    }

    pub fn log_path(&self, id: &str) -> PathBuf {
        self.config.logs_dir().join(format!("{}.log", id))
    }

    pub fn workspace_path(&self, id: &str) -> PathBuf {
        self.config.outputs_dir().join(id)
    }
}

/// Names of the regular files directly inside `dir`, sorted.
fn list_files(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
