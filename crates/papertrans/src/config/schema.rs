use std::path::{Path, PathBuf};

use crate::db::DATABASE_FILE;
use crate::engine::command::DEFAULT_MODEL;
use crate::engine::Credentials;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_MAX_UPLOAD_MB: u64 = 100;
pub const DEFAULT_ENGINE: &str = "babeldoc";
pub const DEFAULT_OUTPUT_EXTENSION: &str = "pdf";
pub const DEFAULT_BACKEND_FLAG: &str = "--openai";
pub const DEFAULT_LANG_IN: &str = "en";
pub const DEFAULT_LANG_OUT: &str = "zh";

/// Service-wide settings.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Bind address of the HTTP server.
    pub host: String,
    pub port: u16,
    /// Root of the database, uploads, outputs and logs.
    pub data_dir: PathBuf,
    /// Maximum number of jobs waiting in the queue.
    pub queue_capacity: usize,
    pub max_upload_bytes: u64,
    pub default_lang_in: String,
    pub default_lang_out: String,
    pub engine: EngineConfig,
}

impl ServiceConfig {
    /// Defaults rooted at `data_dir`, without consulting the environment.
    pub fn with_data_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            data_dir: data_dir.as_ref().to_path_buf(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_MB * 1024 * 1024,
            default_lang_in: DEFAULT_LANG_IN.to_string(),
            default_lang_out: DEFAULT_LANG_OUT.to_string(),
            engine: EngineConfig::default(),
        }
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.data_dir.join("outputs")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

/// How the translation engine is invoked.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub program: String,
    /// Arguments placed before the generated ones (e.g. `run babeldoc` for `uv`).
    pub program_args: Vec<String>,
    /// Extension of the files collected from the workspace.
    pub output_extension: String,
    /// Appended last to select the backend; `None` appends nothing.
    pub backend_flag: Option<String>,
    /// Used for whatever a job does not supply itself.
    pub credentials: Credentials,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_ENGINE.to_string(),
            program_args: Vec::new(),
            output_extension: DEFAULT_OUTPUT_EXTENSION.to_string(),
            backend_flag: Some(DEFAULT_BACKEND_FLAG.to_string()),
            credentials: Credentials {
                api_key: None,
                model: Some(DEFAULT_MODEL.to_string()),
                base_url: None,
            },
        }
    }
}
