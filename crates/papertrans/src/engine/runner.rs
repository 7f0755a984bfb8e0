use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

use super::command::EngineCommand;
use super::ExecutionError;
use crate::config::EngineConfig;
use crate::error::StorageError;
use crate::joblog::JobLogWriter;
use crate::storage::ArtifactManager;
use crate::worker::job::Job;

/// Raw engine outputs found in the workspace, or why the run failed.
pub type ExecutionResult = Result<Vec<PathBuf>, ExecutionError>;

const STDERR_PREFIX: &str = "[STDERR] ";
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Stdout,
    Stderr,
}

struct OutputLine {
    source: Source,
    text: String,
}

/// Runs the translation engine for one job at a time.
#[derive(Clone)]
pub struct Engine {
    config: EngineConfig,
    artifacts: ArtifactManager,
}

impl Engine {
    pub fn new(config: EngineConfig, artifacts: ArtifactManager) -> Self {
        Self { config, artifacts }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs the engine for `job` and returns the outputs it left in `workspace`.
    ///
    /// Output of the child is appended to `log` line by line while it runs.
    /// There is no timeout: the call returns when the child exits.
    pub async fn run(
        &self,
        job: &Job,
        input: &Path,
        workspace: &Path,
        log: &mut JobLogWriter,
    ) -> ExecutionResult {
        let command = EngineCommand::build(&self.config, job, input, workspace)?;
        log.append(&format!("Running: {}", command.invocation_line()))
            .await?;

        let mut child = command
            .to_command()
            .spawn()
            .map_err(|e| ExecutionError::Spawn {
                program: command.program().to_string(),
                source: e,
            })?;
        log::debug!(
            "Engine started for job {} (pid {:?})",
            job.id,
            child.id()
        );

        let (tx, mut rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(stdout, Source::Stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(stderr, Source::Stderr, tx.clone())));
        }
        drop(tx);

        // Keep draining after a write failure so the child never blocks on a full pipe.
        let mut write_error: Option<StorageError> = None;
        while let Some(line) = rx.recv().await {
            if write_error.is_some() {
                continue;
            }
            let text = match line.source {
                Source::Stdout => line.text,
                Source::Stderr => format!("{}{}", STDERR_PREFIX, line.text),
            };
            if let Err(e) = log.append(&text).await {
                log::warn!("Log write failed for job {}: {}", job.id, e);
                write_error = Some(e);
            }
        }
        for reader in readers {
            if let Err(e) = reader.await {
                log::warn!("Output reader for job {} panicked: {}", job.id, e);
            }
        }

        let status = child.wait().await.map_err(ExecutionError::Wait)?;
        if let Some(e) = write_error {
            return Err(ExecutionError::Io(e));
        }
        if !status.success() {
            return Err(ExecutionError::ExitStatus {
                status: status.to_string(),
            });
        }
        log.append("Engine exited successfully").await?;

        let extension = &self.config.output_extension;
        self.artifacts
            .collect_outputs(workspace, extension)
            .map_err(|e| match e {
                StorageError::NoOutputProduced { .. } => ExecutionError::NoOutputProduced {
                    extension: extension.clone(),
                },
                other => ExecutionError::Io(other),
            })
    }
}

/// Reads `reader` line by line into `tx` until EOF.
///
/// Bytes that are not valid UTF-8 are replaced rather than ending the stream.
async fn forward_lines<R>(reader: R, source: Source, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                if tx.send(OutputLine { source, text }).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                log::warn!("Reading engine {:?} failed: {}", source, e);
                break;
            }
        }
    }
}
