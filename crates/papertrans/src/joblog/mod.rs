//! Per-job log files with live tailing.
//!
//! Each job has one append-only file `<logs>/<job_id>.log` written by exactly
//! one [`JobLogWriter`]. Every appended line is synced to disk before it is
//! published on the [`LogBroadcaster`], so a reader that snapshots the file
//! never sees less than what live subscribers have already received.

use std::path::{Path, PathBuf};

use futures_util::stream::{self, Stream};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::error::RecvError;

use crate::error::StorageError;

pub mod broadcaster;

pub use broadcaster::{LogBroadcaster, LogEvent};

#[derive(Clone)]
pub struct LogSink {
    logs_dir: PathBuf,
    broadcaster: LogBroadcaster,
}

impl LogSink {
    pub fn new<P: AsRef<Path>>(logs_dir: P) -> Self {
        Self::with_broadcaster(logs_dir, LogBroadcaster::default())
    }

    pub fn with_broadcaster<P: AsRef<Path>>(logs_dir: P, broadcaster: LogBroadcaster) -> Self {
        Self {
            logs_dir: logs_dir.as_ref().to_path_buf(),
            broadcaster,
        }
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn log_path(&self, job_id: &str) -> PathBuf {
        self.logs_dir.join(format!("{}.log", job_id))
    }

    /// Creates (or truncates) the log of `job_id` and returns its writer.
    pub async fn open(&self, job_id: &str) -> Result<JobLogWriter, StorageError> {
        tokio::fs::create_dir_all(&self.logs_dir)
            .await
            .map_err(|e| StorageError::CreateDirectory {
                path: self.logs_dir.clone(),
                source: e,
            })?;

        let path = self.log_path(job_id);
        let file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;

        Ok(JobLogWriter {
            job_id: job_id.to_string(),
            path,
            file,
            broadcaster: self.broadcaster.clone(),
        })
    }

    /// Current content of the log, or `None` if it does not exist yet.
    pub async fn read(&self, job_id: &str) -> Result<Option<String>, StorageError> {
        let path = self.log_path(job_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::ReadFile { path, source: e }),
        }
    }

    /// Raw feed of every job's log events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<LogEvent> {
        self.broadcaster.subscribe()
    }

    /// Live lines of one job. Ends when its writer closes.
    ///
    /// Lines published while the subscriber lags behind are skipped.
    pub fn follow(&self, job_id: &str) -> impl Stream<Item = String> + Send + 'static {
        let receiver = self.broadcaster.subscribe();
        let job_id = job_id.to_string();

        stream::unfold((receiver, job_id), |(mut receiver, job_id)| async move {
            loop {
                match receiver.recv().await {
                    Ok(LogEvent::Line {
                        job_id: id, message, ..
                    }) if id == job_id => return Some((message, (receiver, job_id))),
                    Ok(LogEvent::Closed { job_id: id }) if id == job_id => return None,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        log::debug!("Log follower for {} skipped {} lines", job_id, skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
    }

    /// Deletes the log of `job_id` and ends its followers. Best-effort.
    pub async fn remove(&self, job_id: &str) {
        let path = self.log_path(job_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => log::debug!("Removed log {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove log {}: {}", path.display(), e),
        }
        self.broadcaster.send(LogEvent::Closed {
            job_id: job_id.to_string(),
        });
    }
}

/// The single writer of one job log.
///
/// Dropping the writer announces [`LogEvent::Closed`] to followers.
pub struct JobLogWriter {
    job_id: String,
    path: PathBuf,
    file: tokio::fs::File,
    broadcaster: LogBroadcaster,
}

impl JobLogWriter {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one line and makes it durable before publishing it.
    pub async fn append(&mut self, line: &str) -> Result<(), StorageError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let result = async {
            self.file.write_all(line.as_bytes()).await?;
            self.file.write_all(b"\n").await?;
            self.file.flush().await?;
            self.file.sync_data().await
        }
        .await;

        result.map_err(|e| StorageError::WriteFile {
            path: self.path.clone(),
            source: e,
        })?;
        self.broadcaster.send(LogEvent::line(&self.job_id, line));
        Ok(())
    }
}

impl Drop for JobLogWriter {
    fn drop(&mut self) {
        self.broadcaster.send(LogEvent::Closed {
            job_id: self.job_id.clone(),
        });
    }
}
