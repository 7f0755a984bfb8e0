//! Live fan-out of job log lines.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEvent {
    /// One line appended to a job log.
    Line {
        job_id: String,
        timestamp: DateTime<Utc>,
        message: String,
    },
    /// The job's writer was closed; no more lines follow.
    Closed { job_id: String },
}

impl LogEvent {
    pub fn line(job_id: &str, message: &str) -> Self {
        LogEvent::Line {
            job_id: job_id.to_string(),
            timestamp: Utc::now(),
            message: message.to_string(),
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            LogEvent::Line { job_id, .. } | LogEvent::Closed { job_id } => job_id,
        }
    }
}

/// Publishes log events to any number of live readers.
///
/// Sending never blocks; readers that fall behind lose the oldest events.
#[derive(Clone)]
pub struct LogBroadcaster {
    sender: broadcast::Sender<LogEvent>,
}

impl LogBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn send(&self, event: LogEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.sender.subscribe()
    }
}

impl Default for LogBroadcaster {
    fn default() -> Self {
        Self::new(1000)
    }
}
