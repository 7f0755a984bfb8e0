use std::future::Future;
use std::sync::Mutex;

use log::{debug, error, info};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("job queue is full ({capacity} jobs waiting)")]
    Full { capacity: usize },

    #[error("job queue is closed")]
    Closed,
}

/// Bounded FIFO of job ids feeding exactly one worker task.
///
/// Jobs run strictly one at a time in submission order. A full queue rejects
/// new ids instead of blocking the submitter.
pub struct Scheduler {
    sender: Mutex<Option<mpsc::Sender<String>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    stop: watch::Sender<bool>,
    capacity: usize,
}

impl Scheduler {
    /// Starts the worker task. Must be called from within a tokio runtime.
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn start<F, Fut>(capacity: usize, handler: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::start_supervised(capacity, handler, |_job_id: &str, _reason: &str| {})
    }

    /// Like [`Scheduler::start`], and calls `on_panic(job_id, message)` when a
    /// handler panics. The worker carries on with the next job either way.
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn start_supervised<F, Fut, P>(capacity: usize, handler: F, on_panic: P) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        P: Fn(&str, &str) + Send + Sync + 'static,
    {
        assert!(capacity > 0, "queue capacity must be > 0");
        let (sender, receiver) = mpsc::channel::<String>(capacity);
        let (stop, stop_rx) = watch::channel(false);
        let worker = tokio::spawn(run_worker(receiver, stop_rx, handler, on_panic));

        info!("Started job worker (queue capacity {})", capacity);

        Self {
            sender: Mutex::new(Some(sender)),
            worker: tokio::sync::Mutex::new(Some(worker)),
            stop,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends `job_id` to the queue without waiting.
    pub fn enqueue(&self, job_id: &str) -> Result<(), QueueError> {
        let guard = self.sender.lock().map_err(|_| QueueError::Closed)?;
        let sender = guard.as_ref().ok_or(QueueError::Closed)?;

        sender.try_send(job_id.to_string()).map_err(|e| match e {
            TrySendError::Full(_) => QueueError::Full {
                capacity: self.capacity,
            },
            TrySendError::Closed(_) => QueueError::Closed,
        })?;
        debug!("Enqueued job {}", job_id);
        Ok(())
    }

    /// Number of ids waiting in the queue (the running job excluded).
    pub fn pending(&self) -> usize {
        match self.sender.lock() {
            Ok(guard) => guard
                .as_ref()
                .map(|s| self.capacity - s.capacity())
                .unwrap_or(0),
            Err(_) => 0,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().map(|g| g.is_none()).unwrap_or(true)
    }

    /// Stops accepting new ids. Ids already queued are still processed.
    pub fn close(&self) {
        if let Ok(mut guard) = self.sender.lock() {
            if guard.take().is_some() {
                info!("Job queue closed");
            }
        }
    }

    /// Stops accepting new ids and tells the worker to exit after the job it
    /// is running. Ids still queued are dropped.
    pub fn stop(&self) {
        self.close();
        self.stop.send_replace(true);
    }

    /// Waits for the worker to exit. Call [`Scheduler::close`] or
    /// [`Scheduler::stop`] first.
    pub async fn join(&self) {
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Job worker panicked: {}", e);
            }
        }
        info!("Job worker stopped");
    }

    /// Stops the worker and waits for the running job to finish.
    pub async fn shutdown(&self) {
        self.stop();
        self.join().await;
    }
}

async fn run_worker<F, Fut, P>(
    mut receiver: mpsc::Receiver<String>,
    mut stop: watch::Receiver<bool>,
    handler: F,
    on_panic: P,
) where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
    P: Fn(&str, &str) + Send + Sync + 'static,
{
    debug!("Job worker started");

    loop {
        let job_id = tokio::select! {
            biased;
            _ = stop.wait_for(|stopped| *stopped) => {
                debug!("Job worker stopping");
                break;
            }
            next = receiver.recv() => match next {
                Some(job_id) => job_id,
                None => break,
            },
        };
        debug!("Worker picked up job {}", job_id);
        // A panicking job must not take the worker down with it.
        if let Err(e) = tokio::spawn(handler(job_id.clone())).await {
            let message = panic_message(e);
            error!("Processing job {} panicked: {}", job_id, message);
            on_panic(&job_id, &message);
        }
    }

    debug!("Job worker exited");
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
