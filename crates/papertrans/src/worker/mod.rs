pub mod job;
pub mod scheduler;

pub use job::{new_job_id, EngineParams, Job, JobStatus, JobUpdate};
pub use scheduler::{QueueError, Scheduler};
