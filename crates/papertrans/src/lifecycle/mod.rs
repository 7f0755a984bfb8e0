//! Job lifecycle: submission, execution and everything a caller can ask
//! about a job afterwards.

pub mod controller;
pub mod processor;
pub mod submission;

pub use controller::{Download, JobController, RecoveryReport, LOG_PLACEHOLDER};
pub use processor::JobProcessor;
pub use submission::{normalize_pages, sanitize_filename, SubmissionDefaults, SubmissionRequest};
