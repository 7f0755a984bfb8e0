use std::collections::HashMap;
use std::sync::RwLock;

use super::{check_update, JobStore, StoreError, UpdateOutcome};
use crate::worker::job::{Job, JobStatus, JobUpdate};

/// In-memory [`JobStore`]. Records are lost when the process exits.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn create(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::LockPoisoned)?;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::DuplicateId(job.id.clone()));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Job, StoreError> {
        let jobs = self.jobs.read().map_err(|_| StoreError::LockPoisoned)?;
        jobs.get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn list(&self) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut list: Vec<Job> = jobs.values().cloned().collect();
        list.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(list)
    }

    fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut list: Vec<Job> = jobs
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        list.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(list)
    }

    fn update_status(&self, id: &str, update: &JobUpdate) -> Result<UpdateOutcome, StoreError> {
        check_update(id, update)?;

        let mut jobs = self.jobs.write().map_err(|_| StoreError::LockPoisoned)?;
        let Some(job) = jobs.get_mut(id) else {
            return Ok(UpdateOutcome::Missing);
        };
        if !job.status.can_transition_to(update.status) {
            return Ok(UpdateOutcome::Rejected {
                current: job.status,
            });
        }
        job.apply(update);
        Ok(UpdateOutcome::Applied)
    }

    fn delete(&self, id: &str) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::LockPoisoned)?;
        jobs.remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}
