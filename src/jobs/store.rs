//! Job Store
//!
//! The persistence seam for jobs. Acquisition and execution only talk to
//! the [`JobStore`] trait; [`InMemoryJobStore`] backs the CLI and tests.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::debug;
use thiserror::Error;

use super::model::{Job, JobId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {0} already exists")]
    Duplicate(JobId),
    #[error("job {job} is locked by {owner}")]
    Locked { job: JobId, owner: String },
    #[error("job {0} is not acquirable")]
    NotAcquirable(JobId),
}

/// Storage of job records, including lock and retry bookkeeping.
pub trait JobStore {
    /// Stores a new job and returns its id.
    fn insert(&mut self, job: Job) -> Result<JobId, StoreError>;

    /// Snapshot of every job not locked at `now`, in creation order.
    fn candidates(&self, now: DateTime<Utc>) -> Vec<Job>;

    fn get(&self, id: JobId) -> Option<Job>;

    /// Locks a job for `owner` until `expiration`. Fails if the job is no
    /// longer acquirable at `now`.
    fn lock(
        &mut self,
        id: JobId,
        owner: &str,
        now: DateTime<Utc>,
        expiration: DateTime<Utc>,
    ) -> Result<Job, StoreError>;

    fn unlock(&mut self, id: JobId) -> Result<(), StoreError>;

    /// Records a failure and returns the retries left.
    fn decrement_retries(&mut self, id: JobId, message: &str) -> Result<u32, StoreError>;

    fn delete(&mut self, id: JobId) -> Result<Job, StoreError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local job store.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: HashMap<JobId, Job>,
    next_sequence: u64,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All jobs in creation order.
    pub fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.sequence);
        jobs
    }

    pub fn jobs_for_instance(&self, process_instance_id: &str) -> Vec<Job> {
        self.jobs()
            .into_iter()
            .filter(|j| j.process_instance_id == process_instance_id)
            .collect()
    }

    fn job_mut(&mut self, id: JobId) -> Result<&mut Job, StoreError> {
        self.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))
    }
}

impl JobStore for InMemoryJobStore {
    fn insert(&mut self, mut job: Job) -> Result<JobId, StoreError> {
        if self.jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        job.sequence = self.next_sequence;
        self.next_sequence += 1;

        let id = job.id;
        debug!("Stored {}", job);
        self.jobs.insert(id, job);
        Ok(id)
    }

    fn candidates(&self, now: DateTime<Utc>) -> Vec<Job> {
        self.jobs()
            .into_iter()
            .filter(|j| !j.is_locked(now))
            .collect()
    }

    fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.get(&id).cloned()
    }

    fn lock(
        &mut self,
        id: JobId,
        owner: &str,
        now: DateTime<Utc>,
        expiration: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        let job = self.job_mut(id)?;
        if job.is_locked(now) {
            return Err(StoreError::Locked {
                job: id,
                owner: job.lock_owner.clone().unwrap_or_default(),
            });
        }
        if !job.is_acquirable(now) {
            return Err(StoreError::NotAcquirable(id));
        }

        job.lock_owner = Some(owner.to_string());
        job.lock_expiration = Some(expiration);
        Ok(job.clone())
    }

    fn unlock(&mut self, id: JobId) -> Result<(), StoreError> {
        let job = self.job_mut(id)?;
        job.lock_owner = None;
        job.lock_expiration = None;
        Ok(())
    }

    fn decrement_retries(&mut self, id: JobId, message: &str) -> Result<u32, StoreError> {
        let job = self.job_mut(id)?;
        job.retries = job.retries.saturating_sub(1);
        job.exception_message = Some(message.to_string());
        Ok(job.retries)
    }

    fn delete(&mut self, id: JobId) -> Result<Job, StoreError> {
        self.jobs.remove(&id).ok_or(StoreError::NotFound(id))
    }

    fn len(&self) -> usize {
        self.jobs.len()
    }
}
