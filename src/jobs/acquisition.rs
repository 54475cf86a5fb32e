//! Job Acquisition
//!
//! Selects the next batch of jobs to run from a snapshot of candidates.
//!
//! The ordering is a total order over acquirable jobs:
//!
//! 1. timers first, when `prefer_timer_jobs` is set
//! 2. due date, oldest first
//! 3. priority, highest first, only between jobs due at the same instant and
//!    only when `produce_prioritized_jobs` is set and `prefer_old_jobs` is not
//! 4. creation sequence, then job id
//!
//! Priority never moves a job ahead of one that is due earlier.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::{Job, JobId};
use super::store::JobStore;

/// Longest lock an acquisition may take on a job (one week).
pub const MAX_LOCK_TIME_SECS: i64 = 7 * 24 * 60 * 60;

/// Scheduling preferences, passed explicitly into every acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub prefer_timer_jobs: bool,
    pub prefer_old_jobs: bool,
    pub produce_prioritized_jobs: bool,
    pub max_jobs_per_acquisition: usize,
    /// Owner written into the lock of acquired jobs
    pub lock_owner: String,
    pub lock_time_secs: i64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            prefer_timer_jobs: false,
            prefer_old_jobs: false,
            produce_prioritized_jobs: false,
            max_jobs_per_acquisition: 3,
            lock_owner: "procvm".to_string(),
            lock_time_secs: 300,
        }
    }
}

impl AcquisitionConfig {
    /// Whether priority breaks ties between jobs due at the same instant.
    pub fn orders_by_priority(&self) -> bool {
        self.produce_prioritized_jobs && !self.prefer_old_jobs
    }

    /// `None` when `lock_time_secs` does not fit a duration.
    pub fn lock_time(&self) -> Option<Duration> {
        Duration::try_seconds(self.lock_time_secs)
    }
}

/// A candidate that cannot take part in ordering. Skipped, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquisitionInputError {
    #[error("job {0} has no due date")]
    MissingDueDate(JobId),
    #[error("job without an id")]
    EmptyId,
    #[error("job {0} appears more than once among the candidates")]
    DuplicateId(JobId),
}

fn check_candidate(job: &Job, seen: &mut HashSet<JobId>) -> Result<(), AcquisitionInputError> {
    if job.id.is_nil() {
        return Err(AcquisitionInputError::EmptyId);
    }
    if job.due_date.is_none() {
        return Err(AcquisitionInputError::MissingDueDate(job.id));
    }
    if !seen.insert(job.id) {
        return Err(AcquisitionInputError::DuplicateId(job.id));
    }
    Ok(())
}

/// Compares two valid candidates under `config`.
pub fn compare_jobs(a: &Job, b: &Job, config: &AcquisitionConfig) -> Ordering {
    let timer_rank = |job: &Job| !(config.prefer_timer_jobs && job.is_timer());

    timer_rank(a)
        .cmp(&timer_rank(b))
        .then_with(|| a.due_date.cmp(&b.due_date))
        .then_with(|| {
            if config.orders_by_priority() {
                b.priority.cmp(&a.priority)
            } else {
                Ordering::Equal
            }
        })
        .then_with(|| a.sequence.cmp(&b.sequence))
        .then_with(|| a.id.cmp(&b.id))
}

/// Orders the acquirable candidates and returns at most `max` of them.
///
/// Malformed candidates are logged and skipped; candidates that are not
/// acquirable at `now` are dropped silently.
pub fn acquire_jobs(
    candidates: &[Job],
    max: usize,
    config: &AcquisitionConfig,
    now: DateTime<Utc>,
) -> Vec<Job> {
    let mut seen = HashSet::new();
    let mut eligible: Vec<&Job> = Vec::with_capacity(candidates.len());

    for job in candidates {
        if let Err(err) = check_candidate(job, &mut seen) {
            warn!("Skipping job candidate: {}", err);
            continue;
        }
        if job.is_acquirable(now) {
            eligible.push(job);
        }
    }

    eligible.sort_by(|a, b| compare_jobs(a, b, config));
    eligible.into_iter().take(max).cloned().collect()
}

/// Acquires and locks batches from a [`JobStore`].
#[derive(Debug, Clone, Default)]
pub struct JobAcquisition {
    config: AcquisitionConfig,
}

impl JobAcquisition {
    pub fn new(config: AcquisitionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Orders a snapshot of the store and locks jobs in that order until the
    /// batch is full. A job that can no longer be locked is skipped.
    pub fn acquire<S: JobStore + ?Sized>(&self, store: &mut S, now: DateTime<Utc>) -> Vec<Job> {
        let Some(expiration) = self
            .config
            .lock_time()
            .and_then(|lock_time| now.checked_add_signed(lock_time))
        else {
            error!(
                "Lock time of {}s is out of range, acquiring nothing",
                self.config.lock_time_secs
            );
            return Vec::new();
        };

        let snapshot = store.candidates(now);
        let ordered = acquire_jobs(&snapshot, snapshot.len(), &self.config, now);

        let mut batch = Vec::new();
        for job in ordered {
            if batch.len() >= self.config.max_jobs_per_acquisition {
                break;
            }
            match store.lock(job.id, &self.config.lock_owner, now, expiration) {
                Ok(locked) => batch.push(locked),
                Err(err) => debug!("Skipping job {}: {}", job.id, err),
            }
        }

        if !batch.is_empty() {
            info!(
                "{} acquired {} of {} candidate job(s)",
                self.config.lock_owner,
                batch.len(),
                snapshot.len()
            );
        }
        batch
    }
}
