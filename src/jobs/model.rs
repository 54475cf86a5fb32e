//! Job Records
//!
//! A job is a deferred continuation of one execution: either an
//! asynchronous continuation created when the engine reaches an async
//! point, or a timer that fires at a due date.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::tree::ExecutionId;

/// Retries a freshly created job starts with.
pub const DEFAULT_RETRIES: u32 = 3;

/// Unique identifier for jobs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Timer,
    AsyncContinuation,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Timer => write!(f, "timer"),
            JobKind::AsyncContinuation => write!(f, "async-continuation"),
        }
    }
}

/// A persisted unit of deferred work.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub process_instance_id: String,
    pub execution_id: ExecutionId,
    /// Activity the job continues at; diagnostics only
    pub activity_id: String,
    /// A job without a due date is malformed and never acquired
    pub due_date: Option<DateTime<Utc>>,
    /// Higher is more urgent
    pub priority: i32,
    pub retries: u32,
    pub lock_owner: Option<String>,
    pub lock_expiration: Option<DateTime<Utc>>,
    pub suspended: bool,
    /// Creation order within the store; assigned on insert
    #[serde(default)]
    pub sequence: u64,
    /// Canonical name of the operation an async continuation resumes with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler_configuration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_message: Option<String>,
}

impl Job {
    fn new(
        kind: JobKind,
        process_instance_id: impl Into<String>,
        execution_id: ExecutionId,
        activity_id: impl Into<String>,
        due_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            kind,
            process_instance_id: process_instance_id.into(),
            execution_id,
            activity_id: activity_id.into(),
            due_date: Some(due_date),
            priority: 0,
            retries: DEFAULT_RETRIES,
            lock_owner: None,
            lock_expiration: None,
            suspended: false,
            sequence: 0,
            handler_configuration: None,
            exception_message: None,
        }
    }

    /// Creates an asynchronous continuation due at `due_date`.
    pub fn async_continuation(
        process_instance_id: impl Into<String>,
        execution_id: ExecutionId,
        activity_id: impl Into<String>,
        due_date: DateTime<Utc>,
    ) -> Self {
        Self::new(
            JobKind::AsyncContinuation,
            process_instance_id,
            execution_id,
            activity_id,
            due_date,
        )
    }

    /// Creates a timer firing at `due_date`.
    pub fn timer(
        process_instance_id: impl Into<String>,
        execution_id: ExecutionId,
        activity_id: impl Into<String>,
        due_date: DateTime<Utc>,
    ) -> Self {
        Self::new(
            JobKind::Timer,
            process_instance_id,
            execution_id,
            activity_id,
            due_date,
        )
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_handler_configuration(mut self, configuration: impl Into<String>) -> Self {
        self.handler_configuration = Some(configuration.into());
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// True while another owner holds an unexpired lock.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        match (&self.lock_owner, self.lock_expiration) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(_), Some(expiration)) => expiration > now,
        }
    }

    /// Due, unlocked, unsuspended and with retries left.
    pub fn is_acquirable(&self, now: DateTime<Utc>) -> bool {
        let due = self.due_date.is_some_and(|due| due <= now);
        due && !self.is_locked(now) && !self.suspended && self.retries > 0
    }

    pub fn is_timer(&self) -> bool {
        self.kind == JobKind::Timer
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} job {} ({} @ {})",
            self.kind, self.id, self.process_instance_id, self.activity_id
        )
    }
}
