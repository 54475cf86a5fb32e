//! Engine error taxonomy.
//!
//! Nothing here is retried by the engine itself: every error aborts the
//! current trampoline run and surfaces to the instance-level caller.

use thiserror::Error;

use super::tree::ExecutionId;
use crate::jobs::model::JobId;

/// The process graph or the execution tree is in a state no well-formed
/// graph can produce.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphIntegrityError {
    #[error("{execution}: No outgoing transitions from activity {activity}")]
    NoOutgoingTransitions {
        execution: ExecutionId,
        activity: String,
    },
    #[error("{execution}: no concurrent execution replaced it under scope {scope}")]
    MissingReplacingExecution {
        scope: ExecutionId,
        execution: ExecutionId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    GraphIntegrity(#[from] GraphIntegrityError),

    #[error("{execution}: transitions to take were already consumed")]
    IllegalReentry { execution: ExecutionId },

    #[error("unknown execution {0}")]
    UnknownExecution(ExecutionId),

    #[error("unknown activity '{0}'")]
    UnknownActivity(String),

    #[error("unknown transition '{0}'")]
    UnknownTransition(String),

    #[error("{execution}: {reason}")]
    InvalidTreeMutation {
        execution: ExecutionId,
        reason: String,
    },

    #[error("unknown atomic operation '{0}'")]
    UnknownOperation(String),

    #[error("timer at '{activity}' due in {secs}s is outside the representable time range")]
    DueDateOutOfRange { activity: String, secs: i64 },

    #[error("{0} has no current activity")]
    NoActivity(ExecutionId),

    #[error("{execution} is not suspended on job {job}")]
    ConcurrentResume { execution: ExecutionId, job: JobId },

    #[error("{0} is suspended on a job and cannot be driven directly")]
    Suspended(ExecutionId),

    #[error("process instance has already ended")]
    InstanceEnded,

    #[error("interrupted with {pending} operation(s) pending")]
    Interrupted { pending: usize },
}

impl EngineError {
    pub(crate) fn mutation(execution: ExecutionId, reason: impl Into<String>) -> Self {
        Self::InvalidTreeMutation {
            execution,
            reason: reason.into(),
        }
    }

    /// Errors a retry cannot fix: the graph, the tree or the timer
    /// definition is broken. The job executor does not retry these.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::GraphIntegrity(_)
                | Self::IllegalReentry { .. }
                | Self::InvalidTreeMutation { .. }
                | Self::DueDateOutOfRange { .. }
        )
    }
}
