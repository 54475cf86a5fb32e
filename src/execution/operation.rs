//! Atomic Operations
//!
//! Each operation is one indivisible step applied to one execution. The
//! operations themselves are stateless descriptors; the engine owns the
//! code that performs them and the queue they are scheduled on.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::tree::{Execution, ExecutionId};
use crate::process::ProcessDefinition;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AtomicOperation {
    /// Place the root on the initial activity.
    ProcessStart,
    /// Move an execution along its current transition to the target activity.
    TransitionNotifyListenerTake,
    /// Open a scope execution if the reached activity is a scope.
    TransitionCreateScope,
    /// Run the activity behavior.
    ActivityExecute,
    /// Close the current scope and fan out over the transitions to take.
    TransitionDestroyScope,
    /// End an execution and prune the tree above it.
    ActivityEnd,
}

impl AtomicOperation {
    pub const ALL: [AtomicOperation; 6] = [
        AtomicOperation::ProcessStart,
        AtomicOperation::TransitionNotifyListenerTake,
        AtomicOperation::TransitionCreateScope,
        AtomicOperation::ActivityExecute,
        AtomicOperation::TransitionDestroyScope,
        AtomicOperation::ActivityEnd,
    ];

    /// Name used in logs, timelines and job handler configuration.
    pub fn canonical_name(&self) -> &'static str {
        match self {
            AtomicOperation::ProcessStart => "process-start",
            AtomicOperation::TransitionNotifyListenerTake => "transition-notify-listener-take",
            AtomicOperation::TransitionCreateScope => "transition-create-scope",
            AtomicOperation::ActivityExecute => "activity-execute",
            AtomicOperation::TransitionDestroyScope => "transition-destroy-scope",
            AtomicOperation::ActivityEnd => "activity-end",
        }
    }

    pub fn from_canonical_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.canonical_name() == name)
    }

    /// Whether the step may be deferred to a job instead of running inline.
    ///
    /// Only entering an `async_before` activity is an asynchronous point.
    pub fn is_async(&self, execution: &Execution, definition: &ProcessDefinition) -> bool {
        match self {
            AtomicOperation::TransitionCreateScope => execution
                .activity
                .as_deref()
                .and_then(|id| definition.get_activity(id))
                .is_some_and(|activity| activity.async_before),
            _ => false,
        }
    }
}

impl fmt::Display for AtomicOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// An operation waiting on the trampoline queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub operation: AtomicOperation,
    pub execution: ExecutionId,
    /// Set when the operation continues from a job; skips the async check
    #[serde(default)]
    pub resumed: bool,
}

impl PendingOperation {
    pub fn new(operation: AtomicOperation, execution: ExecutionId) -> Self {
        Self {
            operation,
            execution,
            resumed: false,
        }
    }

    pub fn resumed(operation: AtomicOperation, execution: ExecutionId) -> Self {
        Self {
            operation,
            execution,
            resumed: true,
        }
    }
}
