//! Transition-Destroy-Scope
//!
//! Leaving an activity over one or more transitions. The step first closes
//! the scope the activity opened (handing control back to the parent
//! execution), then either moves a single execution along one transition or
//! splits it into concurrent executions, one per transition.
//!
//! The result is a list of [`OutgoingExecution`]s. Nothing moves until the
//! whole list is computed, so every branch of a fork sees the same tree.

use log::debug;

use super::error::{EngineError, GraphIntegrityError};
use super::tree::{ExecutionId, ExecutionTree};
use crate::process::ProcessDefinition;

/// An execution paired with the transition it is about to take.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingExecution {
    pub execution: ExecutionId,
    pub transition: String,
}

impl OutgoingExecution {
    pub fn new(execution: ExecutionId, transition: impl Into<String>) -> Self {
        Self {
            execution,
            transition: transition.into(),
        }
    }

    /// Binds the transition to the execution. The caller schedules the
    /// actual take.
    pub fn take(&self, tree: &mut ExecutionTree) -> Result<(), EngineError> {
        tree.execution_mut(self.execution)?.transition = Some(self.transition.clone());
        Ok(())
    }
}

/// Consumes the execution's transitions-to-take and computes who carries
/// each of them.
///
/// Fails with `IllegalReentry` if the list was already consumed and with
/// `NoOutgoingTransitions` if it is empty.
pub fn destroy_scope_and_fan_out(
    tree: &mut ExecutionTree,
    definition: &ProcessDefinition,
    execution: ExecutionId,
) -> Result<Vec<OutgoingExecution>, EngineError> {
    let current = tree.execution_mut(execution)?;
    let transitions_to_take = current
        .transitions_to_take
        .take()
        .ok_or(EngineError::IllegalReentry { execution })?;
    let activity_id = current
        .activity
        .clone()
        .ok_or(EngineError::NoActivity(execution))?;

    if transitions_to_take.is_empty() {
        return Err(GraphIntegrityError::NoOutgoingTransitions {
            execution,
            activity: activity_id,
        }
        .into());
    }

    let activity = definition
        .get_activity(&activity_id)
        .ok_or_else(|| EngineError::UnknownActivity(activity_id.clone()))?;

    let propagating = if activity.scope {
        if tree.execution(execution)?.is_concurrent {
            destroy_concurrent_scope(tree, execution)?;
            execution
        } else {
            continue_as_parent_scope(tree, execution)?
        }
    } else {
        execution
    };

    if transitions_to_take.len() == 1 {
        return Ok(vec![OutgoingExecution::new(
            propagating,
            transitions_to_take[0].clone(),
        )]);
    }

    fan_out(tree, propagating, &transitions_to_take)
}

/// Hands control from a scope execution to its parent and discards it.
fn continue_as_parent_scope(
    tree: &mut ExecutionTree,
    execution: ExecutionId,
) -> Result<ExecutionId, EngineError> {
    let scoped = tree.execution(execution)?;
    let parent = scoped
        .parent()
        .ok_or_else(|| EngineError::mutation(execution, "scope execution has no parent to continue in"))?;
    let activity = scoped.activity.clone();
    let transition = scoped.transition.clone();

    let parent_execution = tree.execution_mut(parent)?;
    parent_execution.activity = activity;
    parent_execution.transition = transition;
    parent_execution.is_active = true;
    debug!(
        "destroy scope: scoped {} continues as parent scope {}",
        execution, parent
    );

    tree.destroy(execution)?;
    tree.remove(execution)?;
    Ok(parent)
}

/// Dissolves the scope of an execution that is both concurrent and a scope.
///
/// Trees written before scope executions were nested under concurrent ones
/// used a single execution for both roles; such an execution keeps
/// propagating itself.
pub fn destroy_concurrent_scope(
    tree: &mut ExecutionTree,
    execution: ExecutionId,
) -> Result<(), EngineError> {
    let concurrent_scope = tree.execution_mut(execution)?;
    if !(concurrent_scope.is_concurrent && concurrent_scope.is_scope) {
        return Err(EngineError::mutation(
            execution,
            "legacy scope destruction requires a concurrent scope execution",
        ));
    }
    concurrent_scope.is_scope = false;
    debug!("destroy concurrent scope execution {}", execution);
    Ok(())
}

/// Splits the propagating execution into one execution per transition.
///
/// The propagating execution carries the first transition. If it was not
/// concurrent, creating the first sibling replaces it with a concurrent
/// execution in the scope, and that replacement carries the first
/// transition instead.
fn fan_out(
    tree: &mut ExecutionTree,
    propagating: ExecutionId,
    transitions: &[String],
) -> Result<Vec<OutgoingExecution>, EngineError> {
    tree.execution_mut(propagating)?.inactivate();
    let propagating_is_concurrent = tree.execution(propagating)?.is_concurrent;

    let mut outgoing: Vec<OutgoingExecution> = Vec::with_capacity(transitions.len());

    for (i, transition) in transitions.iter().enumerate() {
        let scope_execution = if tree.execution(propagating)?.is_scope {
            propagating
        } else {
            tree.parent(propagating).ok_or_else(|| {
                EngineError::mutation(propagating, "non-scope execution without a parent scope")
            })?
        };

        let carrier = if i == 0 {
            propagating
        } else {
            let concurrent = tree.create_concurrent_execution(scope_execution)?;

            if i == 1 && !propagating_is_concurrent {
                outgoing.remove(0);
                let replacing = tree
                    .non_event_scope_children(scope_execution)
                    .into_iter()
                    .find(|child| *child != propagating && *child != concurrent)
                    .ok_or(GraphIntegrityError::MissingReplacingExecution {
                        scope: scope_execution,
                        execution: propagating,
                    })?;
                debug!("{} replaced {} for transition {}", replacing, propagating, transitions[0]);
                outgoing.push(OutgoingExecution::new(replacing, transitions[0].clone()));
            }

            concurrent
        };

        outgoing.push(OutgoingExecution::new(carrier, transition.clone()));
    }

    Ok(outgoing)
}
