//! Execution Tree
//!
//! Arena of execution records for one process instance. Parent and child
//! links are stored as ids, so detaching a node is a matter of editing two
//! id lists and the whole tree serializes as plain data.
//!
//! Structural changes (creating, re-parenting, removing) go through
//! [`ExecutionTree`]; per-node state (activity, flags) is edited directly on
//! the [`Execution`] obtained from [`ExecutionTree::get_mut`].

use std::collections::BTreeMap;
use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

use super::error::EngineError;
use crate::jobs::model::JobId;

/// Stable identifier of an execution within its tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionId(pub u64);

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Execution[{}]", self.0)
    }
}

/// One thread of control through the process graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    parent: Option<ExecutionId>,
    children: Vec<ExecutionId>,

    /// Activity the execution currently sits at
    pub activity: Option<String>,
    /// Transition currently being taken
    pub transition: Option<String>,
    /// Consumed by exactly one transition-destroy-scope step
    pub transitions_to_take: Option<Vec<String>>,

    pub is_active: bool,
    pub is_concurrent: bool,
    pub is_scope: bool,
    pub is_event_scope: bool,
    pub is_ended: bool,

    /// Set while the execution is suspended on an async continuation or timer
    pub pending_job: Option<JobId>,
}

impl Execution {
    fn new(id: ExecutionId, parent: Option<ExecutionId>) -> Self {
        Self {
            id,
            parent,
            children: Vec::new(),
            activity: None,
            transition: None,
            transitions_to_take: None,
            is_active: false,
            is_concurrent: false,
            is_scope: false,
            is_event_scope: false,
            is_ended: false,
            pending_job: None,
        }
    }

    pub fn parent(&self) -> Option<ExecutionId> {
        self.parent
    }

    pub fn children(&self) -> &[ExecutionId] {
        &self.children
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn inactivate(&mut self) {
        self.is_active = false;
    }
}

impl fmt::Display for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// The executions of one process instance, rooted at a scope execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionTree {
    executions: BTreeMap<ExecutionId, Execution>,
    root: ExecutionId,
    next_id: u64,
}

impl Default for ExecutionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionTree {
    /// Creates a tree holding only the root: an active, non-concurrent scope.
    pub fn new() -> Self {
        let root = ExecutionId(1);
        let mut execution = Execution::new(root, None);
        execution.is_scope = true;
        execution.is_active = true;

        let mut executions = BTreeMap::new();
        executions.insert(root, execution);

        Self {
            executions,
            root,
            next_id: 2,
        }
    }

    pub fn root(&self) -> ExecutionId {
        self.root
    }

    pub fn get(&self, id: ExecutionId) -> Option<&Execution> {
        self.executions.get(&id)
    }

    pub fn get_mut(&mut self, id: ExecutionId) -> Option<&mut Execution> {
        self.executions.get_mut(&id)
    }

    /// Like [`get`](Self::get) but failing with `UnknownExecution`.
    pub fn execution(&self, id: ExecutionId) -> Result<&Execution, EngineError> {
        self.executions
            .get(&id)
            .ok_or(EngineError::UnknownExecution(id))
    }

    pub fn execution_mut(&mut self, id: ExecutionId) -> Result<&mut Execution, EngineError> {
        self.executions
            .get_mut(&id)
            .ok_or(EngineError::UnknownExecution(id))
    }

    pub fn contains(&self, id: ExecutionId) -> bool {
        self.executions.contains_key(&id)
    }

    pub fn parent(&self, id: ExecutionId) -> Option<ExecutionId> {
        self.executions.get(&id).and_then(|e| e.parent)
    }

    /// Children in creation order, skipping event-scope executions.
    pub fn non_event_scope_children(&self, id: ExecutionId) -> Vec<ExecutionId> {
        self.executions
            .get(&id)
            .map(|e| {
                e.children
                    .iter()
                    .copied()
                    .filter(|child| self.executions.get(child).is_some_and(|c| !c.is_event_scope))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    /// Never true: the root lives as long as the tree.
    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Execution> {
        self.executions.values()
    }

    /// Active executions positioned at `activity_id`, in id order.
    pub fn executions_at(&self, activity_id: &str) -> Vec<ExecutionId> {
        self.executions
            .values()
            .filter(|e| e.is_active && e.activity.as_deref() == Some(activity_id))
            .map(|e| e.id)
            .collect()
    }

    /// Appends a fresh, inactive child to `parent`.
    fn create_execution(&mut self, parent: ExecutionId) -> Result<ExecutionId, EngineError> {
        let id = ExecutionId(self.next_id);
        let parent_execution = self.execution_mut(parent)?;
        if parent_execution.is_ended {
            return Err(EngineError::mutation(parent, "cannot create a child of an ended execution"));
        }
        parent_execution.children.push(id);

        self.next_id += 1;
        self.executions.insert(id, Execution::new(id, Some(parent)));
        Ok(id)
    }

    /// Creates the non-concurrent scope child an execution hands control to
    /// when it enters a scope activity.
    pub fn create_scope_execution(&mut self, parent: ExecutionId) -> Result<ExecutionId, EngineError> {
        let id = self.create_execution(parent)?;
        let child = self.execution_mut(id)?;
        child.is_scope = true;
        debug!("create scope execution {} under {}", id, parent);
        Ok(id)
    }

    /// Creates a new concurrent, inactive child under `scope`.
    ///
    /// If the scope has no concurrent children yet, the tree is first expanded
    /// so that every thread of control under the scope is a concurrent
    /// execution:
    /// 1. no children: a concurrent execution replaces the scope execution
    ///    itself, inheriting its activity, transition and active flag;
    /// 2. a single non-concurrent child: a concurrent execution is inserted
    ///    between the scope and that child.
    pub fn create_concurrent_execution(
        &mut self,
        scope: ExecutionId,
    ) -> Result<ExecutionId, EngineError> {
        if !self.execution(scope)?.is_scope {
            return Err(EngineError::mutation(
                scope,
                "concurrent executions can only be created under a scope execution",
            ));
        }

        let children = self.non_event_scope_children(scope);
        if children.is_empty() {
            let replacing = self.create_concurrent_child(scope)?;
            self.replace(replacing, scope)?;
            debug!("{} replaces scope {} as concurrent execution", replacing, scope);
        } else if children.len() == 1 && !self.execution(children[0])?.is_concurrent {
            let child = children[0];
            let replacing = self.create_concurrent_child(scope)?;
            let scope_execution = self.execution_mut(scope)?;
            let activity = scope_execution.activity.take();
            scope_execution.inactivate();
            self.execution_mut(replacing)?.activity = activity;
            self.reparent(child, replacing)?;
            debug!("{} wraps scope child {} under {}", replacing, child, scope);
        }

        let concurrent = self.create_concurrent_child(scope)?;
        debug!("create concurrent execution {} under {}", concurrent, scope);
        Ok(concurrent)
    }

    fn create_concurrent_child(&mut self, scope: ExecutionId) -> Result<ExecutionId, EngineError> {
        let id = self.create_execution(scope)?;
        let execution = self.execution_mut(id)?;
        execution.is_concurrent = true;
        execution.is_scope = false;
        Ok(id)
    }

    /// Moves position and activity state from `replaced` to `replacing`.
    /// The replaced execution is left inactive and without an activity.
    pub fn replace(&mut self, replacing: ExecutionId, replaced: ExecutionId) -> Result<(), EngineError> {
        let old = self.execution_mut(replaced)?;
        let activity = old.activity.take();
        let transition = old.transition.take();
        let active = old.is_active;
        old.inactivate();

        let new = self.execution_mut(replacing)?;
        new.activity = activity;
        new.transition = transition;
        new.is_active = active;
        Ok(())
    }

    /// Detaches `id` from its parent and attaches it under `new_parent`.
    pub fn reparent(&mut self, id: ExecutionId, new_parent: ExecutionId) -> Result<(), EngineError> {
        if !self.contains(new_parent) {
            return Err(EngineError::UnknownExecution(new_parent));
        }
        let old_parent = self
            .execution(id)?
            .parent
            .ok_or_else(|| EngineError::mutation(id, "the root execution cannot be re-parented"))?;

        self.execution_mut(old_parent)?.children.retain(|c| *c != id);
        self.execution_mut(new_parent)?.children.push(id);
        self.execution_mut(id)?.parent = Some(new_parent);
        Ok(())
    }

    /// Marks an execution as logically ended. It stays attached so listeners
    /// can still observe it until [`remove`](Self::remove) is called.
    pub fn destroy(&mut self, id: ExecutionId) -> Result<(), EngineError> {
        let execution = self.execution_mut(id)?;
        execution.is_ended = true;
        execution.is_active = false;
        execution.is_scope = false;
        execution.transitions_to_take = None;
        debug!("destroy {}", id);
        Ok(())
    }

    /// Detaches an execution from its parent and drops the record.
    pub fn remove(&mut self, id: ExecutionId) -> Result<Execution, EngineError> {
        let execution = self.execution(id)?;
        let parent = execution
            .parent
            .ok_or_else(|| EngineError::mutation(id, "the root execution cannot be removed"))?;
        if !execution.children.is_empty() {
            return Err(EngineError::mutation(
                id,
                format!("cannot remove with {} child execution(s)", execution.children.len()),
            ));
        }

        self.execution_mut(parent)?.children.retain(|c| *c != id);
        debug!("remove {} from {}", id, parent);
        self.executions
            .remove(&id)
            .ok_or(EngineError::UnknownExecution(id))
    }

    /// Checks the structural invariants of the tree.
    ///
    /// - the root has no parent, every other execution has a live parent that
    ///   lists it exactly once
    /// - concurrent executions sit directly under a scope execution
    /// - only the root may remain attached once ended
    /// - no execution holds an unconsumed transition list between steps
    pub fn check_invariants(&self) -> Result<(), String> {
        self.check_invariants_with_pending(&[])
    }

    /// Same checks, except that executions in `consuming` may still hold a
    /// transition list: a transition-destroy-scope step for them is queued.
    pub fn check_invariants_with_pending(&self, consuming: &[ExecutionId]) -> Result<(), String> {
        for execution in self.executions.values() {
            match execution.parent {
                None if execution.id != self.root => {
                    return Err(format!("{} has no parent but is not the root", execution.id));
                }
                None => {}
                Some(parent) => {
                    let parent_execution = self
                        .executions
                        .get(&parent)
                        .ok_or_else(|| format!("{} has missing parent {}", execution.id, parent))?;
                    let listed = parent_execution
                        .children
                        .iter()
                        .filter(|c| **c == execution.id)
                        .count();
                    if listed != 1 {
                        return Err(format!(
                            "{} is listed {} times under parent {}",
                            execution.id, listed, parent
                        ));
                    }
                    if execution.is_concurrent && !parent_execution.is_scope {
                        return Err(format!(
                            "concurrent {} sits under non-scope {}",
                            execution.id, parent
                        ));
                    }
                    if execution.is_ended {
                        return Err(format!("ended {} is still attached", execution.id));
                    }
                }
            }

            for child in &execution.children {
                let child_execution = self
                    .executions
                    .get(child)
                    .ok_or_else(|| format!("{} lists missing child {}", execution.id, child))?;
                if child_execution.parent != Some(execution.id) {
                    return Err(format!("{} does not point back to {}", child, execution.id));
                }
            }

            if execution.transitions_to_take.is_some() && !consuming.contains(&execution.id) {
                return Err(format!("{} holds unconsumed transitions", execution.id));
            }
        }
        Ok(())
    }

    /// Indented dump of the tree for diagnostics.
    pub fn render(&self) -> String {
        let mut output = String::new();
        self.render_node(self.root, 0, &mut output);
        output
    }

    fn render_node(&self, id: ExecutionId, depth: usize, output: &mut String) {
        let Some(execution) = self.executions.get(&id) else {
            return;
        };

        let mut flags = Vec::new();
        if execution.is_scope {
            flags.push("scope");
        }
        if execution.is_concurrent {
            flags.push("concurrent");
        }
        if execution.is_active {
            flags.push("active");
        }
        if execution.is_ended {
            flags.push("ended");
        }
        if execution.pending_job.is_some() {
            flags.push("suspended");
        }

        output.push_str(&format!(
            "{}{} [{}] @ {}\n",
            "  ".repeat(depth),
            id,
            flags.join(","),
            execution.activity.as_deref().unwrap_or("-")
        ));

        for child in &execution.children {
            self.render_node(*child, depth + 1, output);
        }
    }
}
