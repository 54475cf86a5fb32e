//! Process Instance Engine
//!
//! Drives one process instance forward by atomic operations:
//! - A FIFO queue of pending operations drained by a single outer loop
//!   (no operation ever calls another directly)
//! - Suspension at asynchronous points by creating continuation jobs
//! - Resumption from async-continuation and timer jobs
//! - Interruption between operations via a shared flag
//!
//! The engine is single-threaded per instance. Concurrency inside an
//! instance lives in the execution tree; separate instances may run on
//! separate threads (see [`crate::jobs::JobExecutor`]).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::jobs::model::{Job, JobKind};
use crate::monitoring::{EventType, ExecutionTimeline};
use crate::process::{ActivityBehavior, ProcessDefinition, DEFAULT_JOB_PRIORITY};

use super::error::EngineError;
use super::operation::{AtomicOperation, PendingOperation};
use super::transition::destroy_scope_and_fan_out;
use super::tree::{ExecutionId, ExecutionTree};

/// Runtime for a single process instance.
///
/// # Example
///
/// ```rust,no_run
/// use procvm::execution::Engine;
/// use procvm::load_process;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let definition = load_process("order.yaml")?;
///     let mut engine = Engine::new(definition);
///     engine.start()?;
///
///     for job in engine.take_created_jobs() {
///         println!("waiting on {}", job);
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Engine {
    instance_id: String,
    definition: Arc<ProcessDefinition>,
    config: EngineConfig,
    tree: ExecutionTree,
    queue: VecDeque<PendingOperation>,
    clock: DateTime<Utc>,
    created_jobs: Vec<Job>,
    timeline: ExecutionTimeline,
    interrupted: Arc<AtomicBool>,
    ended: bool,
}

impl Engine {
    /// Creates an engine for a fresh instance of `definition`.
    pub fn new(definition: impl Into<Arc<ProcessDefinition>>) -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
            definition: definition.into(),
            config: EngineConfig::default(),
            tree: ExecutionTree::new(),
            queue: VecDeque::new(),
            clock: Utc::now(),
            created_jobs: Vec::new(),
            timeline: ExecutionTimeline::new(),
            interrupted: Arc::new(AtomicBool::new(false)),
            ended: false,
        }
    }

    /// Rebuilds an engine around a previously captured tree and queue.
    pub(crate) fn from_parts(
        instance_id: String,
        definition: Arc<ProcessDefinition>,
        tree: ExecutionTree,
        queue: Vec<PendingOperation>,
        ended: bool,
    ) -> Self {
        let mut engine = Self::new(definition);
        engine.instance_id = instance_id;
        engine.tree = tree;
        engine.queue = queue.into();
        engine.ended = ended;
        engine
    }

    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    /// Sets the clock used for job due dates.
    pub fn set_clock(&mut self, now: DateTime<Utc>) {
        self.clock = now;
    }

    pub fn set_instance_id(&mut self, instance_id: impl Into<String>) {
        self.instance_id = instance_id.into();
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn definition(&self) -> &ProcessDefinition {
        &self.definition
    }

    pub fn tree(&self) -> &ExecutionTree {
        &self.tree
    }

    pub fn timeline(&self) -> &ExecutionTimeline {
        &self.timeline
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Operations still waiting on the queue (non-empty only after an
    /// interrupt).
    pub fn pending_operations(&self) -> Vec<PendingOperation> {
        self.queue.iter().copied().collect()
    }

    /// Flag that stops the trampoline before its next operation.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Hands over the jobs created since the last call.
    pub fn take_created_jobs(&mut self) -> Vec<Job> {
        std::mem::take(&mut self.created_jobs)
    }

    /// Places the root execution on the initial activity and runs until the
    /// instance waits, suspends or ends.
    pub fn start(&mut self) -> Result<(), EngineError> {
        let root = self.tree.root();
        let root_execution = self.tree.execution(root)?;
        if self.ended {
            return Err(EngineError::InstanceEnded);
        }
        if root_execution.activity.is_some() || !root_execution.children().is_empty() {
            return Err(EngineError::mutation(root, "process instance was already started"));
        }

        info!(
            "Starting process instance {} of '{}'",
            self.instance_id, self.definition.key
        );
        self.queue
            .push_back(PendingOperation::new(AtomicOperation::ProcessStart, root));
        self.run()
    }

    /// Leaves the execution's current activity over `transitions`.
    pub fn take_transitions(
        &mut self,
        execution: ExecutionId,
        transitions: Vec<String>,
    ) -> Result<(), EngineError> {
        self.ensure_drivable(execution)?;
        for transition in &transitions {
            if self.definition.get_transition(transition).is_none() {
                return Err(EngineError::UnknownTransition(transition.clone()));
            }
        }

        self.tree.execution_mut(execution)?.transitions_to_take = Some(transitions);
        self.queue.push_back(PendingOperation::new(
            AtomicOperation::TransitionDestroyScope,
            execution,
        ));
        self.run()
    }

    /// Runs a single operation on `execution` and everything it schedules.
    pub fn perform_operation(
        &mut self,
        operation: AtomicOperation,
        execution: ExecutionId,
    ) -> Result<(), EngineError> {
        if self.ended {
            return Err(EngineError::InstanceEnded);
        }
        self.queue
            .push_back(PendingOperation::new(operation, execution));
        self.run()
    }

    /// Resumes an execution waiting at its activity over every outgoing
    /// transition.
    pub fn signal(&mut self, execution: ExecutionId) -> Result<(), EngineError> {
        self.ensure_drivable(execution)?;
        info!("Signal {}", execution);
        self.leave(execution)?;
        self.run()
    }

    /// Continues the execution a job was created for.
    ///
    /// On failure the tree is restored to its state before the job ran, so
    /// the job can be retried.
    pub fn execute_job(&mut self, job: &Job) -> Result<(), EngineError> {
        if self.ended {
            return Err(EngineError::InstanceEnded);
        }
        let execution_id = job.execution_id;
        let resumed = match (job.kind, job.handler_configuration.as_deref()) {
            (JobKind::Timer, _) => None,
            (JobKind::AsyncContinuation, None) => Some(AtomicOperation::TransitionCreateScope),
            (JobKind::AsyncContinuation, Some(name)) => Some(
                AtomicOperation::from_canonical_name(name)
                    .ok_or_else(|| EngineError::UnknownOperation(name.to_string()))?,
            ),
        };

        let checkpoint = self.tree.clone();
        let queued = self.queue.clone();
        let created = self.created_jobs.len();

        let execution = self.tree.execution_mut(execution_id)?;
        if execution.pending_job != Some(job.id) {
            return Err(EngineError::ConcurrentResume {
                execution: execution_id,
                job: job.id,
            });
        }
        execution.pending_job = None;
        info!("Executing {} on {}", job, execution_id);

        let result = match resumed {
            Some(operation) => {
                self.queue
                    .push_back(PendingOperation::resumed(operation, execution_id));
                self.run()
            }
            None => self.leave(execution_id).and_then(|_| self.run()),
        };

        match result {
            Err(err) if !matches!(err, EngineError::Interrupted { .. }) => {
                warn!("{} failed, rolling back instance {}", job.id, self.instance_id);
                self.tree = checkpoint;
                self.queue = queued;
                self.created_jobs.truncate(created);
                self.ended = false;
                Err(err)
            }
            other => other,
        }
    }

    /// Drains operations left on the queue by an interrupt.
    pub fn resume(&mut self) -> Result<(), EngineError> {
        if !self.queue.is_empty() {
            info!(
                "Resuming instance {} with {} pending operation(s)",
                self.instance_id,
                self.queue.len()
            );
        }
        self.run()
    }

    /// The trampoline.
    fn run(&mut self) -> Result<(), EngineError> {
        while let Some(next) = self.queue.front().copied() {
            if self.interrupted.swap(false, Ordering::SeqCst) {
                warn!(
                    "Instance {} interrupted before {} on {}",
                    self.instance_id, next.operation, next.execution
                );
                return Err(EngineError::Interrupted {
                    pending: self.queue.len(),
                });
            }
            self.queue.pop_front();

            if let Err(err) = self.invoke(next) {
                error!(
                    "{} on {} failed: {}",
                    next.operation, next.execution, err
                );
                self.timeline
                    .add_event(next.operation, next.execution, None, EventType::Failed);
                self.queue.clear();
                return Err(err);
            }
        }
        Ok(())
    }

    fn invoke(&mut self, pending: PendingOperation) -> Result<(), EngineError> {
        let execution = self.tree.execution(pending.execution)?;
        if !pending.resumed {
            if execution.pending_job.is_some() {
                return Err(EngineError::Suspended(pending.execution));
            }
            if pending.operation.is_async(execution, &self.definition) {
                return self.suspend(pending);
            }
        }

        debug!("{} {}", pending.operation, pending.execution);
        self.timeline.add_event(
            pending.operation,
            pending.execution,
            execution.activity.clone(),
            EventType::Executed,
        );

        let id = pending.execution;
        match pending.operation {
            AtomicOperation::ProcessStart => self.process_start(id),
            AtomicOperation::TransitionNotifyListenerTake => self.notify_listener_take(id),
            AtomicOperation::TransitionCreateScope => self.create_scope(id),
            AtomicOperation::ActivityExecute => self.activity_execute(id),
            AtomicOperation::TransitionDestroyScope => self.destroy_scope(id),
            AtomicOperation::ActivityEnd => self.activity_end(id),
        }
    }

    fn schedule(&mut self, operation: AtomicOperation, execution: ExecutionId) {
        self.queue
            .push_back(PendingOperation::new(operation, execution));
    }

    fn process_start(&mut self, id: ExecutionId) -> Result<(), EngineError> {
        let initial = self.definition.initial.clone();
        if self.definition.get_activity(&initial).is_none() {
            return Err(EngineError::UnknownActivity(initial));
        }

        let root = self.tree.execution_mut(id)?;
        root.activity = Some(initial);
        root.is_active = true;
        self.schedule(AtomicOperation::TransitionCreateScope, id);
        Ok(())
    }

    fn notify_listener_take(&mut self, id: ExecutionId) -> Result<(), EngineError> {
        let execution = self.tree.execution_mut(id)?;
        let transition_id = execution
            .transition
            .take()
            .ok_or_else(|| EngineError::mutation(id, "no transition to take"))?;
        let transition = self
            .definition
            .get_transition(&transition_id)
            .ok_or_else(|| EngineError::UnknownTransition(transition_id.clone()))?;

        debug!(
            "{} takes {} from {} to {}",
            id, transition.id, transition.source, transition.target
        );
        execution.activity = Some(transition.target.clone());
        execution.is_active = true;
        self.schedule(AtomicOperation::TransitionCreateScope, id);
        Ok(())
    }

    fn create_scope(&mut self, id: ExecutionId) -> Result<(), EngineError> {
        let activity = self
            .tree
            .execution(id)?
            .activity
            .clone()
            .ok_or(EngineError::NoActivity(id))?;

        if !self.definition.is_scope(&activity) {
            self.schedule(AtomicOperation::ActivityExecute, id);
            return Ok(());
        }

        let scoped = self.tree.create_scope_execution(id)?;
        let parent = self.tree.execution_mut(id)?;
        let transition = parent.transition.take();
        parent.activity = None;
        parent.inactivate();

        let child = self.tree.execution_mut(scoped)?;
        child.activity = Some(activity);
        child.transition = transition;
        child.is_active = true;
        self.schedule(AtomicOperation::ActivityExecute, scoped);
        Ok(())
    }

    fn activity_execute(&mut self, id: ExecutionId) -> Result<(), EngineError> {
        let activity_id = self
            .tree
            .execution(id)?
            .activity
            .clone()
            .ok_or(EngineError::NoActivity(id))?;
        let behavior = self
            .definition
            .get_activity(&activity_id)
            .map(|a| a.behavior.clone())
            .ok_or_else(|| EngineError::UnknownActivity(activity_id.clone()))?;

        match behavior {
            ActivityBehavior::PassThrough => self.leave(id),
            ActivityBehavior::WaitState => {
                debug!("{} waits at {}", id, activity_id);
                Ok(())
            }
            ActivityBehavior::Timer { due_in_secs } => {
                let due = Duration::try_seconds(due_in_secs)
                    .and_then(|delay| self.clock.checked_add_signed(delay))
                    .ok_or_else(|| EngineError::DueDateOutOfRange {
                        activity: activity_id.clone(),
                        secs: due_in_secs,
                    })?;
                let job = Job::timer(self.instance_id.clone(), id, activity_id.clone(), due)
                    .with_priority(self.job_priority(&activity_id))
                    .with_retries(self.config.default_retries);
                info!("{} waits at {} for timer due {}", id, activity_id, due);
                self.park(id, job)
            }
            ActivityBehavior::End => {
                self.schedule(AtomicOperation::ActivityEnd, id);
                Ok(())
            }
        }
    }

    fn destroy_scope(&mut self, id: ExecutionId) -> Result<(), EngineError> {
        let outgoing = destroy_scope_and_fan_out(&mut self.tree, &self.definition, id)?;
        if outgoing.len() > 1 {
            debug!("{} forks into {} executions", id, outgoing.len());
        }
        for target in &outgoing {
            target.take(&mut self.tree)?;
            self.schedule(AtomicOperation::TransitionNotifyListenerTake, target.execution);
        }
        Ok(())
    }

    fn activity_end(&mut self, id: ExecutionId) -> Result<(), EngineError> {
        let Some(parent) = self.tree.parent(id) else {
            self.tree.destroy(id)?;
            self.ended = true;
            info!("Process instance {} ended", self.instance_id);
            return Ok(());
        };

        self.tree.destroy(id)?;
        self.tree.remove(id)?;
        if self.tree.non_event_scope_children(parent).is_empty() {
            self.schedule(AtomicOperation::ActivityEnd, parent);
        }
        Ok(())
    }

    /// Takes every outgoing transition of the current activity, or ends the
    /// execution when there is none.
    fn leave(&mut self, id: ExecutionId) -> Result<(), EngineError> {
        let execution = self.tree.execution_mut(id)?;
        let activity_id = execution.activity.clone().ok_or(EngineError::NoActivity(id))?;
        let outgoing = self.definition.outgoing(&activity_id);

        if outgoing.is_empty() {
            debug!("{} reached terminal activity {}", id, activity_id);
            self.schedule(AtomicOperation::ActivityEnd, id);
        } else {
            execution.transitions_to_take = Some(outgoing.to_vec());
            self.schedule(AtomicOperation::TransitionDestroyScope, id);
        }
        Ok(())
    }

    /// Defers an asynchronous operation to a continuation job.
    fn suspend(&mut self, pending: PendingOperation) -> Result<(), EngineError> {
        let activity_id = self
            .tree
            .execution(pending.execution)?
            .activity
            .clone()
            .ok_or(EngineError::NoActivity(pending.execution))?;

        let job = Job::async_continuation(
            self.instance_id.clone(),
            pending.execution,
            activity_id.clone(),
            self.clock,
        )
        .with_priority(self.job_priority(&activity_id))
        .with_retries(self.config.default_retries)
        .with_handler_configuration(pending.operation.canonical_name());

        info!(
            "{} suspended before {} at {}",
            pending.execution, pending.operation, activity_id
        );
        self.timeline.add_event(
            pending.operation,
            pending.execution,
            Some(activity_id),
            EventType::Suspended,
        );
        self.park(pending.execution, job)
    }

    fn park(&mut self, id: ExecutionId, job: Job) -> Result<(), EngineError> {
        self.tree.execution_mut(id)?.pending_job = Some(job.id);
        self.created_jobs.push(job);
        Ok(())
    }

    fn job_priority(&self, activity_id: &str) -> i32 {
        if !self.config.acquisition.produce_prioritized_jobs {
            return DEFAULT_JOB_PRIORITY;
        }
        self.definition
            .get_activity(activity_id)
            .and_then(|a| a.job_priority)
            .or(self.definition.job_priority)
            .unwrap_or(self.config.default_job_priority)
    }

    fn ensure_drivable(&self, id: ExecutionId) -> Result<(), EngineError> {
        if self.ended {
            return Err(EngineError::InstanceEnded);
        }
        let execution = self.tree.execution(id)?;
        if execution.pending_job.is_some() {
            return Err(EngineError::Suspended(id));
        }
        if execution.activity.is_none() {
            return Err(EngineError::NoActivity(id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::error::GraphIntegrityError;
    use crate::process::Activity;

    fn wait(id: &str) -> Activity {
        Activity::new(id).with_behavior(ActivityBehavior::WaitState)
    }

    fn prioritized() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.acquisition.produce_prioritized_jobs = true;
        config
    }

    #[test]
    fn test_single_transition_advances_same_execution() {
        let definition = ProcessDefinition::new("p", "a")
            .with_activity(wait("a"))
            .with_activity(wait("b"))
            .with_transition("t1", "a", "b");
        let mut engine = Engine::new(definition);
        engine.start().unwrap();
        let root = engine.tree().root();

        engine.take_transitions(root, vec!["t1".to_string()]).unwrap();

        let execution = engine.tree().get(root).unwrap();
        assert_eq!(execution.activity.as_deref(), Some("b"));
        assert!(execution.is_active);
        assert_eq!(engine.tree().len(), 1);
        assert!(engine.tree().check_invariants().is_ok());
    }

    #[test]
    fn test_leaving_scope_returns_control_to_parent() {
        let definition = ProcessDefinition::new("p", "a")
            .with_activity(Activity::new("a"))
            .with_activity(wait("sub").scope())
            .with_activity(wait("c"))
            .with_transition("t1", "a", "sub")
            .with_transition("t2", "sub", "c");
        let mut engine = Engine::new(definition);
        engine.start().unwrap();
        let root = engine.tree().root();

        let scoped = engine.tree().executions_at("sub");
        assert_eq!(scoped.len(), 1);
        let scoped = scoped[0];
        assert_eq!(engine.tree().parent(scoped), Some(root));
        assert!(!engine.tree().get(root).unwrap().is_active);

        engine.signal(scoped).unwrap();

        assert!(!engine.tree().contains(scoped));
        let parent = engine.tree().get(root).unwrap();
        assert!(parent.is_active);
        assert_eq!(parent.activity.as_deref(), Some("c"));
        assert!(parent.children().is_empty());
    }

    #[test]
    fn test_fork_creates_one_execution_per_transition() {
        let definition = ProcessDefinition::new("p", "fork")
            .with_activity(Activity::new("fork"))
            .with_activity(wait("b"))
            .with_activity(wait("c"))
            .with_activity(wait("d"))
            .with_transition("t1", "fork", "b")
            .with_transition("t2", "fork", "c")
            .with_transition("t3", "fork", "d");
        let mut engine = Engine::new(definition);
        engine.start().unwrap();
        let tree = engine.tree();
        let root = tree.root();

        let children = tree.non_event_scope_children(root);
        assert_eq!(children.len(), 3);
        for (child, activity) in children.iter().zip(["b", "c", "d"]) {
            let execution = tree.get(*child).unwrap();
            assert!(execution.is_concurrent);
            assert!(execution.is_active);
            assert_eq!(execution.activity.as_deref(), Some(activity));
        }
        assert!(!tree.get(root).unwrap().is_active);
        assert!(tree.check_invariants().is_ok());
    }

    #[test]
    fn test_zero_transitions_fails_with_graph_integrity() {
        let definition = ProcessDefinition::new("p", "a").with_activity(wait("a"));
        let mut engine = Engine::new(definition);
        engine.start().unwrap();
        let root = engine.tree().root();

        let err = engine.take_transitions(root, Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::GraphIntegrity(GraphIntegrityError::NoOutgoingTransitions { .. })
        ));
        assert!(err.to_string().contains("No outgoing transitions from activity a"));
    }

    #[test]
    fn test_destroy_scope_without_transitions_is_reentry() {
        let definition = ProcessDefinition::new("p", "a").with_activity(wait("a"));
        let mut engine = Engine::new(definition);
        engine.start().unwrap();
        let root = engine.tree().root();

        let err = engine
            .perform_operation(AtomicOperation::TransitionDestroyScope, root)
            .unwrap_err();
        assert_eq!(err, EngineError::IllegalReentry { execution: root });
        assert!(engine.pending_operations().is_empty());
    }

    #[test]
    fn test_unknown_transition_rejected_before_mutation() {
        let definition = ProcessDefinition::new("p", "a").with_activity(wait("a"));
        let mut engine = Engine::new(definition);
        engine.start().unwrap();
        let root = engine.tree().root();

        let err = engine
            .take_transitions(root, vec!["nope".to_string()])
            .unwrap_err();
        assert_eq!(err, EngineError::UnknownTransition("nope".to_string()));
        assert!(engine.tree().get(root).unwrap().transitions_to_take.is_none());
    }

    #[test]
    fn test_end_activity_ends_instance() {
        let definition = ProcessDefinition::new("p", "a")
            .with_activity(Activity::new("a"))
            .with_activity(Activity::new("done").with_behavior(ActivityBehavior::End))
            .with_transition("t1", "a", "done");
        let mut engine = Engine::new(definition);
        engine.start().unwrap();

        assert!(engine.is_ended());
        let root = engine.tree().root();
        assert_eq!(engine.signal(root).unwrap_err(), EngineError::InstanceEnded);
        assert_eq!(engine.start().unwrap_err(), EngineError::InstanceEnded);
    }

    #[test]
    fn test_forked_branches_end_instance_when_all_finish() {
        let definition = ProcessDefinition::new("p", "fork")
            .with_activity(Activity::new("fork"))
            .with_activity(wait("left"))
            .with_activity(Activity::new("right"))
            .with_transition("t1", "fork", "left")
            .with_transition("t2", "fork", "right");
        let mut engine = Engine::new(definition);
        engine.start().unwrap();

        // "right" has no outgoing transitions, so its branch ended already
        assert!(!engine.is_ended());
        let left = engine.tree().executions_at("left");
        assert_eq!(left.len(), 1);
        assert_eq!(engine.tree().len(), 2);

        engine.signal(left[0]).unwrap();
        assert!(engine.is_ended());
        assert_eq!(engine.tree().len(), 1);
    }

    #[test]
    fn test_deep_chain_runs_without_recursion() {
        let length = 2_000;
        let mut definition = ProcessDefinition::new("chain", "n0");
        definition.activities = (0..length).map(|i| Activity::new(format!("n{}", i))).collect();
        definition.transitions = (0..length - 1)
            .map(|i| {
                crate::process::Transition::new(
                    format!("t{}", i),
                    format!("n{}", i),
                    format!("n{}", i + 1),
                )
            })
            .collect();
        definition.refresh_outgoing();
        let mut engine = Engine::new(definition);

        engine.start().unwrap();

        assert!(engine.is_ended());
        assert!(engine.timeline().get_events().len() > length);
    }

    #[test]
    fn test_async_before_suspends_and_resumes_from_job() {
        let definition = ProcessDefinition::new("p", "a")
            .with_activity(Activity::new("a"))
            .with_activity(Activity::new("svc").async_before())
            .with_activity(wait("b"))
            .with_transition("t1", "a", "svc")
            .with_transition("t2", "svc", "b");
        let mut engine = Engine::new(definition);
        engine.start().unwrap();
        let root = engine.tree().root();

        let jobs = engine.take_created_jobs();
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.kind, JobKind::AsyncContinuation);
        assert_eq!(job.execution_id, root);
        assert_eq!(job.activity_id, "svc");
        assert_eq!(job.priority, 0);
        assert_eq!(job.handler_configuration.as_deref(), Some("transition-create-scope"));
        assert_eq!(engine.tree().get(root).unwrap().pending_job, Some(job.id));

        assert_eq!(engine.signal(root).unwrap_err(), EngineError::Suspended(root));

        engine.execute_job(job).unwrap();
        let execution = engine.tree().get(root).unwrap();
        assert_eq!(execution.activity.as_deref(), Some("b"));
        assert!(execution.pending_job.is_none());

        let err = engine.execute_job(job).unwrap_err();
        assert!(matches!(err, EngineError::ConcurrentResume { .. }));
    }

    #[test]
    fn test_job_priority_only_when_prioritized() {
        let definition = ProcessDefinition::new("p", "svc")
            .with_activity(Activity::new("svc").async_before().with_job_priority(7))
            .with_activity(Activity::new("other").async_before())
            .with_job_priority(3);

        let mut plain = Engine::new(definition.clone());
        plain.start().unwrap();
        assert_eq!(plain.take_created_jobs()[0].priority, 0);

        let mut engine = Engine::new(definition.clone());
        engine.set_config(prioritized());
        engine.start().unwrap();
        assert_eq!(engine.take_created_jobs()[0].priority, 7);

        let mut fallback = Engine::new(ProcessDefinition {
            initial: "other".to_string(),
            ..definition
        });
        fallback.set_config(prioritized());
        fallback.start().unwrap();
        assert_eq!(fallback.take_created_jobs()[0].priority, 3);
    }

    #[test]
    fn test_timer_job_due_after_delay() {
        let definition = ProcessDefinition::new("p", "wait")
            .with_activity(Activity::new("wait").with_behavior(ActivityBehavior::Timer { due_in_secs: 60 }))
            .with_activity(wait("after"))
            .with_transition("t1", "wait", "after");
        let now = Utc::now();
        let mut engine = Engine::new(definition);
        engine.set_clock(now);
        engine.start().unwrap();

        let jobs = engine.take_created_jobs();
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].is_timer());
        assert_eq!(jobs[0].due_date, Some(now + Duration::seconds(60)));

        engine.execute_job(&jobs[0]).unwrap();
        let root = engine.tree().root();
        assert_eq!(engine.tree().get(root).unwrap().activity.as_deref(), Some("after"));
    }

    #[test]
    fn test_timer_beyond_time_range_fails_without_panic() {
        for due_in_secs in [i64::MAX, i64::MAX / 1_000] {
            let definition = ProcessDefinition::new("p", "wait")
                .with_activity(Activity::new("wait").with_behavior(ActivityBehavior::Timer { due_in_secs }));
            let mut engine = Engine::new(definition);

            assert_eq!(
                engine.start().unwrap_err(),
                EngineError::DueDateOutOfRange {
                    activity: "wait".to_string(),
                    secs: due_in_secs,
                }
            );
            assert!(engine.take_created_jobs().is_empty());
        }
    }

    #[test]
    fn test_fork_after_scope_hands_back_to_root() {
        let definition = ProcessDefinition::new("p", "sub")
            .with_activity(Activity::new("sub").scope())
            .with_activity(wait("x"))
            .with_activity(wait("y"))
            .with_activity(wait("z"))
            .with_transition("t1", "sub", "x")
            .with_transition("t2", "sub", "y")
            .with_transition("t3", "sub", "z");
        let mut engine = Engine::new(definition);
        engine.start().unwrap();

        let tree = engine.tree();
        let root = tree.root();
        assert!(tree.check_invariants().is_ok());
        assert!(tree.executions_at("sub").is_empty());

        let children = tree.non_event_scope_children(root);
        assert_eq!(children.len(), 3);
        for activity in ["x", "y", "z"] {
            let at = tree.executions_at(activity);
            assert_eq!(at.len(), 1, "one execution at {}", activity);
            let execution = tree.get(at[0]).unwrap();
            assert!(execution.is_concurrent);
            assert_eq!(execution.parent(), Some(root));
            assert!(children.contains(&at[0]));
        }

        let root_execution = tree.get(root).unwrap();
        assert!(!root_execution.is_active);
        assert!(root_execution.activity.is_none());
    }

    #[test]
    fn test_failed_job_rolls_back_tree() {
        let definition = ProcessDefinition::new("p", "svc")
            .with_activity(Activity::new("svc").async_before())
            .with_transition("t1", "svc", "missing");
        let mut engine = Engine::new(definition);
        engine.start().unwrap();
        let job = engine.take_created_jobs().remove(0);
        let root = engine.tree().root();

        let err = engine.execute_job(&job).unwrap_err();
        assert_eq!(err, EngineError::UnknownActivity("missing".to_string()));

        let execution = engine.tree().get(root).unwrap();
        assert_eq!(execution.pending_job, Some(job.id));
        assert_eq!(execution.activity.as_deref(), Some("svc"));
        assert!(engine.take_created_jobs().is_empty());
    }

    #[test]
    fn test_failed_job_keeps_operations_left_by_interrupt() {
        let definition = ProcessDefinition::new("p", "fork")
            .with_activity(Activity::new("fork"))
            .with_activity(Activity::new("svc").async_before())
            .with_activity(wait("w"))
            .with_transition("t1", "fork", "svc")
            .with_transition("t2", "fork", "w")
            .with_transition("t3", "svc", "missing");
        let mut engine = Engine::new(definition);
        engine.start().unwrap();
        let job = engine.take_created_jobs().remove(0);
        let waiting = engine.tree().executions_at("w")[0];

        let leftover = PendingOperation::new(AtomicOperation::ActivityExecute, waiting);
        engine.queue.push_back(leftover);

        let err = engine.execute_job(&job).unwrap_err();
        assert_eq!(err, EngineError::UnknownActivity("missing".to_string()));
        assert_eq!(engine.pending_operations(), vec![leftover]);
        assert_eq!(engine.tree().executions_at("svc").len(), 1);
    }

    #[test]
    fn test_interrupt_between_operations_and_resume() {
        let definition = ProcessDefinition::new("p", "a")
            .with_activity(Activity::new("a"))
            .with_activity(Activity::new("b"))
            .with_transition("t1", "a", "b");
        let mut engine = Engine::new(definition);
        engine.interrupt_handle().store(true, Ordering::SeqCst);

        let err = engine.start().unwrap_err();
        assert_eq!(err, EngineError::Interrupted { pending: 1 });
        assert_eq!(engine.pending_operations().len(), 1);
        assert!(!engine.is_ended());

        engine.resume().unwrap();
        assert!(engine.is_ended());
        assert!(engine.pending_operations().is_empty());
    }

    #[test]
    fn test_start_twice_rejected() {
        let definition = ProcessDefinition::new("p", "a").with_activity(wait("a"));
        let mut engine = Engine::new(definition);
        engine.start().unwrap();

        assert!(matches!(
            engine.start().unwrap_err(),
            EngineError::InvalidTreeMutation { .. }
        ));
    }

    #[test]
    fn test_unknown_initial_activity() {
        let mut engine = Engine::new(ProcessDefinition::new("p", "ghost"));
        assert_eq!(
            engine.start().unwrap_err(),
            EngineError::UnknownActivity("ghost".to_string())
        );
    }

    #[test]
    fn test_timeline_records_canonical_operations() {
        let definition = ProcessDefinition::new("p", "a")
            .with_activity(Activity::new("a"))
            .with_activity(wait("b"))
            .with_transition("t1", "a", "b");
        let mut engine = Engine::new(definition);
        engine.start().unwrap();

        let names: Vec<&str> = engine
            .timeline()
            .get_events()
            .iter()
            .map(|e| e.operation.canonical_name())
            .collect();
        assert_eq!(
            names,
            vec![
                "process-start",
                "transition-create-scope",
                "activity-execute",
                "transition-destroy-scope",
                "transition-notify-listener-take",
                "transition-create-scope",
                "activity-execute",
            ]
        );
    }
}
