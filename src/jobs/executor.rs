//! Job Executor
//!
//! Runs acquisition cycles against a [`JobStore`]. Each cycle acquires one
//! batch, runs the jobs of every process instance on a worker thread of its
//! own and reconciles the outcomes with the store on the calling thread.
//! Jobs of the same instance always run sequentially, in acquisition order.

use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;

use chrono::{DateTime, Utc};
use log::{error, info, warn};

use crate::execution::{Engine, EngineError};

use super::acquisition::{AcquisitionConfig, JobAcquisition};
use super::model::{Job, JobId};
use super::store::{JobStore, StoreError};

type WorkerResult = (String, Engine, Vec<(JobId, Result<(), EngineError>)>);

/// Outcome of one acquisition cycle.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CycleReport {
    pub acquired: usize,
    pub succeeded: Vec<JobId>,
    pub failed: Vec<(JobId, String)>,
    /// Jobs whose run stopped at an interrupt; their instance is resumed
    /// at the start of the next cycle
    pub interrupted: Vec<JobId>,
    /// Instances whose queued operations were drained before acquiring
    pub resumed: Vec<String>,
    /// Instances whose worker panicked; their engine is gone
    pub lost_instances: Vec<String>,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.acquired == 0 && self.resumed.is_empty()
    }
}

/// Owns the engines of the process instances it executes jobs for.
pub struct JobExecutor {
    acquisition: JobAcquisition,
    engines: HashMap<String, Engine>,
}

impl JobExecutor {
    pub fn new(config: AcquisitionConfig) -> Self {
        Self {
            acquisition: JobAcquisition::new(config),
            engines: HashMap::new(),
        }
    }

    /// Hands an engine to the executor, keyed by its instance id.
    pub fn register(&mut self, engine: Engine) {
        self.engines.insert(engine.instance_id().to_string(), engine);
    }

    pub fn engine(&self, instance_id: &str) -> Option<&Engine> {
        self.engines.get(instance_id)
    }

    pub fn engine_mut(&mut self, instance_id: &str) -> Option<&mut Engine> {
        self.engines.get_mut(instance_id)
    }

    pub fn engines(&self) -> impl Iterator<Item = &Engine> {
        self.engines.values()
    }

    /// Moves jobs created by the registered engines into the store.
    pub fn collect_jobs<S: JobStore + ?Sized>(&mut self, store: &mut S) -> Result<usize, StoreError> {
        let mut count = 0;
        for engine in self.engines.values_mut() {
            for job in engine.take_created_jobs() {
                store.insert(job)?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Resumes interrupted instances, then acquires one batch and executes it.
    pub fn run_acquisition_cycle<S: JobStore + ?Sized>(
        &mut self,
        store: &mut S,
        now: DateTime<Utc>,
    ) -> Result<CycleReport, StoreError> {
        self.run_cycle_with(store, now, |engine, job| engine.execute_job(job))
    }

    fn run_cycle_with<S, F>(
        &mut self,
        store: &mut S,
        now: DateTime<Utc>,
        work: F,
    ) -> Result<CycleReport, StoreError>
    where
        S: JobStore + ?Sized,
        F: Fn(&mut Engine, &Job) -> Result<(), EngineError> + Send + Copy + 'static,
    {
        let mut report = CycleReport {
            resumed: self.resume_interrupted(),
            ..CycleReport::default()
        };
        self.collect_jobs(store)?;
        let batch = self.acquisition.acquire(store, now);
        report.acquired = batch.len();
        if batch.is_empty() {
            return Ok(report);
        }

        let mut by_instance: Vec<(String, Vec<Job>)> = Vec::new();
        for job in batch {
            match by_instance
                .iter_mut()
                .find(|(instance, _)| *instance == job.process_instance_id)
            {
                Some((_, jobs)) => jobs.push(job),
                None => by_instance.push((job.process_instance_id.clone(), vec![job])),
            }
        }

        let (tx, rx): (Sender<WorkerResult>, Receiver<WorkerResult>) = channel();
        let mut handles = Vec::new();

        for (instance_id, jobs) in by_instance {
            let Some(mut engine) = self.engines.remove(&instance_id) else {
                warn!("No engine registered for process instance {}", instance_id);
                let message = format!("no engine for process instance {}", instance_id);
                for job in jobs {
                    self.fail(store, job.id, &message, false, &mut report)?;
                }
                continue;
            };

            let job_ids: Vec<JobId> = jobs.iter().map(|job| job.id).collect();
            let worker_instance = instance_id.clone();
            let tx = tx.clone();
            let handle = thread::spawn(move || {
                let results = jobs
                    .iter()
                    .map(|job| (job.id, work(&mut engine, job)))
                    .collect();
                if let Err(e) = tx.send((worker_instance, engine, results)) {
                    error!("Failed to send job results: {}", e);
                }
            });
            handles.push((instance_id, job_ids, handle));
        }
        drop(tx);

        for (instance_id, engine, results) in rx {
            for (job_id, result) in results {
                match result {
                    Ok(()) => {
                        store.delete(job_id)?;
                        report.succeeded.push(job_id);
                    }
                    Err(EngineError::Interrupted { pending }) => {
                        warn!(
                            "Job {} interrupted with {} operation(s) pending on {}",
                            job_id, pending, instance_id
                        );
                        store.delete(job_id)?;
                        report.interrupted.push(job_id);
                    }
                    Err(err) => {
                        self.fail(store, job_id, &err.to_string(), err.is_fatal(), &mut report)?
                    }
                }
            }
            self.engines.insert(instance_id, engine);
        }

        for (instance_id, job_ids, handle) in handles {
            if handle.join().is_ok() {
                continue;
            }
            error!(
                "Job worker for process instance {} panicked, its engine is lost",
                instance_id
            );
            for job_id in job_ids {
                self.fail(store, job_id, "job worker panicked", false, &mut report)?;
            }
            report.lost_instances.push(instance_id);
        }

        self.collect_jobs(store)?;
        info!(
            "Cycle finished: {} succeeded, {} failed, {} interrupted",
            report.succeeded.len(),
            report.failed.len(),
            report.interrupted.len()
        );
        Ok(report)
    }

    /// Runs cycles until a cycle has nothing to do or `max_cycles` is reached.
    pub fn run_until_idle<S: JobStore + ?Sized>(
        &mut self,
        store: &mut S,
        now: DateTime<Utc>,
        max_cycles: usize,
    ) -> Result<Vec<CycleReport>, StoreError> {
        let mut reports = Vec::new();
        for _ in 0..max_cycles {
            let report = self.run_acquisition_cycle(store, now)?;
            if report.is_idle() {
                break;
            }
            reports.push(report);
        }
        Ok(reports)
    }

    /// Drains operations an interrupt left on engine queues. Returns the
    /// instances that had any, sorted.
    fn resume_interrupted(&mut self) -> Vec<String> {
        let mut resumed = Vec::new();
        for (instance_id, engine) in self.engines.iter_mut() {
            if engine.pending_operations().is_empty() {
                continue;
            }
            match engine.resume() {
                Ok(()) => info!("Resumed process instance {}", instance_id),
                Err(err) => error!("Resuming process instance {} failed: {}", instance_id, err),
            }
            resumed.push(instance_id.clone());
        }
        resumed.sort();
        resumed
    }

    /// Records a failure and unlocks the job. A fatal failure uses up every
    /// retry left.
    fn fail<S: JobStore + ?Sized>(
        &self,
        store: &mut S,
        job_id: JobId,
        message: &str,
        fatal: bool,
        report: &mut CycleReport,
    ) -> Result<(), StoreError> {
        let mut retries = store.decrement_retries(job_id, message)?;
        while fatal && retries > 0 {
            retries = store.decrement_retries(job_id, message)?;
        }
        store.unlock(job_id)?;
        error!("Job {} failed ({} retries left): {}", job_id, retries, message);
        report.failed.push((job_id, message.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{Activity, ActivityBehavior, ProcessDefinition};
    use crate::jobs::store::InMemoryJobStore;
    use chrono::Duration;

    fn async_chain() -> ProcessDefinition {
        ProcessDefinition::new("p", "a")
            .with_activity(Activity::new("a"))
            .with_activity(Activity::new("svc1").async_before())
            .with_activity(Activity::new("svc2").async_before())
            .with_activity(Activity::new("wait").with_behavior(ActivityBehavior::WaitState))
            .with_transition("t1", "a", "svc1")
            .with_transition("t2", "svc1", "svc2")
            .with_transition("t3", "svc2", "wait")
    }

    fn started(definition: ProcessDefinition, now: DateTime<Utc>) -> Engine {
        let mut engine = Engine::new(definition);
        engine.set_clock(now);
        engine.start().unwrap();
        engine
    }

    #[test]
    fn test_cycle_executes_and_collects_follow_up_jobs() {
        let now = Utc::now();
        let engine = started(async_chain(), now);
        let instance = engine.instance_id().to_string();
        let mut executor = JobExecutor::new(AcquisitionConfig::default());
        executor.register(engine);
        let mut store = InMemoryJobStore::new();

        let first = executor.run_acquisition_cycle(&mut store, now).unwrap();
        assert_eq!(first.acquired, 1);
        assert_eq!(first.succeeded.len(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.jobs()[0].activity_id, "svc2");

        let second = executor.run_acquisition_cycle(&mut store, now).unwrap();
        assert_eq!(second.succeeded.len(), 1);
        assert!(store.is_empty());

        let engine = executor.engine(&instance).unwrap();
        let root = engine.tree().root();
        assert_eq!(engine.tree().get(root).unwrap().activity.as_deref(), Some("wait"));
        assert!(executor.run_acquisition_cycle(&mut store, now).unwrap().is_idle());
    }

    #[test]
    fn test_instances_run_independently() {
        let now = Utc::now();
        let mut executor = JobExecutor::new(AcquisitionConfig::default());
        let mut ids = Vec::new();
        for _ in 0..3 {
            let engine = started(async_chain(), now);
            ids.push(engine.instance_id().to_string());
            executor.register(engine);
        }
        let mut store = InMemoryJobStore::new();

        let reports = executor.run_until_idle(&mut store, now, 10).unwrap();

        let executed: usize = reports.iter().map(|r| r.succeeded.len()).sum();
        assert_eq!(executed, 6);
        for id in ids {
            let engine = executor.engine(&id).unwrap();
            assert_eq!(engine.tree().executions_at("wait").len(), 1);
        }
    }

    #[test]
    fn test_failure_decrements_retries_and_unlocks() {
        let now = Utc::now();
        let definition = ProcessDefinition::new("p", "svc")
            .with_activity(Activity::new("svc").async_before())
            .with_transition("t1", "svc", "missing");
        let engine = started(definition, now);
        let mut executor = JobExecutor::new(AcquisitionConfig::default());
        executor.register(engine);
        let mut store = InMemoryJobStore::new();

        let report = executor.run_acquisition_cycle(&mut store, now).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("missing"));

        let job = &store.jobs()[0];
        assert_eq!(job.retries, 2);
        assert!(job.lock_owner.is_none());

        let reports = executor
            .run_until_idle(&mut store, now + Duration::seconds(1), 10)
            .unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(store.jobs()[0].retries, 0);
    }

    #[test]
    fn test_job_without_engine_fails() {
        let now = Utc::now();
        let mut store = InMemoryJobStore::new();
        let id = store
            .insert(Job::async_continuation(
                "ghost",
                crate::execution::ExecutionId(1),
                "svc",
                now,
            ))
            .unwrap();
        let mut executor = JobExecutor::new(AcquisitionConfig::default());

        let report = executor.run_acquisition_cycle(&mut store, now).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(store.get(id).unwrap().retries, 2);
    }

    #[test]
    fn test_fatal_error_uses_up_retries() {
        let now = Utc::now();
        let definition = ProcessDefinition::new("p", "svc")
            .with_activity(Activity::new("svc").async_before())
            .with_activity(Activity::new("wait").with_behavior(ActivityBehavior::Timer {
                due_in_secs: i64::MAX,
            }))
            .with_transition("t1", "svc", "wait");
        let engine = started(definition, now);
        let instance = engine.instance_id().to_string();
        let mut executor = JobExecutor::new(AcquisitionConfig::default());
        executor.register(engine);
        let mut store = InMemoryJobStore::new();

        let report = executor.run_acquisition_cycle(&mut store, now).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("time range"));

        let job = &store.jobs()[0];
        assert_eq!(job.retries, 0);
        assert!(job.lock_owner.is_none());
        assert!(executor.engine(&instance).is_some());
        assert!(executor.run_acquisition_cycle(&mut store, now).unwrap().is_idle());
    }

    #[test]
    fn test_panicking_worker_fails_its_jobs() {
        let now = Utc::now();
        let engine = started(async_chain(), now);
        let instance = engine.instance_id().to_string();
        let mut executor = JobExecutor::new(AcquisitionConfig::default());
        executor.register(engine);
        let mut store = InMemoryJobStore::new();

        let report = executor
            .run_cycle_with(&mut store, now, |_engine: &mut Engine, _job: &Job| {
                panic!("worker exploded")
            })
            .unwrap();

        assert_eq!(report.acquired, 1);
        assert!(report.succeeded.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.lost_instances, vec![instance.clone()]);
        assert!(executor.engine(&instance).is_none());

        let job = &store.jobs()[0];
        assert_eq!(job.retries, 2);
        assert!(job.lock_owner.is_none());
        assert!(job.exception_message.as_deref().unwrap().contains("panicked"));
    }

    #[test]
    fn test_interrupted_job_resumed_next_cycle() {
        let now = Utc::now();
        let engine = started(async_chain(), now);
        let instance = engine.instance_id().to_string();
        let interrupt = engine.interrupt_handle();
        let mut executor = JobExecutor::new(AcquisitionConfig::default());
        executor.register(engine);
        let mut store = InMemoryJobStore::new();

        interrupt.store(true, std::sync::atomic::Ordering::SeqCst);
        let first = executor.run_acquisition_cycle(&mut store, now).unwrap();
        assert_eq!(first.interrupted.len(), 1);
        assert!(first.succeeded.is_empty());
        assert!(store.is_empty());
        assert_eq!(executor.engine(&instance).unwrap().pending_operations().len(), 1);

        let second = executor.run_acquisition_cycle(&mut store, now).unwrap();
        assert_eq!(second.resumed, vec![instance.clone()]);
        assert_eq!(second.succeeded.len(), 1);

        let engine = executor.engine(&instance).unwrap();
        assert!(engine.pending_operations().is_empty());
        assert_eq!(engine.tree().executions_at("wait").len(), 1);
        assert!(executor.run_acquisition_cycle(&mut store, now).unwrap().is_idle());
    }

    #[test]
    fn test_timer_not_acquired_before_due() {
        let now = Utc::now();
        let definition = ProcessDefinition::new("p", "wait")
            .with_activity(Activity::new("wait").with_behavior(ActivityBehavior::Timer { due_in_secs: 30 }));
        let engine = started(definition, now);
        let instance = engine.instance_id().to_string();
        let mut executor = JobExecutor::new(AcquisitionConfig::default());
        executor.register(engine);
        let mut store = InMemoryJobStore::new();

        assert!(executor.run_acquisition_cycle(&mut store, now).unwrap().is_idle());
        assert_eq!(store.len(), 1);

        let report = executor
            .run_acquisition_cycle(&mut store, now + Duration::seconds(30))
            .unwrap();
        assert_eq!(report.succeeded.len(), 1);
        assert!(executor.engine(&instance).unwrap().is_ended());
    }
}
