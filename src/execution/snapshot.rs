//! Instance Snapshots
//!
//! Captures a process instance (execution tree, queued operations and the
//! jobs it is waiting on) so it can be restored in a later run.
//!
//! Snapshots are written as JSON to `{dir}/{instance_id}.json`.

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use super::engine::Engine;
use super::operation::{AtomicOperation, PendingOperation};
use super::tree::ExecutionTree;
use crate::jobs::model::Job;
use crate::process::ProcessDefinition;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct InstanceSnapshot {
    pub instance_id: String,
    /// Key of the definition the instance runs
    pub definition_key: String,
    pub tree: ExecutionTree,
    #[serde(default)]
    pub pending_operations: Vec<PendingOperation>,
    /// Jobs created by the instance that have not run yet
    #[serde(default)]
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub ended: bool,
    pub timestamp: DateTime<Utc>,
}

impl InstanceSnapshot {
    /// Captures the engine's state together with its outstanding jobs.
    pub fn capture(engine: &Engine, jobs: Vec<Job>) -> Self {
        Self {
            instance_id: engine.instance_id().to_string(),
            definition_key: engine.definition().key.clone(),
            tree: engine.tree().clone(),
            pending_operations: engine.pending_operations(),
            jobs,
            ended: engine.is_ended(),
            timestamp: Utc::now(),
        }
    }

    /// Rebuilds an engine for `definition`. The definition must be the one
    /// the snapshot was taken from.
    pub fn restore(
        self,
        definition: impl Into<Arc<ProcessDefinition>>,
    ) -> Result<(Engine, Vec<Job>), Box<dyn Error>> {
        let definition = definition.into();
        if definition.key != self.definition_key {
            return Err(format!(
                "Snapshot of '{}' cannot be restored with definition '{}'",
                self.definition_key, definition.key
            )
            .into());
        }
        let consuming: Vec<_> = self
            .pending_operations
            .iter()
            .filter(|pending| pending.operation == AtomicOperation::TransitionDestroyScope)
            .map(|pending| pending.execution)
            .collect();
        self.tree
            .check_invariants_with_pending(&consuming)
            .map_err(|e| format!("Corrupt snapshot {}: {}", self.instance_id, e))?;

        let engine = Engine::from_parts(
            self.instance_id,
            definition,
            self.tree,
            self.pending_operations,
            self.ended,
        );
        Ok((engine, self.jobs))
    }

    /// Writes the snapshot to `dir`, creating it if needed.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, Box<dyn Error>> {
        fs::create_dir_all(dir)?;

        let path = Self::path_for(dir, &self.instance_id);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;

        info!("Saved instance snapshot to {}", path.display());
        Ok(path)
    }

    pub fn load(dir: &Path, instance_id: &str) -> Result<Self, Box<dyn Error>> {
        let path = Self::path_for(dir, instance_id);
        let content = fs::read_to_string(&path)?;
        let snapshot: InstanceSnapshot = serde_json::from_str(&content)?;

        info!(
            "Loaded snapshot of {} ({} execution(s), {} job(s))",
            snapshot.instance_id,
            snapshot.tree.len(),
            snapshot.jobs.len()
        );
        Ok(snapshot)
    }

    /// Removes the snapshot file if present.
    pub fn delete(dir: &Path, instance_id: &str) -> Result<(), Box<dyn Error>> {
        let path = Self::path_for(dir, instance_id);
        if path.exists() {
            fs::remove_file(&path)?;
            info!("Deleted snapshot: {}", path.display());
        }
        Ok(())
    }

    fn path_for(dir: &Path, instance_id: &str) -> PathBuf {
        dir.join(format!("{}.json", instance_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::EngineError;
    use crate::process::{Activity, ActivityBehavior};
    use std::sync::atomic::Ordering;
    use tempfile::tempdir;

    fn definition() -> ProcessDefinition {
        ProcessDefinition::new("order", "fork")
            .with_activity(Activity::new("fork"))
            .with_activity(Activity::new("svc").async_before())
            .with_activity(Activity::new("review").with_behavior(ActivityBehavior::WaitState))
            .with_transition("t1", "fork", "svc")
            .with_transition("t2", "fork", "review")
    }

    #[test]
    fn test_save_load_restore() {
        let dir = tempdir().unwrap();
        let mut engine = Engine::new(definition());
        engine.start().unwrap();
        let jobs = engine.take_created_jobs();
        assert_eq!(jobs.len(), 1);

        let snapshot = InstanceSnapshot::capture(&engine, jobs);
        let path = snapshot.save(dir.path()).unwrap();
        assert!(path.exists());

        let loaded = InstanceSnapshot::load(dir.path(), engine.instance_id()).unwrap();
        assert_eq!(loaded.tree.len(), engine.tree().len());

        let (mut restored, jobs) = loaded.restore(definition()).unwrap();
        assert_eq!(restored.instance_id(), engine.instance_id());
        assert_eq!(restored.tree().executions_at("review").len(), 1);

        restored.execute_job(&jobs[0]).unwrap();
        assert!(restored.tree().executions_at("svc").is_empty());
    }

    #[test]
    fn test_interrupted_queue_survives() {
        let dir = tempdir().unwrap();
        let mut engine = Engine::new(definition());
        engine.interrupt_handle().store(true, Ordering::SeqCst);
        assert!(engine.start().is_err());

        InstanceSnapshot::capture(&engine, Vec::new())
            .save(dir.path())
            .unwrap();
        let (mut restored, _) = InstanceSnapshot::load(dir.path(), engine.instance_id())
            .unwrap()
            .restore(definition())
            .unwrap();

        assert_eq!(restored.pending_operations().len(), 1);
        restored.resume().unwrap();
        assert_eq!(restored.tree().executions_at("review").len(), 1);
    }

    #[test]
    fn test_interrupted_signal_restores_and_resumes() {
        let dir = tempdir().unwrap();
        let waiting = ProcessDefinition::new("approval", "review")
            .with_activity(Activity::new("review").with_behavior(ActivityBehavior::WaitState))
            .with_activity(Activity::new("done").with_behavior(ActivityBehavior::End))
            .with_transition("t1", "review", "done");
        let mut engine = Engine::new(waiting.clone());
        engine.start().unwrap();
        let root = engine.tree().root();

        engine.interrupt_handle().store(true, Ordering::SeqCst);
        assert!(matches!(
            engine.signal(root).unwrap_err(),
            EngineError::Interrupted { pending: 1 }
        ));

        InstanceSnapshot::capture(&engine, Vec::new())
            .save(dir.path())
            .unwrap();
        let (mut restored, _) = InstanceSnapshot::load(dir.path(), engine.instance_id())
            .unwrap()
            .restore(waiting)
            .unwrap();

        restored.resume().unwrap();
        assert!(restored.is_ended());
    }

    #[test]
    fn test_restore_rejects_stray_transition_list() {
        let mut engine = Engine::new(definition());
        engine.start().unwrap();
        let mut snapshot = InstanceSnapshot::capture(&engine, Vec::new());
        let review = snapshot.tree.executions_at("review")[0];
        snapshot.tree.get_mut(review).unwrap().transitions_to_take = Some(Vec::new());

        let err = snapshot.restore(definition()).unwrap_err();
        assert!(err.to_string().contains("unconsumed transitions"));
    }

    #[test]
    fn test_restore_with_wrong_definition() {
        let engine = Engine::new(definition());
        let snapshot = InstanceSnapshot::capture(&engine, Vec::new());

        assert!(snapshot
            .restore(ProcessDefinition::new("other", "a"))
            .is_err());
    }

    #[test]
    fn test_load_missing_and_delete() {
        let dir = tempdir().unwrap();
        assert!(InstanceSnapshot::load(dir.path(), "missing").is_err());

        let engine = Engine::new(definition());
        InstanceSnapshot::capture(&engine, Vec::new())
            .save(dir.path())
            .unwrap();
        InstanceSnapshot::delete(dir.path(), engine.instance_id()).unwrap();
        assert!(InstanceSnapshot::load(dir.path(), engine.instance_id()).is_err());
        InstanceSnapshot::delete(dir.path(), engine.instance_id()).unwrap();
    }
}
