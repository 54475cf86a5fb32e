//! Process Graph Model
//!
//! Activities and the transitions between them. This is the read-only graph
//! an execution walks; it is produced by a compiler or loaded from YAML and
//! never mutated while instances run.
//!
//! # Example YAML Format
//!
//! ```yaml
//! key: order_process
//! initial: start
//! activities:
//!   - id: start
//!   - id: review
//!     scope: true
//!     behavior:
//!       type: wait_state
//!   - id: ship
//!     async_before: true
//!     job_priority: 10
//!   - id: done
//!     behavior:
//!       type: end
//! transitions:
//!   - id: t1
//!     source: start
//!     target: review
//!   - id: t2
//!     source: review
//!     target: ship
//!   - id: t3
//!     source: ship
//!     target: done
//! ```

use serde::{Deserialize, Serialize};

/// Priority assigned to jobs when neither the activity nor the definition
/// names one.
pub const DEFAULT_JOB_PRIORITY: i32 = 0;

/// Longest timer delay a definition may declare (100 years).
pub const MAX_TIMER_DELAY_SECS: i64 = 100 * 365 * 24 * 60 * 60;

/// What an activity does once an execution arrives at it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityBehavior {
    /// Leave immediately over every outgoing transition.
    /// An activity without outgoing transitions ends the execution.
    #[default]
    PassThrough,
    /// Stop until the execution is signalled.
    WaitState,
    /// Stop until a timer job fires `due_in_secs` after arrival.
    Timer { due_in_secs: i64 },
    /// End the execution.
    End,
}

/// A node of the process graph.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Activity {
    /// Unique identifier within the definition
    pub id: String,

    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Whether the activity opens a nested scope (sub-process, scoped task)
    #[serde(default)]
    pub scope: bool,

    /// Whether execution suspends into a job before the activity runs
    #[serde(default)]
    pub async_before: bool,

    #[serde(default)]
    pub behavior: ActivityBehavior,

    /// Priority of jobs created for this activity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_priority: Option<i32>,

    /// IDs of outgoing transitions in declaration order (auto-populated)
    #[serde(default)]
    pub outgoing: Vec<String>,
}

impl Activity {
    /// Creates a pass-through, non-scope activity.
    ///
    /// # Example
    ///
    /// ```
    /// use procvm::process::{Activity, ActivityBehavior};
    ///
    /// let review = Activity::new("review")
    ///     .scope()
    ///     .with_behavior(ActivityBehavior::WaitState);
    /// assert!(review.scope);
    /// ```
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into().trim().to_string(),
            name: None,
            scope: false,
            async_before: false,
            behavior: ActivityBehavior::PassThrough,
            job_priority: None,
            outgoing: Vec::new(),
        }
    }

    /// Marks the activity as a scope.
    pub fn scope(mut self) -> Self {
        self.scope = true;
        self
    }

    /// Marks the activity as an asynchronous continuation point.
    pub fn async_before(mut self) -> Self {
        self.async_before = true;
        self
    }

    pub fn with_behavior(mut self, behavior: ActivityBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_job_priority(mut self, priority: i32) -> Self {
        self.job_priority = Some(priority);
        self
    }
}

/// A directed edge between two activities.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub id: String,
    pub source: String,
    pub target: String,
}

impl Transition {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into().trim().to_string(),
            source: source.into().trim().to_string(),
            target: target.into().trim().to_string(),
        }
    }
}

/// A complete process graph.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProcessDefinition {
    /// Key the definition is deployed under
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Activity a new instance starts at
    pub initial: String,

    #[serde(default)]
    pub activities: Vec<Activity>,

    #[serde(default)]
    pub transitions: Vec<Transition>,

    /// Job priority used when an activity does not set one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_priority: Option<i32>,
}

impl ProcessDefinition {
    /// Creates an empty definition starting at `initial`.
    pub fn new(key: impl Into<String>, initial: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            initial: initial.into(),
            activities: Vec::new(),
            transitions: Vec::new(),
            job_priority: None,
        }
    }

    /// Adds an activity, rejecting duplicate ids.
    pub fn add_activity(&mut self, activity: Activity) -> Result<(), String> {
        if self.activities.iter().any(|a| a.id == activity.id) {
            return Err(format!("Activity '{}' already exists", activity.id));
        }
        self.activities.push(activity);
        self.refresh_outgoing();
        Ok(())
    }

    /// Adds a transition, rejecting duplicate ids.
    pub fn add_transition(&mut self, transition: Transition) -> Result<(), String> {
        if self.transitions.iter().any(|t| t.id == transition.id) {
            return Err(format!("Transition '{}' already exists", transition.id));
        }
        self.transitions.push(transition);
        self.refresh_outgoing();
        Ok(())
    }

    /// Builder form of [`add_activity`](Self::add_activity). Duplicates are
    /// kept and reported later by the validator.
    pub fn with_activity(mut self, activity: Activity) -> Self {
        self.activities.push(activity);
        self.refresh_outgoing();
        self
    }

    /// Builder form of [`add_transition`](Self::add_transition).
    pub fn with_transition(
        mut self,
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.transitions.push(Transition::new(id, source, target));
        self.refresh_outgoing();
        self
    }

    pub fn with_job_priority(mut self, priority: i32) -> Self {
        self.job_priority = Some(priority);
        self
    }

    /// Gets an activity by ID.
    pub fn get_activity(&self, id: &str) -> Option<&Activity> {
        self.activities.iter().find(|a| a.id == id)
    }

    /// Gets a transition by ID.
    pub fn get_transition(&self, id: &str) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.id == id)
    }

    /// Returns the outgoing transition IDs of an activity in declaration order.
    pub fn outgoing(&self, activity_id: &str) -> &[String] {
        self.get_activity(activity_id)
            .map(|a| a.outgoing.as_slice())
            .unwrap_or(&[])
    }

    /// Returns true if the activity exists and is scope-marked.
    pub fn is_scope(&self, activity_id: &str) -> bool {
        self.get_activity(activity_id).is_some_and(|a| a.scope)
    }

    /// Priority for jobs created at `activity_id`.
    pub fn job_priority_for(&self, activity_id: &str) -> i32 {
        self.get_activity(activity_id)
            .and_then(|a| a.job_priority)
            .or(self.job_priority)
            .unwrap_or(DEFAULT_JOB_PRIORITY)
    }

    /// Rebuilds each activity's outgoing list from the transition list.
    pub fn refresh_outgoing(&mut self) {
        for activity in &mut self.activities {
            activity.outgoing = self
                .transitions
                .iter()
                .filter(|t| t.source == activity.id)
                .map(|t| t.id.clone())
                .collect();
        }
    }

    /// Returns the number of activities.
    pub fn len(&self) -> usize {
        self.activities.len()
    }

    /// Returns true if the definition has no activities.
    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }
}
