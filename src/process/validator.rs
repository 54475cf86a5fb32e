//! Process Definition Validation
//!
//! Structural checks run before a definition is deployed:
//! - Activity and transition field validation
//! - Reference integrity (initial activity, transition endpoints)
//! - Reachability from the initial activity (warning only)

use std::collections::{HashSet, VecDeque};

use log::{debug, info, warn};

use super::model::{Activity, ActivityBehavior, ProcessDefinition, MAX_TIMER_DELAY_SECS};

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyDefinition,
    EmptyActivityId,
    EmptyTransitionId,
    DuplicateActivityId(String),
    DuplicateTransitionId(String),
    UnknownInitial(String),
    InvalidReference { transition: String, activity: String },
    NegativeTimer(String),
    TimerTooLong(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyDefinition => write!(f, "Process definition has no activities"),
            Self::EmptyActivityId => write!(f, "Activity has empty or whitespace-only ID"),
            Self::EmptyTransitionId => write!(f, "Transition has empty or whitespace-only ID"),
            Self::DuplicateActivityId(id) => write!(f, "Duplicate activity ID: '{}'", id),
            Self::DuplicateTransitionId(id) => write!(f, "Duplicate transition ID: '{}'", id),
            Self::UnknownInitial(id) => write!(f, "Initial activity '{}' does not exist", id),
            Self::InvalidReference {
                transition,
                activity,
            } => {
                write!(
                    f,
                    "Transition '{}' references unknown activity '{}'",
                    transition, activity
                )
            }
            Self::NegativeTimer(id) => {
                write!(f, "Activity '{}' has a timer with a negative delay", id)
            }
            Self::TimerTooLong(id) => write!(
                f,
                "Activity '{}' has a timer delay above {} seconds",
                id, MAX_TIMER_DELAY_SECS
            ),
        }
    }
}

/// Validates a single activity's fields.
fn validate_activity(activity: &Activity) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if activity.id.trim().is_empty() {
        errors.push(ValidationError::EmptyActivityId);
        return errors;
    }

    if let ActivityBehavior::Timer { due_in_secs } = activity.behavior {
        if due_in_secs < 0 {
            errors.push(ValidationError::NegativeTimer(activity.id.clone()));
        } else if due_in_secs > MAX_TIMER_DELAY_SECS {
            errors.push(ValidationError::TimerTooLong(activity.id.clone()));
        }
    }

    if activity.outgoing.is_empty() {
        match activity.behavior {
            ActivityBehavior::PassThrough | ActivityBehavior::End => {
                debug!("Activity '{}' is an end activity", activity.id);
            }
            _ => warn!(
                "Activity '{}' waits but has no outgoing transitions; signalling it will fail",
                activity.id
            ),
        }
    }

    errors
}

/// Validates the entire definition.
///
/// Performs the following checks:
/// 1. Definition is not empty
/// 2. No duplicate activity or transition IDs
/// 3. All activities have valid fields
/// 4. The initial activity exists
/// 5. All transitions point at existing activities
///
/// Outgoing lists are rebuilt first so hand-edited YAML cannot disagree with
/// the transition list.
pub fn validate_definition(definition: &mut ProcessDefinition) -> Result<(), String> {
    info!(
        "Validating process '{}' with {} activities",
        definition.key,
        definition.activities.len()
    );

    if definition.activities.is_empty() {
        return Err(ValidationError::EmptyDefinition.to_string());
    }

    definition.refresh_outgoing();

    let mut activity_ids: HashSet<String> = HashSet::new();
    for activity in &definition.activities {
        if !activity_ids.insert(activity.id.clone()) {
            return Err(ValidationError::DuplicateActivityId(activity.id.clone()).to_string());
        }
    }

    let mut transition_ids: HashSet<String> = HashSet::new();
    for transition in &definition.transitions {
        if !transition_ids.insert(transition.id.clone()) {
            return Err(
                ValidationError::DuplicateTransitionId(transition.id.clone()).to_string(),
            );
        }
    }

    let mut all_errors = Vec::new();
    for activity in &definition.activities {
        all_errors.extend(validate_activity(activity));
    }

    if !activity_ids.contains(&definition.initial) {
        all_errors.push(ValidationError::UnknownInitial(definition.initial.clone()));
    }

    for transition in &definition.transitions {
        if transition.id.trim().is_empty() {
            all_errors.push(ValidationError::EmptyTransitionId);
        }
        for endpoint in [&transition.source, &transition.target] {
            if !activity_ids.contains(endpoint) {
                all_errors.push(ValidationError::InvalidReference {
                    transition: transition.id.clone(),
                    activity: endpoint.clone(),
                });
            }
        }
    }

    if !all_errors.is_empty() {
        let error_messages: Vec<String> = all_errors.iter().map(|e| e.to_string()).collect();
        return Err(error_messages.join("\n"));
    }

    for id in unreachable_activities(definition) {
        warn!("Activity '{}' is not reachable from '{}'", id, definition.initial);
    }

    info!(
        "Process '{}' validated: {} activities, {} transitions",
        definition.key,
        definition.activities.len(),
        definition.transitions.len()
    );
    Ok(())
}

/// Breadth-first walk from the initial activity; returns activities never
/// reached, in declaration order.
pub fn unreachable_activities(definition: &ProcessDefinition) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();

    if definition.get_activity(&definition.initial).is_some() {
        queue.push_back(definition.initial.as_str());
    }

    while let Some(current) = queue.pop_front() {
        if !seen.insert(current) {
            continue;
        }
        for transition_id in definition.outgoing(current) {
            if let Some(transition) = definition.get_transition(transition_id) {
                queue.push_back(transition.target.as_str());
            }
        }
    }

    definition
        .activities
        .iter()
        .filter(|a| !seen.contains(a.id.as_str()))
        .map(|a| a.id.clone())
        .collect()
}

/// Quick validation that returns a list of error messages without
/// modifying the definition. Used by the CLI `--check` mode.
pub fn quick_validate(definition: &ProcessDefinition) -> Vec<String> {
    let mut definition = definition.clone();
    match validate_definition(&mut definition) {
        Ok(()) => Vec::new(),
        Err(e) => e.lines().map(str::to_string).collect(),
    }
}
