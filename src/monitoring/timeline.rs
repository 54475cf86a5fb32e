//! Execution Timeline
//!
//! Records every atomic operation an engine performs, for tracing a
//! process instance after the fact and for the CLI operation report.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::execution::operation::AtomicOperation;
use crate::execution::tree::ExecutionId;

/// What happened to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Operation ran inline
    Executed,
    /// Operation was deferred to a job
    Suspended,
    /// Operation raised an error
    Failed,
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub operation: AtomicOperation,
    pub execution: ExecutionId,
    /// Activity the execution was at when the operation ran
    pub activity: Option<String>,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// Ordered log of the operations of one process instance.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

impl ExecutionTimeline {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn add_event(
        &mut self,
        operation: AtomicOperation,
        execution: ExecutionId,
        activity: Option<String>,
        event_type: EventType,
    ) {
        self.events.push(TimelineEvent {
            operation,
            execution,
            activity,
            event_type,
            timestamp: Instant::now(),
        });
    }

    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Events recorded for one execution, in order.
    pub fn events_for(&self, execution: ExecutionId) -> Vec<&TimelineEvent> {
        self.events
            .iter()
            .filter(|e| e.execution == execution)
            .collect()
    }

    /// How often each operation ran inline, keyed by canonical name.
    pub fn operation_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for event in &self.events {
            if event.event_type == EventType::Executed {
                *counts.entry(event.operation.canonical_name()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// One line per event: offset, execution, operation, activity.
    pub fn trace(&self) -> String {
        let mut output = String::new();
        for event in &self.events {
            let offset = event.timestamp.duration_since(self.start_time).as_micros();
            let marker = match event.event_type {
                EventType::Executed => "",
                EventType::Suspended => " (suspended)",
                EventType::Failed => " (failed)",
            };
            output.push_str(&format!(
                "{:>8}us {:<14} {:<32} {}{}\n",
                offset,
                event.execution.to_string(),
                event.operation.canonical_name(),
                event.activity.as_deref().unwrap_or("-"),
                marker
            ));
        }
        output
    }

    /// Bar chart of operation counts, scaled to 40 characters.
    pub fn summary_chart(&self) -> String {
        let mut output = String::from("\nOperation Summary:\n\n");
        let counts = self.operation_counts();
        let Some(max) = counts.values().copied().max() else {
            return output;
        };

        let scale = 40.0 / max as f64;
        for (name, count) in &counts {
            let width = ((*count as f64 * scale) as usize).max(1);
            output.push_str(&format!(
                "{} |{}| {}\n",
                truncate(name, 24),
                "#".repeat(width),
                count
            ));
        }

        let suspended = self
            .events
            .iter()
            .filter(|e| e.event_type == EventType::Suspended)
            .count();
        output.push_str(&format!(
            "\nTotal: {} operation(s), {} suspended, {} us\n",
            self.events.len(),
            suspended,
            self.elapsed().as_micros()
        ));
        output
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        format!("{}...", &s[..max_len - 3])
    }
}
