//! Monitoring Module
//!
//! Diagnostics for process instances.
//!
//! # Components
//!
//! - [`ExecutionTimeline`]: log of the atomic operations an engine ran

pub mod timeline;

pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
