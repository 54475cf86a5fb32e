//! Process Execution Module
//!
//! Interprets a process graph as a tree of executions, one atomic operation
//! at a time.
//!
//! # Architecture
//!
//! - [`tree`]: Execution records and the tree mutations
//! - [`operation`]: Atomic operation descriptors
//! - [`transition`]: Scope destruction and fan-out over outgoing transitions
//! - [`engine`]: Trampoline driving one process instance
//! - [`snapshot`]: Saving and restoring an instance
//! - [`error`]: Engine errors

pub mod engine;
pub mod error;
pub mod operation;
pub mod snapshot;
pub mod transition;
pub mod tree;

pub use engine::Engine;
pub use error::{EngineError, GraphIntegrityError};
pub use operation::{AtomicOperation, PendingOperation};
pub use snapshot::InstanceSnapshot;
pub use transition::{destroy_concurrent_scope, destroy_scope_and_fan_out, OutgoingExecution};
pub use tree::{Execution, ExecutionId, ExecutionTree};
