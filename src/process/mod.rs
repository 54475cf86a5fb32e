//! Process Graph Module
//!
//! The read-only graph every execution walks: activities, their scope and
//! async flags, and the transitions between them.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (Activity, Transition, ProcessDefinition)
//! - [`parser`]: YAML loading and saving
//! - [`validator`]: Structural checks

pub mod model;
pub mod parser;
pub mod validator;

pub use model::{
    Activity, ActivityBehavior, ProcessDefinition, Transition, DEFAULT_JOB_PRIORITY,
    MAX_TIMER_DELAY_SECS,
};
pub use parser::{load_process, parse_process, save_process};
pub use validator::{quick_validate, validate_definition, ValidationError};
