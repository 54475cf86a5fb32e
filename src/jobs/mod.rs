//! Jobs Module
//!
//! Deferred work: async continuations and timers created by the engine,
//! and the machinery that picks them up again.
//!
//! - [`model`]: Job records
//! - [`acquisition`]: Ordering policy and batch acquisition
//! - [`store`]: Storage seam and the in-memory store
//! - [`executor`]: Acquisition cycles over worker threads

pub mod acquisition;
pub mod executor;
pub mod model;
pub mod store;

pub use acquisition::{
    acquire_jobs, AcquisitionConfig, AcquisitionInputError, JobAcquisition, MAX_LOCK_TIME_SECS,
};
pub use executor::{CycleReport, JobExecutor};
pub use model::{Job, JobId, JobKind};
pub use store::{InMemoryJobStore, JobStore, StoreError};
