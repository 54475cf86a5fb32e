//! procvm - Process Virtual Machine
//!
//! Executes process graphs (activities joined by transitions) as a tree of
//! executions driven by atomic operations, and schedules the deferred work
//! (async continuations, timers) those executions create.
//!
//! # Architecture
//!
//! - [`process`]: Process graph model, YAML parsing and validation
//! - [`execution`]: Execution tree, atomic operations and the engine
//! - [`jobs`]: Job records, acquisition ordering, store and executor
//! - [`deployment`]: Deployment steps and post-deploy hooks
//! - [`monitoring`]: Operation timeline
//! - [`config`]: Engine configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use procvm::execution::Engine;
//! use procvm::jobs::{InMemoryJobStore, JobExecutor};
//! use procvm::{load_process, EngineConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::load("procvm.yaml")?;
//!     let definition = load_process("order.yaml")?;
//!
//!     let mut engine = Engine::new(definition);
//!     engine.set_config(config.clone());
//!     engine.start()?;
//!
//!     // Run async continuations and due timers
//!     let mut executor = JobExecutor::new(config.acquisition);
//!     executor.register(engine);
//!     let mut store = InMemoryJobStore::new();
//!     executor.run_until_idle(&mut store, chrono::Utc::now(), 100)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod deployment;
pub mod execution;
pub mod jobs;
pub mod monitoring;
pub mod process;

pub use config::EngineConfig;
pub use execution::engine::Engine;
pub use process::model::{Activity, ProcessDefinition};
pub use process::parser::load_process;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "procvm";
