//! Engine Configuration
//!
//! Loaded from YAML. Every field has a default, so an empty file (or no
//! file at all) yields a working configuration.
//!
//! ```yaml
//! acquisition:
//!   prefer_timer_jobs: true
//!   produce_prioritized_jobs: true
//!   max_jobs_per_acquisition: 5
//!   lock_owner: node-a
//! default_job_priority: 0
//! default_retries: 3
//! snapshot_dir: .procvm
//! ```

use std::error::Error;
use std::fs;

use log::info;
use serde::{Deserialize, Serialize};

use crate::jobs::acquisition::{AcquisitionConfig, MAX_LOCK_TIME_SECS};
use crate::jobs::model::DEFAULT_RETRIES;
use crate::process::DEFAULT_JOB_PRIORITY;

/// Directory instance snapshots are written to by default.
pub const DEFAULT_SNAPSHOT_DIR: &str = ".procvm";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub acquisition: AcquisitionConfig,
    /// Priority of prioritized jobs when neither activity nor definition
    /// sets one
    pub default_job_priority: i32,
    pub default_retries: u32,
    pub snapshot_dir: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            acquisition: AcquisitionConfig::default(),
            default_job_priority: DEFAULT_JOB_PRIORITY,
            default_retries: DEFAULT_RETRIES,
            snapshot_dir: DEFAULT_SNAPSHOT_DIR.to_string(),
        }
    }
}

impl EngineConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: &str) -> Result<Self, Box<dyn Error>> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path, e))?;
        let config = Self::from_yaml(&content)?;
        info!("Loaded engine configuration from {}", path);
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, Box<dyn Error>> {
        let config: EngineConfig = if content.trim().is_empty() {
            EngineConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| format!("Invalid configuration: {}", e))?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.acquisition.max_jobs_per_acquisition == 0 {
            return Err("max_jobs_per_acquisition must be at least 1".to_string());
        }
        if self.acquisition.lock_time_secs <= 0 {
            return Err("lock_time_secs must be positive".to_string());
        }
        if self.acquisition.lock_time_secs > MAX_LOCK_TIME_SECS {
            return Err(format!(
                "lock_time_secs must not exceed {}",
                MAX_LOCK_TIME_SECS
            ));
        }
        if self.acquisition.lock_owner.trim().is_empty() {
            return Err("lock_owner must not be empty".to_string());
        }
        if self.default_retries == 0 {
            return Err("default_retries must be at least 1".to_string());
        }
        Ok(())
    }
}
