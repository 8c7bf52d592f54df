use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Scheduler configuration, typically parsed from TOML.
///
/// Every field can be overridden from the environment
/// (`DUETIME_WORKER_POOL_SIZE`, `DUETIME_TICK_INTERVAL_MILLIS`,
/// `DUETIME_SHUTDOWN_GRACE_MILLIS`, `DUETIME_RESULT_HISTORY`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of concurrent executors.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// Dispatcher polling period.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_millis: u64,
    /// How long `stop()` waits for in-flight work.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_millis: u64,
    /// Number of recent task results kept for inspection.
    #[serde(default = "default_result_history")]
    pub result_history: usize,
}

fn default_worker_pool_size() -> usize { 4 }
fn default_tick_interval() -> u64 { 1000 }
fn default_shutdown_grace() -> u64 { 5000 }
fn default_result_history() -> usize { 256 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            tick_interval_millis: default_tick_interval(),
            shutdown_grace_millis: default_shutdown_grace(),
            result_history: default_result_history(),
        }
    }
}

impl SchedulerConfig {
    /// Parse from a TOML string, apply env overrides, validate.
    ///
    /// The table may be at the top level or under `[scheduler]`.
    pub fn from_toml(toml_str: &str) -> Result<Self, SchedulerError> {
        #[derive(Deserialize)]
        struct Wrapped {
            scheduler: SchedulerConfig,
        }

        let table: toml::Table = toml::from_str(toml_str)?;
        let mut config = if table.contains_key("scheduler") {
            toml::from_str::<Wrapped>(toml_str)?.scheduler
        } else {
            toml::from_str::<SchedulerConfig>(toml_str)?
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, SchedulerError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<usize>("DUETIME_WORKER_POOL_SIZE") {
            self.worker_pool_size = v;
        }
        if let Some(v) = env_parse::<u64>("DUETIME_TICK_INTERVAL_MILLIS") {
            self.tick_interval_millis = v;
        }
        if let Some(v) = env_parse::<u64>("DUETIME_SHUTDOWN_GRACE_MILLIS") {
            self.shutdown_grace_millis = v;
        }
        if let Some(v) = env_parse::<usize>("DUETIME_RESULT_HISTORY") {
            self.result_history = v;
        }
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.worker_pool_size == 0 {
            return Err(SchedulerError::Config("worker_pool_size must be > 0".into()));
        }
        if self.tick_interval_millis == 0 {
            return Err(SchedulerError::Config("tick_interval_millis must be > 0".into()));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_millis)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_millis)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable config override");
            None
        }
    }
}
