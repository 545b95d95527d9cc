use serde::{Deserialize, Serialize};

/// Runtime settings for the process-wide pieces: worker pool and logging.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EventsailConfig {
    #[serde(default)]
    pub worker_pool: WorkerPoolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EventsailConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_pool.size == 0 {
            return Err("worker_pool.size must be > 0".into());
        }
        if self.worker_pool.thread_name.trim().is_empty() {
            return Err("worker_pool.thread_name must not be empty".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerPoolConfig {
    /// Cap on concurrent blocking listener calls, and separately the number
    /// of async worker threads. Defaults to the number of available CPUs.
    #[serde(default = "default_pool_size")]
    pub size: usize,
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

fn default_pool_size() -> usize {
    num_cpus::get().max(1)
}
fn default_thread_name() -> String {
    "eventsail-worker".into()
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            thread_name: default_thread_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::EventsailConfig;
    use crate::error::{EmitterError, Result};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// File read when no explicit path is given.
    pub const DEFAULT_CONFIG_FILE: &str = "eventsail.toml";

    /// Load settings from a TOML file, then apply environment overrides.
    ///
    /// A missing file is not an error; defaults apply. Overrides use the
    /// `EVENTSAIL__<SECTION>__<KEY>` form, e.g. `EVENTSAIL__WORKER_POOL__SIZE=4`.
    pub fn load_config(path: Option<&str>) -> Result<EventsailConfig> {
        let mut builder = Config::builder();
        let file = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if file.exists() {
            builder = builder.add_source(File::from(file));
        }
        builder = builder.add_source(
            Environment::with_prefix("EVENTSAIL")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| EmitterError::configuration(format!("config build error: {e}")))?;
        let merged: EventsailConfig = cfg
            .try_deserialize()
            .map_err(|e| EmitterError::configuration(format!("config deserialize error: {e}")))?;
        merged.validate().map_err(EmitterError::configuration)?;
        Ok(merged)
    }
}
