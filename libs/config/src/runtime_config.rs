//! Runtime configuration loading
//!
//! Reads an optional TOML file and applies `SPINDLE_`-prefixed environment
//! overrides on top. Nested keys use a double underscore, for example
//! `SPINDLE_DEFAULT_WORKER__STACK_SIZE`.

use crate::defaults;
use crate::worker::WorkerOptions;
use anyhow::{Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Process-wide runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Log filter directive for the tracing subscriber
    pub log_level: String,
    /// Options used by spawns that do not pass their own
    pub default_worker: WorkerOptions,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_level: defaults::runtime::LOG_LEVEL.to_string(),
            default_worker: WorkerOptions::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration with environment overrides
    ///
    /// A missing file is not an error; every field has a default.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_from(path, Self::environment())
    }

    fn environment() -> Environment {
        Environment::with_prefix(defaults::runtime::ENV_PREFIX)
            .prefix_separator("_")
            .separator(defaults::runtime::ENV_SEPARATOR)
            .try_parsing(true)
    }

    fn load_from(path: Option<&Path>, environment: Environment) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading runtime config: {:?}", path);
            builder = builder.add_source(File::from(path).required(false));
        }
        builder = builder.add_source(environment);

        let config = builder
            .build()
            .context("Failed to build runtime configuration")?;
        let runtime: RuntimeConfig = config
            .try_deserialize()
            .context("Failed to deserialize runtime configuration")?;

        debug!(
            log_level = %runtime.log_level,
            stack_size = runtime.default_worker.stack_size,
            "Runtime configuration loaded"
        );
        Ok(runtime)
    }
}

/// Convenience function to load configuration from the default location
pub fn load_config() -> Result<RuntimeConfig> {
    RuntimeConfig::load(Some(Path::new("config/spindle.toml")))
}
