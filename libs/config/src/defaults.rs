//! Default values shared by worker options and runtime configuration

/// Worker defaults
pub mod worker {
    /// Stack size for worker threads (bytes)
    pub const STACK_SIZE: usize = 2 * 1024 * 1024;

    /// Prefix of generated worker thread names
    pub const THREAD_NAME_PREFIX: &str = "spindle-worker";
}

/// Runtime defaults
pub mod runtime {
    /// Log filter used when neither the config file nor `RUST_LOG` set one
    pub const LOG_LEVEL: &str = "info";

    /// Prefix of environment variable overrides (`SPINDLE_LOG_LEVEL`, ...)
    pub const ENV_PREFIX: &str = "SPINDLE";

    /// Separator for nested keys in environment overrides
    pub const ENV_SEPARATOR: &str = "__";
}
