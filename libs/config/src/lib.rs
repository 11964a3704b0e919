//! # Spindle Configuration
//!
//! Spawn options and runtime settings for spindle workers.
//!
//! ## Usage
//!
//! ```rust
//! use spindle_config::{ResourceLimits, WorkerOptions};
//!
//! let options = WorkerOptions::named("resizer").with_resource_limits(ResourceLimits {
//!     max_old_generation_size_mb: Some(256),
//!     ..ResourceLimits::default()
//! });
//! assert_eq!(options.thread_name("Resizer"), "resizer");
//! ```

pub mod defaults;
pub mod runtime_config;
pub mod worker;

pub use runtime_config::{load_config, RuntimeConfig};
pub use worker::{ResourceLimits, WorkerOptions};
