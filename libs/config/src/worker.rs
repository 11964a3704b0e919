//! Per-spawn worker options

use crate::defaults;
use serde::{Deserialize, Serialize};

/// Heap caps recognized at spawn time
///
/// Names follow the resource-limit options of the host platform. Threads
/// share one allocator, so launchers treat these as advisory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Maximum size of the main heap (MB)
    pub max_old_generation_size_mb: Option<u64>,
    /// Maximum size of the heap space for recently created objects (MB)
    pub max_young_generation_size_mb: Option<u64>,
    /// Size of the region reserved for generated code (MB)
    pub code_range_size_mb: Option<u64>,
}

impl ResourceLimits {
    pub fn is_unbounded(&self) -> bool {
        self.max_old_generation_size_mb.is_none()
            && self.max_young_generation_size_mb.is_none()
            && self.code_range_size_mb.is_none()
    }
}

/// Options applied when launching one worker
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerOptions {
    /// Thread name; generated from the blueprint when absent
    pub name: Option<String>,
    pub resource_limits: ResourceLimits,
    /// Stack size of the worker thread (bytes)
    pub stack_size: usize,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            name: None,
            resource_limits: ResourceLimits::default(),
            stack_size: defaults::worker::STACK_SIZE,
        }
    }
}

impl WorkerOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = limits;
        self
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// Thread name for a worker of `blueprint`, preferring the explicit name
    pub fn thread_name(&self, blueprint: &str) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => {
                let short = blueprint.rsplit("::").next().unwrap_or(blueprint);
                format!("{}-{}", defaults::worker::THREAD_NAME_PREFIX, short)
            }
        }
    }
}
