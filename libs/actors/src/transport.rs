//! Worker launch seam
//!
//! A [`Launcher`] turns a boot payload into a running execution unit. The
//! default [`ThreadLauncher`] starts one OS thread per worker, each running
//! its own single-threaded Tokio runtime.

use crate::error::{Result, SpindleError};
use crate::protocol::WorkerMessage;
use crate::registry::Registry;
use crate::runtime;
use spindle_codec::Port;
use spindle_config::WorkerOptions;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Role of the execution unit being started
pub enum Boot {
    /// The host process: run the main blueprint with these arguments
    Main { args: Vec<String> },
    /// A spawned worker: construct the blueprint named in `construct` and
    /// serve requests arriving on `port`
    Worker {
        construct: WorkerMessage,
        port: Port,
        registry: Arc<Registry>,
    },
}

impl fmt::Debug for Boot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Boot::Main { args } => f.debug_struct("Main").field("args", args).finish(),
            Boot::Worker { port, .. } => f.debug_struct("Worker").field("port", &port.id()).finish(),
        }
    }
}

/// Everything a launcher needs to start one worker
#[derive(Debug)]
pub struct LaunchRequest {
    pub name: String,
    pub options: WorkerOptions,
    pub boot: Boot,
}

/// A launched execution unit
#[derive(Debug)]
pub struct WorkerThread {
    join: Option<JoinHandle<()>>,
    joined: bool,
}

impl WorkerThread {
    pub fn new(join: JoinHandle<()>) -> Self {
        Self {
            join: Some(join),
            joined: false,
        }
    }

    /// A unit whose lifetime is not tracked by the launcher
    pub fn detached() -> Self {
        Self {
            join: None,
            joined: false,
        }
    }

    /// True once the thread has exited; always false for detached units
    pub fn is_finished(&self) -> bool {
        self.joined || self.join.as_ref().map_or(false, JoinHandle::is_finished)
    }

    /// Block until the thread exits
    pub fn join(&mut self) {
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("Worker thread panicked outside the request loop");
            }
            self.joined = true;
        }
    }
}

/// Starts execution units
pub trait Launcher: Send + Sync + fmt::Debug {
    fn launch(&self, request: LaunchRequest) -> Result<WorkerThread>;
}

/// One OS thread per worker
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadLauncher;

impl Launcher for ThreadLauncher {
    fn launch(&self, request: LaunchRequest) -> Result<WorkerThread> {
        let LaunchRequest {
            name,
            options,
            boot,
        } = request;

        let limits = options.resource_limits;
        if limits.is_unbounded() {
            debug!(thread = %name, stack_size = options.stack_size, "Launching worker thread");
        } else {
            // Threads share the process allocator; limits are recorded only.
            info!(
                thread = %name,
                stack_size = options.stack_size,
                max_old_generation_size_mb = ?limits.max_old_generation_size_mb,
                max_young_generation_size_mb = ?limits.max_young_generation_size_mb,
                code_range_size_mb = ?limits.code_range_size_mb,
                "Launching worker thread with advisory resource limits"
            );
        }

        let thread_name = name.clone();
        let join = thread::Builder::new()
            .name(name.clone())
            .stack_size(options.stack_size)
            .spawn(move || match runtime::start(boot) {
                Ok(code) => debug!(thread = %thread_name, code, "Worker thread exited"),
                Err(err) => error!(
                    thread = %thread_name,
                    error = %err,
                    error_category = err.category(),
                    "Worker thread failed"
                ),
            })
            .map_err(|source| SpindleError::Launch { name, source })?;

        Ok(WorkerThread::new(join))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_thread_is_never_finished() {
        let mut thread = WorkerThread::detached();
        assert!(!thread.is_finished());
        thread.join();
    }

    #[test]
    fn test_join_tracks_exit() {
        let mut thread = WorkerThread::new(thread::spawn(|| {}));
        thread.join();
        assert!(thread.is_finished());
    }
}
