//! Worker threads with transparent remote calls
//!
//! Spawn blueprint instances on their own OS threads, call their methods
//! asynchronously, stream values between them over acknowledged channels
//! and coordinate through a shared-memory mutex.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   port    ┌──────────────────────┐
//! │  host thread         │           │  worker thread       │
//! │                      │ construct │                      │
//! │  WorkerHandle ───────┼──────────▶│  runtime::start      │
//! │   ordinal → awaiter  │  execute  │   LocalSet           │
//! │                      │──────────▶│   Blueprint::invoke  │
//! │                      │◀──────────│                      │
//! │                      │   result  │                      │
//! └──────────────────────┘           └──────────────────────┘
//!          values cross as Encoded, tagged by MarshalKey
//! ```
//!
//! # Startup
//!
//! Register every marshalled type and blueprint on a [`RegistryBuilder`]
//! and install it before the first spawn:
//!
//! ```ignore
//! let mut builder = Registry::builder();
//! builder.marshal::<Point>()?.worker::<Adder>()?.main::<App>()?;
//! builder.install()?;
//! std::process::exit(spindle::run_main(std::env::args().collect())?);
//! ```

pub mod blueprint;
pub mod channel;
pub mod error;
pub mod handle;
pub mod mutex;
pub mod protocol;
pub mod registry;
pub mod runtime;
pub mod transport;

pub use blueprint::{Args, Blueprint, Fault, Main};
pub use channel::{channel, channel_in, select, Delivery, Queue, Receiver, Sender};
pub use error::{Result, SpindleError};
pub use handle::{HandleState, WorkerHandle, WorkerId};
pub use mutex::{Mutex, MutexLock};
pub use registry::{Registry, RegistryBuilder, RegistryScope, ThreadKey};
pub use runtime::run_main;
pub use transport::{Boot, LaunchRequest, Launcher, ThreadLauncher, WorkerThread};

pub use spindle_codec::{Fields, FromValue, Marshal, MarshalObject, Value};
pub use spindle_config::{ResourceLimits, WorkerOptions};

/// Async trait support for blueprint implementations
pub use async_trait::async_trait;
