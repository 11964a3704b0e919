//! Worker runtime: the server side of the lifecycle protocol
//!
//! Each execution unit runs a current-thread Tokio runtime inside a
//! `LocalSet`, the Rust shape of a single-threaded cooperative event loop.
//! Requests are dispatched one task per message, so a slow method does not
//! hold up later requests. A user method can fail or panic without taking
//! the worker down; only `terminate` ends the loop.

use crate::blueprint::{Args, Blueprint};
use crate::error::{Result, SpindleError};
use crate::protocol::{self, Command, Ordinal, WorkerMessage};
use crate::registry::Registry;
use crate::transport::Boot;
use futures::FutureExt;
use spindle_codec::{Port, PortWriter, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{self, LocalSet};
use tracing::{debug, error, info, trace, warn};

/// Run an execution unit to completion, returning its exit code
pub fn start(boot: Boot) -> Result<i32> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|source| SpindleError::Launch {
            name: "runtime".to_string(),
            source,
        })?;
    let local = LocalSet::new();

    match boot {
        Boot::Main { args } => local.block_on(&runtime, run_main_blueprint(args)),
        Boot::Worker {
            construct,
            port,
            registry,
        } => {
            // Endpoints and nested spawns on this thread resolve types here.
            let _scope = Registry::enter(Arc::clone(&registry));
            local
                .block_on(&runtime, serve(construct, port, registry))
                .map(|()| 0)
        }
    }
}

/// Host entry point: run the registered main blueprint
///
/// Call from a plain `fn main` after installing the registry.
pub fn run_main(args: Vec<String>) -> Result<i32> {
    start(Boot::Main { args })
}

async fn run_main_blueprint(args: Vec<String>) -> Result<i32> {
    let registry = Registry::current();
    let entry = registry
        .main_blueprint()
        .ok_or_else(|| SpindleError::invalid_state("no main blueprint is registered"))?;

    info!(blueprint = entry.name, args = args.len(), "Starting main blueprint");
    let instance = (entry.create)();
    let code = instance.main(args).await?;
    info!(blueprint = entry.name, code, "Main blueprint finished");
    Ok(code)
}

/// Posts replies back to the host
struct Replier {
    writer: PortWriter,
    registry: Arc<Registry>,
}

impl Replier {
    fn reply(&self, command: Command) {
        let ordinal = command_ordinal(&command);
        let message = match protocol::encode(command, self.registry.marshal()) {
            Ok((message, _)) => message,
            Err(err) => {
                warn!(ordinal, error = %err, "Reply could not be encoded, sending error instead");
                WorkerMessage::Error {
                    ordinal,
                    error: protocol::Field::Default(Value::String(err.to_string())),
                }
            }
        };
        if let Err(err) = self.writer.post(message) {
            debug!(ordinal, error = %err, "Host is gone, dropping reply");
        }
    }
}

fn command_ordinal(command: &Command) -> Ordinal {
    match command {
        Command::Construct { ordinal, .. }
        | Command::Execute { ordinal, .. }
        | Command::Result { ordinal, .. }
        | Command::Error { ordinal, .. }
        | Command::Dispose { ordinal }
        | Command::Disposed { ordinal } => *ordinal,
        Command::Terminate => 0,
    }
}

async fn serve(construct: WorkerMessage, port: Port, registry: Arc<Registry>) -> Result<()> {
    let (thread_key, args) = match protocol::decode(construct, registry.marshal())? {
        Command::Construct {
            thread_key, args, ..
        } => (thread_key, args),
        other => {
            return Err(SpindleError::protocol(format!(
                "worker booted with {other:?} instead of construct"
            )))
        }
    };
    let entry = registry.blueprint_for(thread_key).ok_or_else(|| {
        SpindleError::protocol(format!("no blueprint is registered under thread key {thread_key}"))
    })?;

    let instance = (entry.construct)(Args::new(args)).map_err(|fault| {
        error!(blueprint = entry.name, fault = %fault, "Blueprint construction failed");
        SpindleError::Remote(fault.into_value())
    })?;
    debug!(blueprint = entry.name, thread_key = %thread_key, "Worker constructed, listening");

    let (writer, mut reader) = port.split();
    let replier = Rc::new(Replier {
        writer,
        registry: Arc::clone(&registry),
    });

    loop {
        let message = match reader.recv::<WorkerMessage>().await {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!(blueprint = entry.name, "Host port closed, stopping worker");
                break;
            }
            Err(err) => {
                error!(blueprint = entry.name, error = %err, "Worker received an unreadable message");
                return Err(err.into());
            }
        };
        trace!(blueprint = entry.name, kind = %message.kind(), ordinal = ?message.ordinal(), "Worker message");

        match message {
            WorkerMessage::Execute { ordinal, .. } => {
                match protocol::decode(message, registry.marshal()) {
                    Ok(Command::Execute { method, args, .. }) => {
                        task::spawn_local(execute(
                            Rc::clone(&instance),
                            Rc::clone(&replier),
                            ordinal,
                            method,
                            args,
                        ));
                    }
                    Ok(other) => {
                        error!(ordinal, command = ?other, "Execute decoded into another command")
                    }
                    Err(err) => replier.reply(Command::Error {
                        ordinal,
                        error: Value::String(err.to_string()),
                    }),
                }
            }
            WorkerMessage::Dispose { ordinal } => {
                task::spawn_local(dispose(Rc::clone(&instance), Rc::clone(&replier), ordinal));
            }
            WorkerMessage::Terminate => {
                // Let replies queued by sibling tasks go out first.
                task::yield_now().await;
                debug!(blueprint = entry.name, "Worker terminating");
                break;
            }
            other => {
                let kind = other.kind();
                error!(blueprint = entry.name, kind = %kind, "Worker received an unexpected message");
                return Err(SpindleError::protocol(format!(
                    "the worker received an unexpected {kind} message"
                )));
            }
        }
    }
    Ok(())
}

async fn execute(
    instance: Rc<dyn Blueprint>,
    replier: Rc<Replier>,
    ordinal: Ordinal,
    method: String,
    args: Vec<Value>,
) {
    let started = Instant::now();
    let outcome = AssertUnwindSafe(instance.invoke(&method, Args::new(args)))
        .catch_unwind()
        .await;

    let reply = match outcome {
        Ok(Ok(result)) => Command::Result { ordinal, result },
        Ok(Err(fault)) => {
            debug!(ordinal, method = %method, fault = %fault, "Method failed");
            Command::Error {
                ordinal,
                error: fault.into_value(),
            }
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(ordinal, method = %method, panic = %message, "Method panicked");
            Command::Error {
                ordinal,
                error: Value::String(message),
            }
        }
    };
    trace!(
        ordinal,
        method = %method,
        duration_us = started.elapsed().as_micros() as u64,
        "Method completed"
    );
    replier.reply(reply);
}

async fn dispose(instance: Rc<dyn Blueprint>, replier: Rc<Replier>, ordinal: Ordinal) {
    if AssertUnwindSafe(instance.dispose()).catch_unwind().await.is_err() {
        error!(ordinal, "Blueprint dispose panicked");
    }
    replier.reply(Command::Disposed { ordinal });
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker method panicked".to_string()
    }
}
