//! Host-side worker handle
//!
//! A [`WorkerHandle`] is the client side of the lifecycle protocol. It owns
//! the host end of the worker's port, hands out ordinals, and resolves each
//! pending call when the matching `result`, `error` or `disposed` arrives.
//! A listener task on the caller's runtime reads replies. It holds only a
//! weak reference, so dropping every handle closes the port and lets the
//! worker wind down.

use crate::blueprint::Blueprint;
use crate::error::{Result, SpindleError};
use crate::protocol::{self, Command, MessageKind, Ordinal, WorkerMessage};
use crate::registry::{Registry, ThreadKey};
use crate::transport::{Boot, LaunchRequest, Launcher, ThreadLauncher, WorkerThread};
use parking_lot::Mutex;
use spindle_codec::{port, CodecError, PortReader, PortWriter, Value};
use spindle_config::WorkerOptions;
use std::any::type_name;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Unique worker identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0.simple())
    }
}

/// Lifecycle state as seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Spawning,
    Ready,
    Disposing,
    Terminated,
}

/// A call waiting for its reply, with the request kind it was issued as
struct Awaiter {
    request: MessageKind,
    reply: oneshot::Sender<Result<Value>>,
}

impl Awaiter {
    /// `execute` is answered by `result` or `error`, `dispose` by `disposed`
    fn answered_by(&self, kind: MessageKind) -> bool {
        match self.request {
            MessageKind::Dispose => kind == MessageKind::Disposed,
            _ => matches!(kind, MessageKind::Result | MessageKind::Error),
        }
    }
}

#[derive(Default)]
struct PendingCalls {
    awaiters: HashMap<Ordinal, Awaiter>,
    /// Set once the worker broke the protocol; no further calls are issued
    violation: Option<String>,
}

struct HandleInner {
    id: WorkerId,
    blueprint: &'static str,
    thread_key: ThreadKey,
    writer: PortWriter,
    registry: Arc<Registry>,
    state: Mutex<HandleState>,
    calls: Mutex<PendingCalls>,
    ordinal: AtomicU64,
    thread: Mutex<WorkerThread>,
}

/// Client for one spawned worker
///
/// Cloning is cheap; every clone talks to the same worker.
#[derive(Clone)]
pub struct WorkerHandle {
    inner: Arc<HandleInner>,
}

impl WorkerHandle {
    /// Spawn `B` on a new thread with default options
    pub fn spawn<B: Blueprint>(args: Vec<Value>) -> Result<Self> {
        Self::spawn_with::<B>(WorkerOptions::default(), args)
    }

    pub fn spawn_with<B: Blueprint>(options: WorkerOptions, args: Vec<Value>) -> Result<Self> {
        Self::spawn_on::<B>(&ThreadLauncher, Registry::current(), options, args)
    }

    /// Spawn `B` through an explicit launcher and registry
    ///
    /// Must be called inside a Tokio runtime: replies are read by a task on
    /// the caller's runtime.
    pub fn spawn_on<B: Blueprint>(
        launcher: &dyn Launcher,
        registry: Arc<Registry>,
        options: WorkerOptions,
        args: Vec<Value>,
    ) -> Result<Self> {
        let blueprint = type_name::<B>();
        let thread_key = registry
            .thread_key_for::<B>()
            .filter(|key| !key.is_main())
            .ok_or(SpindleError::NotThreadable { name: blueprint })?;
        let runtime = Handle::try_current().map_err(|_| SpindleError::NoRuntime {
            operation: "spawning a worker",
        })?;
        Registry::seal();

        let started = Instant::now();
        let id = WorkerId::new();
        let (host, worker) = port::pair();
        let (construct, transfers) = protocol::encode(
            Command::Construct {
                ordinal: 0,
                thread_key,
                args,
            },
            registry.marshal(),
        )?;

        let name = options.thread_name(blueprint);
        debug!(
            worker_id = %id,
            blueprint,
            thread_key = %thread_key,
            transfers = transfers.len(),
            "Spawning worker"
        );
        let thread = launcher.launch(LaunchRequest {
            name,
            options,
            boot: Boot::Worker {
                construct,
                port: worker,
                registry: Arc::clone(&registry),
            },
        })?;

        let (writer, reader) = host.split();
        let inner = Arc::new(HandleInner {
            id,
            blueprint,
            thread_key,
            writer,
            registry,
            state: Mutex::new(HandleState::Spawning),
            calls: Mutex::new(PendingCalls::default()),
            ordinal: AtomicU64::new(0),
            thread: Mutex::new(thread),
        });
        runtime.spawn(listen(Arc::downgrade(&inner), reader));
        *inner.state.lock() = HandleState::Ready;

        info!(
            worker_id = %id,
            blueprint,
            spawn_duration_us = started.elapsed().as_micros() as u64,
            "Worker spawned"
        );
        Ok(Self { inner })
    }

    pub fn id(&self) -> WorkerId {
        self.inner.id
    }

    pub fn blueprint(&self) -> &'static str {
        self.inner.blueprint
    }

    pub fn thread_key(&self) -> ThreadKey {
        self.inner.thread_key
    }

    pub fn state(&self) -> HandleState {
        *self.inner.state.lock()
    }

    /// Calls still waiting for a reply
    pub fn pending_calls(&self) -> usize {
        self.inner.calls.lock().awaiters.len()
    }

    /// True once the worker thread has exited
    pub fn is_finished(&self) -> bool {
        self.inner.thread.lock().is_finished()
    }

    /// Invoke `method` on the worker instance
    ///
    /// `"dispose"` is reserved and routed to [`WorkerHandle::dispose`]. A
    /// value raised by the method surfaces as [`SpindleError::Remote`].
    pub async fn execute(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        if method == "dispose" {
            return self.dispose().await.map(|()| Value::Null);
        }

        let method = method.to_string();
        let reply = self.inner.request(HandleState::Ready, |ordinal| Command::Execute {
            ordinal,
            method,
            args,
        })?;
        self.inner.wait(reply).await
    }

    /// Run the instance's dispose hook, then terminate the worker
    ///
    /// Resolves once the worker acknowledged; terminate is posted right
    /// after. Only one dispose may be issued per worker.
    pub async fn dispose(&self) -> Result<()> {
        let reply = self
            .inner
            .request(HandleState::Ready, |ordinal| Command::Dispose { ordinal })?;
        self.inner.wait(reply).await.map(|_| ())
    }

    /// Block the current thread until the worker thread exits
    ///
    /// Never call this from inside the worker's own runtime.
    pub fn join(&self) {
        self.inner.thread.lock().join();
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.inner.id)
            .field("blueprint", &self.inner.blueprint)
            .field("state", &self.state())
            .finish()
    }
}

impl HandleInner {
    /// Allocate an ordinal, register the awaiter and post the command
    fn request(
        &self,
        required: HandleState,
        command: impl FnOnce(Ordinal) -> Command,
    ) -> Result<oneshot::Receiver<Result<Value>>> {
        let mut state = self.state.lock();
        if *state != required {
            return Err(SpindleError::invalid_state(format!(
                "worker {} is {:?}, expected {:?}",
                self.id, *state, required
            )));
        }

        let mut calls = self.calls.lock();
        if let Some(violation) = &calls.violation {
            return Err(SpindleError::protocol(violation.clone()));
        }

        let ordinal = self.ordinal.fetch_add(1, Ordering::Relaxed) + 1;
        let command = command(ordinal);
        if matches!(command, Command::Dispose { .. }) {
            *state = HandleState::Disposing;
        }
        let (message, _) = protocol::encode(command, self.registry.marshal())?;
        let request = message.kind();
        trace!(worker_id = %self.id, kind = %request, ordinal, "Posting request");

        let (tx, rx) = oneshot::channel();
        calls.awaiters.insert(ordinal, Awaiter { request, reply: tx });
        if let Err(err) = self.writer.post(message) {
            calls.awaiters.remove(&ordinal);
            return Err(err.into());
        }
        Ok(rx)
    }

    async fn wait(&self, reply: oneshot::Receiver<Result<Value>>) -> Result<Value> {
        match reply.await {
            Ok(outcome) => outcome,
            Err(_) => Err(CodecError::Disconnected {
                port: self.writer.id(),
            }
            .into()),
        }
    }

    /// Route one reply to its awaiter
    fn dispatch(&self, message: WorkerMessage) -> Result<()> {
        let kind = message.kind();
        let ordinal = match (kind, message.ordinal()) {
            (MessageKind::Result | MessageKind::Error | MessageKind::Disposed, Some(ordinal)) => {
                ordinal
            }
            _ => {
                return Err(SpindleError::protocol(format!(
                    "worker {} sent an unexpected {kind} message",
                    self.id
                )))
            }
        };

        let awaiter = self
            .calls
            .lock()
            .awaiters
            .remove(&ordinal)
            .ok_or_else(|| SpindleError::UnknownOrdinal {
                ordinal,
                peer: self.id.to_string(),
            })?;
        if !awaiter.answered_by(kind) {
            let violation = format!(
                "worker {} answered {} ordinal {ordinal} with {kind}",
                self.id, awaiter.request
            );
            let _ = awaiter.reply.send(Err(SpindleError::protocol(violation.clone())));
            return Err(SpindleError::protocol(violation));
        }

        let decoded = {
            // Endpoints in the reply marshal with this worker's registry.
            let _scope = Registry::enter(Arc::clone(&self.registry));
            protocol::decode(message, self.registry.marshal())
        };
        let outcome = match decoded {
            Ok(Command::Result { result, .. }) => Ok(result),
            Ok(Command::Error { error, .. }) => Err(SpindleError::Remote(error)),
            Ok(Command::Disposed { .. }) => {
                self.terminate();
                Ok(Value::Null)
            }
            Ok(other) => Err(SpindleError::protocol(format!(
                "worker {} reply decoded as {other:?}",
                self.id
            ))),
            Err(err) => Err(err),
        };
        // A caller that stopped waiting is not an error.
        let _ = awaiter.reply.send(outcome);
        Ok(())
    }

    fn terminate(&self) {
        let mut state = self.state.lock();
        if let Ok((message, _)) = protocol::encode(Command::Terminate, self.registry.marshal()) {
            if let Err(err) = self.writer.post(message) {
                debug!(worker_id = %self.id, error = %err, "Worker already gone at terminate");
            }
        }
        *state = HandleState::Terminated;
        debug!(worker_id = %self.id, "Worker disposed, terminate posted");
    }

    /// Fail every pending call and refuse new ones
    fn poison(&self, err: &SpindleError) {
        let message = err.to_string();
        let mut calls = self.calls.lock();
        for (_, awaiter) in calls.awaiters.drain() {
            let _ = awaiter.reply.send(Err(SpindleError::protocol(message.clone())));
        }
        calls.violation = Some(message);
    }
}

async fn listen(inner: Weak<HandleInner>, mut reader: PortReader) {
    loop {
        let received = reader.recv::<WorkerMessage>().await;
        let Some(inner) = inner.upgrade() else {
            trace!(port = %reader.id(), "Worker handle dropped, listener exiting");
            break;
        };

        let message = match received {
            Ok(Some(message)) => message,
            Ok(None) => {
                let pending = inner.calls.lock().awaiters.len();
                if pending > 0 {
                    warn!(worker_id = %inner.id, pending, "Worker exited with calls outstanding");
                } else {
                    debug!(worker_id = %inner.id, "Worker port closed");
                }
                break;
            }
            Err(err) => {
                let err = SpindleError::from(err);
                error!(worker_id = %inner.id, error = %err, "Unreadable reply from worker");
                inner.poison(&err);
                break;
            }
        };

        if let Err(err) = inner.dispatch(message) {
            error!(
                worker_id = %inner.id,
                error = %err,
                error_category = err.category(),
                "Worker protocol violation"
            );
            inner.poison(&err);
            break;
        }
    }
}
