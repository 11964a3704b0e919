//! Acknowledged channels
//!
//! A [`Sender`]/[`Receiver`] pair shares one port. Every transmitted item
//! carries an ordinal and is acknowledged by the receiver as it is taken,
//! so awaiting a [`Delivery`] means the item has been consumed:
//!
//! ```text
//! sender                     receiver
//!  │── value(n, item) ──────▶│  receive() → Some(item)
//!  │◀─────────── value(n) ───│
//!  │── shutdown(m) ─────────▶│  receive() → None
//!  │◀──────── shutdown(m) ───│  port closed
//! ```
//!
//! Both endpoints attach to their port lazily, on first use. Until then
//! they are plain marshalled values and can be moved into a worker.
//!
//! Items are encoded and decoded with the registry the endpoint was created
//! under: [`channel_in`] names it, [`channel`] and endpoints rebuilt on a
//! worker take [`Registry::current`].

mod queue;
mod select;

pub use queue::Queue;
pub use select::select;

use crate::error::{Result, SpindleError};
use crate::protocol::{Field, Ordinal};
use crate::registry::Registry;
use futures::Stream;
use parking_lot::Mutex;
use spindle_codec::{
    port, CodecError, Fields, FromValue, Marshal, MarshalEncoder, MarshalObject, Port, PortId,
    PortReader, PortWriter, Value,
};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

/// Sender → receiver
#[derive(Debug)]
pub enum Transmit {
    Value { ordinal: Ordinal, item: Field },
    Shutdown { ordinal: Ordinal },
}

/// Receiver → sender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledge {
    Value { ordinal: Ordinal },
    Shutdown { ordinal: Ordinal },
}

impl Acknowledge {
    pub fn ordinal(&self) -> Ordinal {
        match self {
            Acknowledge::Value { ordinal } | Acknowledge::Shutdown { ordinal } => *ordinal,
        }
    }
}

/// Create a connected, unattached channel under the current registry
pub fn channel() -> (Sender, Receiver) {
    channel_in(Registry::current())
}

/// Create a connected, unattached channel whose items are marshalled with
/// `registry`
pub fn channel_in(registry: Arc<Registry>) -> (Sender, Receiver) {
    let (left, right) = port::pair();
    (
        Sender::from_port_in(left, Arc::clone(&registry)),
        Receiver::from_port_in(right, registry),
    )
}

/// Why a sender stopped accepting items
#[derive(Debug, Clone)]
enum Poison {
    UnknownOrdinal(Ordinal),
    Violation(String),
}

impl Poison {
    fn error(&self, peer: PortId) -> SpindleError {
        match self {
            Poison::UnknownOrdinal(ordinal) => SpindleError::UnknownOrdinal {
                ordinal: *ordinal,
                peer: peer.to_string(),
            },
            Poison::Violation(message) => SpindleError::protocol(message.clone()),
        }
    }
}

/// A posted item waiting for its acknowledgement
struct Pending {
    shutdown: bool,
    reply: oneshot::Sender<Result<()>>,
}

struct SenderState {
    /// Present until first use
    port: Option<Port>,
    writer: Option<PortWriter>,
    awaiters: HashMap<Ordinal, Pending>,
    poisoned: Option<Poison>,
    ended: bool,
}

struct SenderInner {
    id: PortId,
    registry: Arc<Registry>,
    state: Mutex<SenderState>,
    ordinal: AtomicU64,
}

/// Producing end of a channel
///
/// Clones share one stream and one ordinal sequence. Only an unattached,
/// unshared sender can be marshalled.
#[derive(Clone)]
pub struct Sender {
    inner: Arc<SenderInner>,
}

impl Sender {
    pub fn from_port(port: Port) -> Self {
        Self::from_port_in(port, Registry::current())
    }

    pub fn from_port_in(port: Port, registry: Arc<Registry>) -> Self {
        Self {
            inner: Arc::new(SenderInner {
                id: port.id(),
                registry,
                state: Mutex::new(SenderState {
                    port: Some(port),
                    writer: None,
                    awaiters: HashMap::new(),
                    poisoned: None,
                    ended: false,
                }),
                ordinal: AtomicU64::new(0),
            }),
        }
    }

    pub fn id(&self) -> PortId {
        self.inner.id
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn is_attached(&self) -> bool {
        self.inner.state.lock().writer.is_some()
    }

    /// Deliveries not yet acknowledged
    pub fn pending(&self) -> usize {
        self.inner.state.lock().awaiters.len()
    }

    /// Post `item` now; the returned future resolves once it is received
    pub fn send(&self, item: impl Into<Value>) -> Result<Delivery> {
        let encoder = MarshalEncoder::new(self.inner.registry.marshal());
        let mut transfers = Vec::new();
        let item = Field::encode(item.into(), &encoder, &mut transfers)?;
        self.post(|ordinal| Transmit::Value { ordinal, item }, false)
    }

    /// Post end of stream; the returned future resolves once it is received
    pub fn end(&self) -> Result<Delivery> {
        self.post(|ordinal| Transmit::Shutdown { ordinal }, true)
    }

    fn post(&self, transmit: impl FnOnce(Ordinal) -> Transmit, shutdown: bool) -> Result<Delivery> {
        let mut state = self.inner.state.lock();
        if let Some(poison) = &state.poisoned {
            return Err(poison.error(self.inner.id));
        }
        if state.ended {
            return Err(SpindleError::invalid_state(format!(
                "channel {} has already ended",
                self.inner.id
            )));
        }
        let writer = self.attach(&mut state)?;

        let ordinal = self.inner.ordinal.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        state.awaiters.insert(ordinal, Pending { shutdown, reply: tx });
        if let Err(err) = writer.post(transmit(ordinal)) {
            state.awaiters.remove(&ordinal);
            return Err(err.into());
        }
        state.ended = shutdown;
        trace!(port = %self.inner.id, ordinal, shutdown, "Posted channel item");

        Ok(Delivery {
            ordinal,
            port: self.inner.id,
            reply: rx,
        })
    }

    fn attach(&self, state: &mut SenderState) -> Result<PortWriter> {
        if let Some(writer) = &state.writer {
            return Ok(writer.clone());
        }
        let runtime = Handle::try_current().map_err(|_| SpindleError::NoRuntime {
            operation: "sending on a channel",
        })?;
        let port = state.port.take().ok_or_else(|| {
            SpindleError::invalid_state(format!("channel {} has no port", self.inner.id))
        })?;
        let (writer, reader) = port.split();
        runtime.spawn(pump_acknowledgements(Arc::downgrade(&self.inner), reader));
        state.writer = Some(writer.clone());
        debug!(port = %self.inner.id, "Sender attached");
        Ok(writer)
    }
}

impl SenderInner {
    /// Resolve the delivery for `ack`; false once the sender is poisoned
    fn acknowledge(&self, ack: Acknowledge) -> bool {
        let ordinal = ack.ordinal();
        let mut state = self.state.lock();
        match state.awaiters.remove(&ordinal) {
            Some(pending) if pending.shutdown != matches!(ack, Acknowledge::Shutdown { .. }) => {
                error!(port = %self.id, ordinal, ack = ?ack, "Acknowledgement of the wrong kind");
                let violation = Poison::Violation(format!(
                    "channel {} acknowledged ordinal {ordinal} with {ack:?}",
                    self.id
                ));
                let _ = pending.reply.send(Err(violation.error(self.id)));
                Self::poison(&mut state, self.id, violation);
                false
            }
            Some(pending) => {
                trace!(port = %self.id, ordinal, ack = ?ack, "Delivery acknowledged");
                let _ = pending.reply.send(Ok(()));
                true
            }
            None => {
                error!(port = %self.id, ordinal, "Acknowledgement for unknown ordinal");
                Self::poison(&mut state, self.id, Poison::UnknownOrdinal(ordinal));
                false
            }
        }
    }

    fn poison(state: &mut SenderState, id: PortId, poison: Poison) {
        for (_, pending) in state.awaiters.drain() {
            let _ = pending.reply.send(Err(poison.error(id)));
        }
        state.poisoned = Some(poison);
    }
}

async fn pump_acknowledgements(inner: Weak<SenderInner>, mut reader: PortReader) {
    loop {
        let received = reader.recv::<Acknowledge>().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match received {
            Ok(Some(ack)) => {
                if !inner.acknowledge(ack) {
                    break;
                }
            }
            Ok(None) => {
                let pending = inner.state.lock().awaiters.len();
                if pending > 0 {
                    warn!(port = %inner.id, pending, "Receiver closed with deliveries outstanding");
                }
                break;
            }
            Err(err) => {
                error!(port = %inner.id, error = %err, "Unreadable acknowledgement");
                let mut state = inner.state.lock();
                SenderInner::poison(&mut state, inner.id, Poison::Violation(err.to_string()));
                break;
            }
        }
    }
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Sender")
            .field("id", &self.inner.id)
            .field("attached", &state.writer.is_some())
            .field("pending", &state.awaiters.len())
            .finish()
    }
}

impl MarshalObject for Sender {
    fn into_fields(self: Box<Self>) -> spindle_codec::Result<Fields> {
        let inner = Arc::try_unwrap(self.inner)
            .map_err(|_| CodecError::refused("Sender", "the sender is shared with other clones"))?;
        let port = inner
            .state
            .into_inner()
            .port
            .ok_or_else(|| CodecError::refused("Sender", "the sender is already attached"))?;
        Ok(Fields::new().with("port", port))
    }

    fn transfer_ports(&self) -> Vec<PortId> {
        self.inner.state.lock().port.iter().map(Port::id).collect()
    }
}

impl Marshal for Sender {
    fn from_fields(mut fields: Fields) -> spindle_codec::Result<Self> {
        let port: Port = fields.take("port", "Sender")?;
        Ok(Self::from_port(port))
    }
}

/// Resolves when the receiver acknowledges one posted item
#[must_use = "a delivery does nothing unless awaited"]
#[derive(Debug)]
pub struct Delivery {
    ordinal: Ordinal,
    port: PortId,
    reply: oneshot::Receiver<Result<()>>,
}

impl Delivery {
    pub fn ordinal(&self) -> Ordinal {
        self.ordinal
    }
}

impl Future for Delivery {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let port = self.port;
        match Pin::new(&mut self.reply).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CodecError::Disconnected { port }.into())),
            Poll::Pending => Poll::Pending,
        }
    }
}

type Inbound = spindle_codec::Result<Option<Transmit>>;

/// Consuming end of a channel
pub struct Receiver {
    id: PortId,
    registry: Arc<Registry>,
    port: Option<Port>,
    writer: Option<PortWriter>,
    inbox: Option<Arc<Queue<Inbound>>>,
    pump: Option<JoinHandle<()>>,
    finished: bool,
}

impl Receiver {
    pub fn from_port(port: Port) -> Self {
        Self::from_port_in(port, Registry::current())
    }

    pub fn from_port_in(port: Port, registry: Arc<Registry>) -> Self {
        Self {
            id: port.id(),
            registry,
            port: Some(port),
            writer: None,
            inbox: None,
            pump: None,
            finished: false,
        }
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn is_attached(&self) -> bool {
        self.inbox.is_some()
    }

    /// True once end of stream was received
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Next item, or `None` at end of stream
    ///
    /// Each item is acknowledged as it is returned. After end of stream
    /// every call returns `None`.
    pub async fn receive(&mut self) -> Result<Option<Value>> {
        if self.finished {
            return Ok(None);
        }
        let inbox = self.attach()?;

        match inbox.dequeue().await {
            Ok(Some(Transmit::Value { ordinal, item })) => {
                self.acknowledge(Acknowledge::Value { ordinal });
                let value = {
                    // Endpoints nested in the item inherit this registry.
                    let _scope = Registry::enter(Arc::clone(&self.registry));
                    item.decode(&MarshalEncoder::new(self.registry.marshal()))
                }?;
                Ok(Some(value))
            }
            Ok(Some(Transmit::Shutdown { ordinal })) => {
                self.acknowledge(Acknowledge::Shutdown { ordinal });
                trace!(port = %self.id, ordinal, "Channel shut down");
                self.close();
                Ok(None)
            }
            Ok(None) => {
                warn!(port = %self.id, "Sender dropped without ending the channel");
                self.close();
                Ok(None)
            }
            Err(err) => {
                error!(port = %self.id, error = %err, "Channel protocol violation");
                self.close();
                Err(err.into())
            }
        }
    }

    /// [`Receiver::receive`], converted to `T`
    pub async fn receive_as<T: FromValue>(&mut self) -> Result<Option<T>> {
        match self.receive().await? {
            Some(value) => Ok(Some(T::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Items until end of stream; an error ends the stream after it is yielded
    pub fn into_stream(self) -> impl Stream<Item = Result<Value>> {
        futures::stream::unfold(Some(self), |receiver| async move {
            let mut receiver = receiver?;
            match receiver.receive().await {
                Ok(Some(value)) => Some((Ok(value), Some(receiver))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    fn attach(&mut self) -> Result<Arc<Queue<Inbound>>> {
        if let Some(inbox) = &self.inbox {
            return Ok(Arc::clone(inbox));
        }
        let runtime = Handle::try_current().map_err(|_| SpindleError::NoRuntime {
            operation: "receiving from a channel",
        })?;
        let port = self.port.take().ok_or_else(|| {
            SpindleError::invalid_state(format!("channel {} has no port", self.id))
        })?;

        let (writer, reader) = port.split();
        let inbox = Arc::new(Queue::new());
        self.pump = Some(runtime.spawn(pump_transmits(reader, Arc::clone(&inbox))));
        self.writer = Some(writer);
        self.inbox = Some(Arc::clone(&inbox));
        debug!(port = %self.id, "Receiver attached");
        Ok(inbox)
    }

    fn acknowledge(&self, ack: Acknowledge) {
        if let Some(writer) = &self.writer {
            if let Err(err) = writer.post(ack) {
                debug!(port = %self.id, error = %err, "Sender gone before acknowledgement");
            }
        }
    }

    fn close(&mut self) {
        self.finished = true;
        self.writer = None;
        self.inbox = None;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

async fn pump_transmits(mut reader: PortReader, inbox: Arc<Queue<Inbound>>) {
    loop {
        let received = reader.recv::<Transmit>().await;
        let done = !matches!(received, Ok(Some(Transmit::Value { .. })));
        inbox.enqueue(received);
        if done {
            break;
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

impl fmt::Debug for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("id", &self.id)
            .field("attached", &self.is_attached())
            .field("finished", &self.finished)
            .finish()
    }
}

impl MarshalObject for Receiver {
    fn into_fields(mut self: Box<Self>) -> spindle_codec::Result<Fields> {
        let port = self
            .port
            .take()
            .filter(|_| self.inbox.is_none())
            .ok_or_else(|| CodecError::refused("Receiver", "the receiver is already attached"))?;
        Ok(Fields::new().with("port", port))
    }

    fn transfer_ports(&self) -> Vec<PortId> {
        self.port.iter().map(Port::id).collect()
    }
}

impl Marshal for Receiver {
    fn from_fields(mut fields: Fields) -> spindle_codec::Result<Self> {
        let port: Port = fields.take("port", "Receiver")?;
        Ok(Self::from_port(port))
    }
}
