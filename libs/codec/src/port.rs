//! Ports: the opaque, movable communication handle
//!
//! A port is one end of an in-process message channel. Packets are posted
//! type-erased (`Box<dyn Any + Send>`) and read back by a typed reader that
//! downcasts each packet, the same way actor mailboxes carry
//! `Arc<dyn Any + Send + Sync>` and hand out typed receivers. Ports are
//! moved across worker boundaries, never copied.

use crate::error::{CodecError, Result};
use std::any::{type_name, Any};
use std::fmt;
use tokio::sync::mpsc;
use tracing::{trace, warn};
use uuid::Uuid;

/// A type-erased packet travelling through a port
pub type Packet = Box<dyn Any + Send>;

/// Unique port identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId {
    id: Uuid,
}

impl PortId {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    pub fn uuid(&self) -> Uuid {
        self.id
    }
}

impl Default for PortId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port-{}", self.id.simple())
    }
}

/// Create a connected pair of ports
///
/// Whatever is posted on one end is received, in order, on the other.
pub fn pair() -> (Port, Port) {
    let (left_tx, left_rx) = mpsc::unbounded_channel();
    let (right_tx, right_rx) = mpsc::unbounded_channel();

    let (left_id, right_id) = (PortId::new(), PortId::new());

    let left = Port {
        writer: PortWriter {
            id: left_id,
            tx: right_tx,
        },
        reader: PortReader {
            id: left_id,
            rx: left_rx,
        },
    };
    let right = Port {
        writer: PortWriter {
            id: right_id,
            tx: left_tx,
        },
        reader: PortReader {
            id: right_id,
            rx: right_rx,
        },
    };
    trace!(left = %left.id(), right = %right.id(), "Created port pair");
    (left, right)
}

/// One end of a bidirectional message channel
pub struct Port {
    writer: PortWriter,
    reader: PortReader,
}

impl Port {
    pub fn id(&self) -> PortId {
        self.writer.id
    }

    /// Post a packet to the opposite endpoint
    pub fn post<M: Any + Send>(&self, message: M) -> Result<()> {
        self.writer.post(message)
    }

    /// Receive the next packet, `None` once the opposite endpoint is gone
    pub async fn recv<M: Any + Send>(&mut self) -> Result<Option<M>> {
        self.reader.recv().await
    }

    /// Split into independently owned writer and reader halves
    pub fn split(self) -> (PortWriter, PortReader) {
        (self.writer, self.reader)
    }

    /// Close this endpoint; the opposite reader observes end of stream
    pub fn close(self) {
        trace!(port = %self.id(), "Closing port");
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.writer.id)
            .field("connected", &!self.writer.tx.is_closed())
            .finish()
    }
}

/// Sending half of a port
#[derive(Clone)]
pub struct PortWriter {
    id: PortId,
    tx: mpsc::UnboundedSender<Packet>,
}

impl PortWriter {
    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn post<M: Any + Send>(&self, message: M) -> Result<()> {
        self.tx
            .send(Box::new(message))
            .map_err(|_| CodecError::Disconnected { port: self.id })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for PortWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortWriter").field("id", &self.id).finish()
    }
}

/// Receiving half of a port
pub struct PortReader {
    id: PortId,
    rx: mpsc::UnboundedReceiver<Packet>,
}

impl PortReader {
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Receive the next packet as `M`
    ///
    /// A packet of any other type is a protocol violation for this reader.
    pub async fn recv<M: Any + Send>(&mut self) -> Result<Option<M>> {
        let port = self.id;
        match self.rx.recv().await {
            Some(packet) => match packet.downcast::<M>() {
                Ok(message) => Ok(Some(*message)),
                Err(_) => {
                    warn!(
                        port = %port,
                        expected = type_name::<M>(),
                        "Port received an unexpected packet type"
                    );
                    Err(CodecError::UnexpectedPacket {
                        port,
                        expected: type_name::<M>(),
                    })
                }
            },
            None => Ok(None),
        }
    }
}

impl fmt::Debug for PortReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortReader").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (left, mut right) = pair();

        left.post(1u32).unwrap();
        left.post(2u32).unwrap();
        left.post(3u32).unwrap();

        assert_eq!(right.recv::<u32>().await.unwrap(), Some(1));
        assert_eq!(right.recv::<u32>().await.unwrap(), Some(2));
        assert_eq!(right.recv::<u32>().await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_unexpected_packet_type() {
        let (left, mut right) = pair();
        left.post("not a number").unwrap();

        let err = right.recv::<u32>().await.unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedPacket { .. }));
    }

    #[tokio::test]
    async fn test_close_ends_stream_and_disconnects() {
        let (left, mut right) = pair();
        left.close();

        assert_eq!(right.recv::<u32>().await.unwrap(), None);
        let err = right.post(7u32).unwrap_err();
        assert!(matches!(err, CodecError::Disconnected { .. }));
    }

    #[test]
    fn test_port_ids_are_unique() {
        let (left, right) = pair();
        assert_ne!(left.id(), right.id());
        assert!(left.id().to_string().starts_with("port-"));
    }
}
