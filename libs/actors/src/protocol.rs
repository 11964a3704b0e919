//! Worker lifecycle protocol
//!
//! The closed set of messages exchanged between a [`WorkerHandle`] and the
//! worker runtime over one port:
//!
//! ```text
//! host                         worker
//!  │── construct (ordinal 0) ──▶│
//!  │── execute ────────────────▶│
//!  │◀──────────── result/error ─│
//!  │── dispose ────────────────▶│
//!  │◀───────────────── disposed ─│
//!  │── terminate ──────────────▶│
//! ```
//!
//! Only user-carried fields (arguments, results, raised values) go through
//! the marshal encoder. Each is tagged [`Field::Marshalled`] or
//! [`Field::Default`] so the decoder knows which ones to decode. Control
//! fields pass through untouched.
//!
//! [`WorkerHandle`]: crate::WorkerHandle

use crate::error::Result;
use crate::registry::ThreadKey;
use spindle_codec::encoder::needs_encoding;
use spindle_codec::{collect_transfers, Encoded, MarshalEncoder, MarshalRegistry, PortId, Value};
use std::fmt;
use tracing::trace;

/// Per-connection correlation id
pub type Ordinal = u64;

/// A user-carried field on the wire
#[derive(Debug)]
pub enum Field {
    /// Passed verbatim
    Default(Value),
    /// Passed through the marshal encoder
    Marshalled(Encoded),
}

impl Field {
    /// Encode `value` if it needs it, recording its ports in `transfers`
    pub fn encode(
        value: Value,
        encoder: &MarshalEncoder<'_>,
        transfers: &mut Vec<PortId>,
    ) -> Result<Self> {
        if !needs_encoding(&value) {
            return Ok(Field::Default(value));
        }
        transfers.extend(collect_transfers(&value));
        Ok(Field::Marshalled(encoder.encode(value)?))
    }

    pub fn decode(self, encoder: &MarshalEncoder<'_>) -> Result<Value> {
        match self {
            Field::Default(value) => Ok(value),
            Field::Marshalled(encoded) => Ok(encoder.decode(encoded)?),
        }
    }

    pub fn is_marshalled(&self) -> bool {
        matches!(self, Field::Marshalled(_))
    }
}

/// Message kinds, for logging and violation reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Construct,
    Execute,
    Result,
    Error,
    Dispose,
    Disposed,
    Terminate,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Construct => "construct",
            MessageKind::Execute => "execute",
            MessageKind::Result => "result",
            MessageKind::Error => "error",
            MessageKind::Dispose => "dispose",
            MessageKind::Disposed => "disposed",
            MessageKind::Terminate => "terminate",
        };
        f.write_str(name)
    }
}

/// A lifecycle message with live values
#[derive(Debug)]
pub enum Command {
    /// host → worker: instantiate the blueprint
    Construct {
        ordinal: Ordinal,
        thread_key: ThreadKey,
        args: Vec<Value>,
    },
    /// host → worker: call a method
    Execute {
        ordinal: Ordinal,
        method: String,
        args: Vec<Value>,
    },
    /// worker → host
    Result { ordinal: Ordinal, result: Value },
    /// worker → host
    Error { ordinal: Ordinal, error: Value },
    /// host → worker
    Dispose { ordinal: Ordinal },
    /// worker → host
    Disposed { ordinal: Ordinal },
    /// host → worker, unconditional
    Terminate,
}

/// A lifecycle message in wire form
#[derive(Debug)]
pub enum WorkerMessage {
    Construct {
        ordinal: Ordinal,
        thread_key: ThreadKey,
        args: Vec<Field>,
    },
    Execute {
        ordinal: Ordinal,
        method: String,
        args: Vec<Field>,
    },
    Result { ordinal: Ordinal, result: Field },
    Error { ordinal: Ordinal, error: Field },
    Dispose { ordinal: Ordinal },
    Disposed { ordinal: Ordinal },
    Terminate,
}

impl WorkerMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            WorkerMessage::Construct { .. } => MessageKind::Construct,
            WorkerMessage::Execute { .. } => MessageKind::Execute,
            WorkerMessage::Result { .. } => MessageKind::Result,
            WorkerMessage::Error { .. } => MessageKind::Error,
            WorkerMessage::Dispose { .. } => MessageKind::Dispose,
            WorkerMessage::Disposed { .. } => MessageKind::Disposed,
            WorkerMessage::Terminate => MessageKind::Terminate,
        }
    }

    /// `None` only for terminate
    pub fn ordinal(&self) -> Option<Ordinal> {
        match self {
            WorkerMessage::Construct { ordinal, .. }
            | WorkerMessage::Execute { ordinal, .. }
            | WorkerMessage::Result { ordinal, .. }
            | WorkerMessage::Error { ordinal, .. }
            | WorkerMessage::Dispose { ordinal }
            | WorkerMessage::Disposed { ordinal } => Some(*ordinal),
            WorkerMessage::Terminate => None,
        }
    }
}

fn encode_args(
    args: Vec<Value>,
    encoder: &MarshalEncoder<'_>,
    transfers: &mut Vec<PortId>,
) -> Result<Vec<Field>> {
    args.into_iter()
        .map(|arg| Field::encode(arg, encoder, transfers))
        .collect()
}

fn decode_args(args: Vec<Field>, encoder: &MarshalEncoder<'_>) -> Result<Vec<Value>> {
    args.into_iter().map(|arg| arg.decode(encoder)).collect()
}

/// Encode a command, returning the wire message and the ports it moves
pub fn encode(command: Command, registry: &MarshalRegistry) -> Result<(WorkerMessage, Vec<PortId>)> {
    let encoder = MarshalEncoder::new(registry);
    let mut transfers = Vec::new();

    let message = match command {
        Command::Construct {
            ordinal,
            thread_key,
            args,
        } => WorkerMessage::Construct {
            ordinal,
            thread_key,
            args: encode_args(args, &encoder, &mut transfers)?,
        },
        Command::Execute {
            ordinal,
            method,
            args,
        } => WorkerMessage::Execute {
            ordinal,
            method,
            args: encode_args(args, &encoder, &mut transfers)?,
        },
        Command::Result { ordinal, result } => WorkerMessage::Result {
            ordinal,
            result: Field::encode(result, &encoder, &mut transfers)?,
        },
        Command::Error { ordinal, error } => WorkerMessage::Error {
            ordinal,
            error: Field::encode(error, &encoder, &mut transfers)?,
        },
        Command::Dispose { ordinal } => WorkerMessage::Dispose { ordinal },
        Command::Disposed { ordinal } => WorkerMessage::Disposed { ordinal },
        Command::Terminate => WorkerMessage::Terminate,
    };

    trace!(
        kind = %message.kind(),
        ordinal = ?message.ordinal(),
        transfers = transfers.len(),
        "Encoded worker message"
    );
    Ok((message, transfers))
}

/// Decode a wire message back into live values
pub fn decode(message: WorkerMessage, registry: &MarshalRegistry) -> Result<Command> {
    let encoder = MarshalEncoder::new(registry);

    let command = match message {
        WorkerMessage::Construct {
            ordinal,
            thread_key,
            args,
        } => Command::Construct {
            ordinal,
            thread_key,
            args: decode_args(args, &encoder)?,
        },
        WorkerMessage::Execute {
            ordinal,
            method,
            args,
        } => Command::Execute {
            ordinal,
            method,
            args: decode_args(args, &encoder)?,
        },
        WorkerMessage::Result { ordinal, result } => Command::Result {
            ordinal,
            result: result.decode(&encoder)?,
        },
        WorkerMessage::Error { ordinal, error } => Command::Error {
            ordinal,
            error: error.decode(&encoder)?,
        },
        WorkerMessage::Dispose { ordinal } => Command::Dispose { ordinal },
        WorkerMessage::Disposed { ordinal } => Command::Disposed { ordinal },
        WorkerMessage::Terminate => Command::Terminate,
    };
    Ok(command)
}
