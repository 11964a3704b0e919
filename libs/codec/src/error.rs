//! Marshalling and port errors
//!
//! Every variant carries enough context to tell which value, key or port
//! was involved. `category()` is used as a structured logging field.

use crate::port::PortId;
use crate::registry::MarshalKey;
use thiserror::Error;

/// Errors raised while registering, encoding, decoding or transporting values
#[derive(Debug, Error)]
pub enum CodecError {
    /// A type was registered as marshalled more than once
    #[error("Type '{type_name}' is already registered as marshalled (key {key})")]
    DuplicateRegistration {
        type_name: &'static str,
        key: MarshalKey,
    },

    /// A decoded value referenced a key this process never registered
    #[error("No marshalled type is registered under key {key}")]
    UnknownMarshalKey { key: MarshalKey },

    /// A value had a different shape than the caller asked for
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// A registered type could not be rebuilt because a field is absent
    #[error("Missing field '{field}' while rebuilding {type_name}")]
    MissingField {
        field: String,
        type_name: &'static str,
    },

    /// A positional argument was requested that the caller never sent
    #[error("Missing argument {index}: {received} argument(s) received")]
    MissingArgument { index: usize, received: usize },

    /// The tag and payload of an encoded value do not agree
    #[error("Malformed encoding: {message}")]
    Malformed { message: String },

    /// A live object refused to give up its fields
    #[error("Cannot marshal {type_name}: {reason}")]
    Refused {
        type_name: &'static str,
        reason: String,
    },

    /// The opposite endpoint of a port is gone
    #[error("Port {port} is disconnected")]
    Disconnected { port: PortId },

    /// A port delivered a packet of a type its reader does not speak
    #[error("Port {port} received an unexpected packet (expected {expected})")]
    UnexpectedPacket {
        port: PortId,
        expected: &'static str,
    },
}

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

impl CodecError {
    pub fn type_mismatch(expected: &'static str, found: &'static str) -> Self {
        Self::TypeMismatch { expected, found }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>, type_name: &'static str) -> Self {
        Self::MissingField {
            field: field.into(),
            type_name,
        }
    }

    pub fn refused(type_name: &'static str, reason: impl Into<String>) -> Self {
        Self::Refused {
            type_name,
            reason: reason.into(),
        }
    }

    /// Registration errors happen at startup and are never retried
    pub fn is_registration(&self) -> bool {
        matches!(self, Self::DuplicateRegistration { .. })
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::DuplicateRegistration { .. } => "registration",
            Self::UnknownMarshalKey { .. } | Self::Malformed { .. } => "decode",
            Self::TypeMismatch { .. }
            | Self::MissingField { .. }
            | Self::MissingArgument { .. } => "conversion",
            Self::Refused { .. } => "encode",
            Self::Disconnected { .. } => "disconnected",
            Self::UnexpectedPacket { .. } => "protocol",
        }
    }
}
