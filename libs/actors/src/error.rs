//! Worker, channel and registration errors

use spindle_codec::{CodecError, Value};
use std::io;
use thiserror::Error;

/// Errors raised by spawning, calling and communicating with workers
#[derive(Debug, Error)]
pub enum SpindleError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Thread key 0 is reserved for exactly one main blueprint
    #[error("A main blueprint is already registered ({existing}); cannot register {rejected}")]
    MultipleMainRegistration {
        existing: &'static str,
        rejected: &'static str,
    },

    #[error("Blueprint '{name}' is already registered under thread key {key}")]
    DuplicateBlueprint { name: &'static str, key: u32 },

    /// Spawn requested for a type that was never registered as a worker
    #[error("The blueprint '{name}' has not been registered as a thread")]
    NotThreadable { name: &'static str },

    #[error("A registry has already been installed for this process")]
    AlreadyInstalled,

    /// Async machinery used outside a Tokio runtime
    #[error("{operation} requires a running Tokio runtime")]
    NoRuntime { operation: &'static str },

    #[error("Failed to launch worker '{name}': {source}")]
    Launch {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The peer sent something the local state machine cannot accept
    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    /// A reply or acknowledgement referenced an ordinal nobody is waiting on
    #[error("Unknown ordinal {ordinal} received from {peer}")]
    UnknownOrdinal { ordinal: u64, peer: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// The remote method failed; carries the raised value unchanged
    #[error("Remote call failed: {0:?}")]
    Remote(Value),
}

/// Result type alias for worker operations
pub type Result<T> = std::result::Result<T, SpindleError>;

impl SpindleError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Fatal errors indicate desynchronization or misconfiguration and are
    /// never worth retrying
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Remote(_) | Self::InvalidState { .. })
    }

    /// The raised value of a failed remote call
    pub fn into_remote(self) -> Option<Value> {
        match self {
            Self::Remote(value) => Some(value),
            _ => None,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Codec(err) => err.category(),
            Self::MultipleMainRegistration { .. }
            | Self::DuplicateBlueprint { .. }
            | Self::AlreadyInstalled => "registration",
            Self::NotThreadable { .. } | Self::NoRuntime { .. } | Self::Launch { .. } => "spawn",
            Self::ProtocolViolation { .. } | Self::UnknownOrdinal { .. } => "protocol",
            Self::InvalidState { .. } => "state",
            Self::Remote(_) => "remote",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(SpindleError::AlreadyInstalled.category(), "registration");
        assert_eq!(SpindleError::protocol("bad kind").category(), "protocol");
        assert_eq!(SpindleError::Remote(Value::from("boom")).category(), "remote");

        let codec: SpindleError = CodecError::malformed("x").into();
        assert_eq!(codec.category(), "decode");
    }

    #[test]
    fn test_remote_value_is_preserved() {
        let err = SpindleError::Remote(Value::from(42));
        assert!(!err.is_fatal());
        assert_eq!(err.into_remote(), Some(Value::from(42)));
    }

    #[test]
    fn test_messages() {
        let err = SpindleError::UnknownOrdinal {
            ordinal: 7,
            peer: "worker-1".into(),
        };
        assert_eq!(err.to_string(), "Unknown ordinal 7 received from worker-1");
        assert!(err.is_fatal());
    }
}
