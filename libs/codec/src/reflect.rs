//! Shape predicates over [`Value`]
//!
//! The encoder and the transfer scanner branch on these instead of matching
//! variants directly, so the classification lives in one place.

use crate::value::{Buffer, Value};

/// Broad shape of a value as seen by the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Primitive,
    Container,
    Sequence,
    Map,
    Buffer,
    Handle,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_) => {
                ValueKind::Primitive
            }
            Value::Record(_) | Value::Object(_) => ValueKind::Container,
            Value::Seq(_) => ValueKind::Sequence,
            Value::Map(_) => ValueKind::Map,
            Value::Buffer(_) => ValueKind::Buffer,
            Value::Port(_) => ValueKind::Handle,
        }
    }
}

/// Field-bearing value: a plain record or a live object
pub fn is_container(value: &Value) -> bool {
    ValueKind::of(value) == ValueKind::Container
}

pub fn is_sequence(value: &Value) -> bool {
    ValueKind::of(value) == ValueKind::Sequence
}

pub fn is_map(value: &Value) -> bool {
    ValueKind::of(value) == ValueKind::Map
}

/// Binary buffer passed through without recursion
pub fn is_opaque_buffer(value: &Value) -> bool {
    ValueKind::of(value) == ValueKind::Buffer
}

/// Buffer whose cell is shared with every clone, rather than copied
pub fn is_shared_buffer(value: &Value) -> bool {
    matches!(value, Value::Buffer(Buffer::Word(_)))
}

/// Communication endpoint that must be moved, never copied
pub fn is_opaque_handle(value: &Value) -> bool {
    ValueKind::of(value) == ValueKind::Handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port;
    use crate::value::Fields;
    use crate::word::SharedWord;
    use bytes::Bytes;

    #[test]
    fn test_classification() {
        assert_eq!(ValueKind::of(&Value::Null), ValueKind::Null);
        assert_eq!(ValueKind::of(&Value::from("text")), ValueKind::Primitive);
        assert!(is_container(&Value::Record(Fields::new())));
        assert!(is_sequence(&Value::from(vec![1, 2])));
        assert!(is_map(&Value::Map(Vec::new())));
        assert!(is_opaque_buffer(&Value::from(Bytes::from_static(b"ab"))));
        assert!(!is_shared_buffer(&Value::from(Bytes::from_static(b"ab"))));
        assert!(is_shared_buffer(&Value::from(SharedWord::new(0))));

        let (left, _right) = port::pair();
        assert!(is_opaque_handle(&Value::Port(left)));
    }
}
