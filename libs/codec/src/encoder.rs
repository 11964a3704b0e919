//! Marshal encoder: live values to the tagged wire form and back
//!
//! Every encoded value is a `(tag, payload)` pair. The tag is `Plain` for
//! untyped data, a [`MarshalKey`] for registered objects, or one of two
//! intrinsic tags for ports and ordered maps. Encoding recurses through
//! records, sequences and map values; map keys and buffers are carried
//! untouched. Input must be acyclic, which the ownership of [`Value`]
//! already guarantees.

use crate::error::{CodecError, Result};
use crate::port::Port;
use crate::reflect::ValueKind;
use crate::registry::{MarshalKey, MarshalRegistry};
use crate::value::{Buffer, Fields, Value};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{trace, warn};

/// Wire code of the intrinsic port tag
pub const INTRINSIC_PORT: i64 = -1000;
/// Wire code of the intrinsic ordered-map tag
pub const INTRINSIC_MAP: i64 = -1001;

/// First element of an encoded pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// No type identity, decode structurally
    Plain,
    /// Instance of a registered type
    Key(MarshalKey),
    Port,
    Map,
}

impl Tag {
    /// Numeric wire code; `None` for the plain tag
    pub fn code(&self) -> Option<i64> {
        match self {
            Tag::Plain => None,
            Tag::Key(key) => Some(i64::from(key.get())),
            Tag::Port => Some(INTRINSIC_PORT),
            Tag::Map => Some(INTRINSIC_MAP),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code() {
            Some(code) => write!(f, "{code}"),
            None => f.write_str("null"),
        }
    }
}

/// Second element of an encoded pair
#[derive(Debug)]
pub enum Payload {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Buffer(Buffer),
    Seq(Vec<Encoded>),
    Fields(BTreeMap<String, Encoded>),
    /// Map entries: keys as-is, values encoded
    Entries(Vec<(Value, Encoded)>),
    Port(Port),
}

/// A value in tagged wire form
#[derive(Debug)]
pub struct Encoded {
    pub tag: Tag,
    pub payload: Payload,
}

impl Encoded {
    fn plain(payload: Payload) -> Self {
        Self {
            tag: Tag::Plain,
            payload,
        }
    }

    pub fn null() -> Self {
        Self::plain(Payload::Null)
    }

    pub fn is_null(&self) -> bool {
        self.tag == Tag::Plain && matches!(self.payload, Payload::Null)
    }
}

/// Encodes and decodes values against one marshal registry
#[derive(Debug, Clone, Copy)]
pub struct MarshalEncoder<'r> {
    registry: &'r MarshalRegistry,
}

impl<'r> MarshalEncoder<'r> {
    pub fn new(registry: &'r MarshalRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'r MarshalRegistry {
        self.registry
    }

    /// Encode a value, consuming it
    ///
    /// Ports are moved into the payload. Objects give up their fields and
    /// are tagged with their runtime type's key, or `Plain` if unregistered.
    pub fn encode(&self, value: Value) -> Result<Encoded> {
        let encoded = match value {
            Value::Null => Encoded::null(),
            Value::Port(port) => Encoded {
                tag: Tag::Port,
                payload: Payload::Port(port),
            },
            Value::Map(entries) => {
                let entries = entries
                    .into_iter()
                    .map(|(key, entry)| Ok((key, self.encode(entry)?)))
                    .collect::<Result<Vec<_>>>()?;
                Encoded {
                    tag: Tag::Map,
                    payload: Payload::Entries(entries),
                }
            }
            Value::Buffer(buffer) => Encoded::plain(Payload::Buffer(buffer)),
            Value::Record(fields) => Encoded::plain(Payload::Fields(self.encode_fields(fields)?)),
            Value::Object(object) => {
                let key = self.registry.key_of(object.as_ref());
                let type_name = object.type_name();
                let fields = object.into_fields()?;
                trace!(type_name, key = ?key, fields = fields.len(), "Encoding object");
                Encoded {
                    tag: key.map_or(Tag::Plain, Tag::Key),
                    payload: Payload::Fields(self.encode_fields(fields)?),
                }
            }
            Value::Seq(items) => Encoded::plain(Payload::Seq(
                items
                    .into_iter()
                    .map(|item| self.encode(item))
                    .collect::<Result<Vec<_>>>()?,
            )),
            Value::Bool(b) => Encoded::plain(Payload::Bool(b)),
            Value::Int(i) => Encoded::plain(Payload::Int(i)),
            Value::Float(f) => Encoded::plain(Payload::Float(f)),
            Value::String(s) => Encoded::plain(Payload::String(s)),
        };
        Ok(encoded)
    }

    fn encode_fields(&self, fields: Fields) -> Result<BTreeMap<String, Encoded>> {
        fields
            .into_iter()
            .map(|(name, field)| Ok((name, self.encode(field)?)))
            .collect()
    }

    /// Decode a value, restoring registered type identity
    ///
    /// A registered key rebuilds the instance through the factory supplied
    /// at registration. A key this process never registered loses its
    /// identity and decodes as a plain record.
    pub fn decode(&self, encoded: Encoded) -> Result<Value> {
        let Encoded { tag, payload } = encoded;
        match (tag, payload) {
            (Tag::Port, Payload::Port(port)) => Ok(Value::Port(port)),
            (Tag::Map, Payload::Entries(entries)) => entries
                .into_iter()
                .map(|(key, entry)| Ok((key, self.decode(entry)?)))
                .collect::<Result<Vec<_>>>()
                .map(Value::Map),
            (Tag::Key(key), Payload::Fields(fields)) => {
                let fields = self.decode_fields(fields)?;
                match self.registry.descriptor(key) {
                    Some(descriptor) => (descriptor.factory)(fields).map(Value::Object),
                    None => {
                        warn!(key = %key, "Decoded unknown marshal key, keeping plain fields");
                        Ok(Value::Record(fields))
                    }
                }
            }
            (Tag::Plain, Payload::Fields(fields)) => self.decode_fields(fields).map(Value::Record),
            (Tag::Plain, Payload::Seq(items)) => items
                .into_iter()
                .map(|item| self.decode(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Seq),
            (Tag::Plain, Payload::Null) => Ok(Value::Null),
            (Tag::Plain, Payload::Buffer(buffer)) => Ok(Value::Buffer(buffer)),
            (Tag::Plain, Payload::Bool(b)) => Ok(Value::Bool(b)),
            (Tag::Plain, Payload::Int(i)) => Ok(Value::Int(i)),
            (Tag::Plain, Payload::Float(f)) => Ok(Value::Float(f)),
            (Tag::Plain, Payload::String(s)) => Ok(Value::String(s)),
            (tag, payload) => Err(CodecError::malformed(format!(
                "tag {tag} cannot carry a {} payload",
                payload_kind(&payload)
            ))),
        }
    }

    fn decode_fields(&self, fields: BTreeMap<String, Encoded>) -> Result<Fields> {
        fields
            .into_iter()
            .map(|(name, field)| Ok((name, self.decode(field)?)))
            .collect()
    }
}

fn payload_kind(payload: &Payload) -> &'static str {
    match payload {
        Payload::Null => "null",
        Payload::Bool(_) | Payload::Int(_) | Payload::Float(_) | Payload::String(_) => "primitive",
        Payload::Buffer(_) => "buffer",
        Payload::Seq(_) => "sequence",
        Payload::Fields(_) => "fields",
        Payload::Entries(_) => "map entries",
        Payload::Port(_) => "port",
    }
}

/// Encode against a registry without holding an encoder
pub fn encode(value: Value, registry: &MarshalRegistry) -> Result<Encoded> {
    MarshalEncoder::new(registry).encode(value)
}

pub fn decode(encoded: Encoded, registry: &MarshalRegistry) -> Result<Value> {
    MarshalEncoder::new(registry).decode(encoded)
}

/// Whether a value needs to go through the encoder at all
///
/// Primitives and buffers are passed verbatim by the protocols; anything
/// with structure, identity or a handle is encoded.
pub fn needs_encoding(value: &Value) -> bool {
    !matches!(
        ValueKind::of(value),
        ValueKind::Null | ValueKind::Primitive | ValueKind::Buffer
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port;
    use crate::value::{object_eq, Marshal, MarshalObject};
    use bytes::Bytes;

    #[derive(Debug, PartialEq)]
    struct Point {
        x: i64,
        y: i64,
    }

    impl MarshalObject for Point {
        fn into_fields(self: Box<Self>) -> Result<Fields> {
            Ok(Fields::new().with("x", self.x).with("y", self.y))
        }

        fn eq_object(&self, other: &dyn MarshalObject) -> bool {
            object_eq(self, other)
        }
    }

    impl Marshal for Point {
        fn from_fields(mut fields: Fields) -> Result<Self> {
            Ok(Point {
                x: fields.take("x", "Point")?,
                y: fields.take("y", "Point")?,
            })
        }
    }

    #[derive(Debug)]
    struct Segment {
        from: Point,
        to: Point,
    }

    impl MarshalObject for Segment {
        fn into_fields(self: Box<Self>) -> Result<Fields> {
            Ok(Fields::new()
                .with("from", Value::object(self.from))
                .with("to", Value::object(self.to)))
        }
    }

    impl Marshal for Segment {
        fn from_fields(mut fields: Fields) -> Result<Self> {
            Ok(Segment {
                from: fields.take::<Value>("from", "Segment")?.into_object()?,
                to: fields.take::<Value>("to", "Segment")?.into_object()?,
            })
        }
    }

    fn registry() -> MarshalRegistry {
        let mut registry = MarshalRegistry::new();
        registry.register::<Point>().unwrap();
        registry.register::<Segment>().unwrap();
        registry
    }

    #[test]
    fn test_null_and_primitives_are_plain() {
        let registry = registry();
        let encoded = encode(Value::Null, &registry).unwrap();
        assert!(encoded.is_null());

        let encoded = encode(Value::from(7), &registry).unwrap();
        assert_eq!(encoded.tag, Tag::Plain);
        assert!(matches!(encoded.payload, Payload::Int(7)));
    }

    #[test]
    fn test_registered_object_is_tagged_with_its_key() {
        let registry = registry();
        let encoded = encode(Value::object(Point { x: 1, y: 2 }), &registry).unwrap();
        assert_eq!(encoded.tag, Tag::Key(MarshalKey::new(0)));

        match &encoded.payload {
            Payload::Fields(fields) => {
                assert!(matches!(fields["x"].payload, Payload::Int(1)));
                assert_eq!(fields["y"].tag, Tag::Plain);
            }
            other => panic!("unexpected payload {other:?}"),
        }

        let decoded = decode(encoded, &registry).unwrap();
        assert_eq!(decoded.downcast_ref::<Point>(), Some(&Point { x: 1, y: 2 }));
    }

    #[test]
    fn test_nested_objects_keep_identity() {
        let registry = registry();
        let segment = Segment {
            from: Point { x: 0, y: 0 },
            to: Point { x: 3, y: 4 },
        };
        let decoded = decode(encode(Value::object(segment), &registry).unwrap(), &registry)
            .unwrap()
            .into_object::<Segment>()
            .unwrap();
        assert_eq!(decoded.to, Point { x: 3, y: 4 });
    }

    #[test]
    fn test_map_keys_are_not_encoded() {
        let registry = registry();
        let map = Value::Map(vec![
            (Value::from("a"), Value::object(Point { x: 1, y: 1 })),
            (Value::from(2), Value::from(vec![1, 2])),
        ]);
        let encoded = encode(map, &registry).unwrap();
        assert_eq!(encoded.tag, Tag::Map);
        assert_eq!(encoded.tag.code(), Some(INTRINSIC_MAP));

        match &encoded.payload {
            Payload::Entries(entries) => {
                assert_eq!(entries[0].0, Value::from("a"));
                assert_eq!(entries[0].1.tag, Tag::Key(MarshalKey::new(0)));
            }
            other => panic!("unexpected payload {other:?}"),
        }

        let decoded = decode(encoded, &registry).unwrap();
        assert_eq!(
            decoded,
            Value::Map(vec![
                (Value::from("a"), Value::object(Point { x: 1, y: 1 })),
                (Value::from(2), Value::from(vec![1, 2])),
            ])
        );
    }

    #[test]
    fn test_ports_and_buffers_pass_through() {
        let registry = registry();
        let (left, _right) = port::pair();
        let id = left.id();

        let encoded = encode(Value::Port(left), &registry).unwrap();
        assert_eq!(encoded.tag.code(), Some(INTRINSIC_PORT));
        match decode(encoded, &registry).unwrap() {
            Value::Port(port) => assert_eq!(port.id(), id),
            other => panic!("unexpected value {other:?}"),
        }

        let bytes = Bytes::from_static(b"\x00\x01");
        let encoded = encode(Value::from(bytes.clone()), &registry).unwrap();
        assert_eq!(encoded.tag, Tag::Plain);
        assert_eq!(decode(encoded, &registry).unwrap(), Value::from(bytes));
    }

    #[test]
    fn test_unregistered_object_decodes_as_record() {
        let registry = MarshalRegistry::new();
        let decoded = decode(
            encode(Value::object(Point { x: 5, y: 6 }), &registry).unwrap(),
            &registry,
        )
        .unwrap();
        assert_eq!(
            decoded,
            Value::Record(Fields::new().with("x", 5).with("y", 6))
        );
    }

    #[test]
    fn test_unknown_key_keeps_fields() {
        let sender = registry();
        let receiver = MarshalRegistry::new();
        let encoded = encode(Value::object(Point { x: 1, y: 2 }), &sender).unwrap();

        let decoded = decode(encoded, &receiver).unwrap();
        assert_eq!(decoded, Value::Record(Fields::new().with("x", 1).with("y", 2)));
    }

    #[test]
    fn test_mismatched_tag_is_malformed() {
        let registry = registry();
        let encoded = Encoded {
            tag: Tag::Port,
            payload: Payload::Int(1),
        };
        let err = decode(encoded, &registry).unwrap_err();
        assert!(matches!(err, CodecError::Malformed { .. }));
        assert_eq!(
            err.to_string(),
            "Malformed encoding: tag -1000 cannot carry a primitive payload"
        );
    }

    #[test]
    fn test_rebuild_failure_surfaces() {
        let registry = registry();
        let encoded = Encoded {
            tag: Tag::Key(MarshalKey::new(0)),
            payload: Payload::Fields(BTreeMap::new()),
        };
        let err = decode(encoded, &registry).unwrap_err();
        assert!(matches!(err, CodecError::MissingField { .. }));
    }

    #[test]
    fn test_needs_encoding() {
        assert!(!needs_encoding(&Value::from(1)));
        assert!(!needs_encoding(&Value::from(Bytes::new())));
        assert!(needs_encoding(&Value::from(vec![1])));
        assert!(needs_encoding(&Value::object(Point { x: 0, y: 0 })));
    }
}
