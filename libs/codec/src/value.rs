//! The value model carried across worker boundaries
//!
//! `Value` is move-only: it may own a [`Port`], which is a non-copyable
//! handle, and live [`MarshalObject`] instances whose fields are consumed
//! when they are encoded.

use crate::error::{CodecError, Result};
use crate::port::Port;
use crate::word::SharedWord;
use bytes::Bytes;
use std::any::{type_name, Any};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

/// Opaque binary buffer, passed through the encoder untouched
#[derive(Debug, Clone)]
pub enum Buffer {
    /// Immutable bytes
    Bytes(Bytes),
    /// A shared-memory word; clones refer to the same cell
    Word(SharedWord),
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Buffer::Bytes(a), Buffer::Bytes(b)) => a == b,
            (Buffer::Word(a), Buffer::Word(b)) => a.same_cell(b),
            _ => false,
        }
    }
}

/// Named fields of a record or of a marshalled object
#[derive(Debug, Default, PartialEq)]
pub struct Fields {
    entries: BTreeMap<String, Value>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.entries.remove(name)
    }

    /// Remove a field and convert it, failing if it is absent
    ///
    /// `owner` names the type being rebuilt, for the error message.
    pub fn take<T: FromValue>(&mut self, name: &str, owner: &'static str) -> Result<T> {
        let value = self
            .entries
            .remove(name)
            .ok_or_else(|| CodecError::missing_field(name, owner))?;
        T::from_value(value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.entries.iter()
    }

    pub fn values(&self) -> btree_map::Values<'_, String, Value> {
        self.entries.values()
    }
}

impl IntoIterator for Fields {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Fields {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Access to the concrete type behind a trait object
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// A live instance whose type identity survives marshalling
///
/// Encoding consumes the instance into its fields. The runtime type is
/// looked up in the marshal registry to tag the encoded form.
pub trait MarshalObject: AsAny + fmt::Debug {
    /// Consume the instance into plain fields
    fn into_fields(self: Box<Self>) -> Result<Fields>;

    /// Name used in diagnostics
    fn type_name(&self) -> &'static str {
        type_name::<Self>()
    }

    /// Structural equality against another object, false unless overridden
    fn eq_object(&self, _other: &dyn MarshalObject) -> bool {
        false
    }

    /// Ports owned by this instance, for transfer bookkeeping
    fn transfer_ports(&self) -> Vec<crate::port::PortId> {
        Vec::new()
    }
}

/// A marshalled type that can be rebuilt from its fields
///
/// `from_fields` is the from-parts factory stored at registration; the
/// type's ordinary constructor is never re-run on the receiving side.
pub trait Marshal: MarshalObject + Sized {
    fn from_fields(fields: Fields) -> Result<Self>;
}

/// Equality helper for `MarshalObject::eq_object` implementations
pub fn object_eq<T: MarshalObject + PartialEq>(this: &T, other: &dyn MarshalObject) -> bool {
    other
        .as_any()
        .downcast_ref::<T>()
        .map_or(false, |other| this == other)
}

/// Dynamic value crossing an execution boundary
#[derive(Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Buffer(Buffer),
    Seq(Vec<Value>),
    /// Ordered map; keys are carried as-is
    Map(Vec<(Value, Value)>),
    /// Plain container without type identity
    Record(Fields),
    /// Live instance of a Rust type
    Object(Box<dyn MarshalObject>),
    /// Opaque communication handle
    Port(Port),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl Value {
    pub fn object<T: MarshalObject>(instance: T) -> Self {
        Value::Object(Box::new(instance))
    }

    pub fn record(fields: Fields) -> Self {
        Value::Record(fields)
    }

    /// Short name of the variant, for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Buffer(_) => "buffer",
            Value::Seq(_) => "sequence",
            Value::Map(_) => "map",
            Value::Record(_) => "record",
            Value::Object(_) => "object",
            Value::Port(_) => "port",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow the live object as `T`
    pub fn downcast_ref<T: MarshalObject>(&self) -> Option<&T> {
        match self {
            Value::Object(object) => object.as_ref().as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Take the live object out as `T`
    pub fn into_object<T: MarshalObject>(self) -> Result<T> {
        match self {
            Value::Object(object) => {
                let found = object.type_name();
                object
                    .into_any()
                    .downcast::<T>()
                    .map(|boxed| *boxed)
                    .map_err(|_| CodecError::type_mismatch(type_name::<T>(), found))
            }
            other => Err(CodecError::type_mismatch(type_name::<T>(), other.kind_name())),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Buffer(a), Value::Buffer(b)) => a == b,
            (Value::Seq(a), Value::Seq(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.eq_object(b.as_ref()),
            (Value::Port(a), Value::Port(b)) => a.id() == b.id(),
            _ => false,
        }
    }
}

macro_rules! value_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for Value {
                fn from(value: $source) -> Self {
                    Value::$variant(value.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i8 => Int,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u8 => Int,
    u16 => Int,
    u32 => Int,
    f32 => Float,
    f64 => Float,
    String => String,
    &str => String,
    Bytes => Buffer,
    SharedWord => Buffer,
    Buffer => Buffer,
    Fields => Record,
    Port => Port,
}

impl From<Bytes> for Buffer {
    fn from(bytes: Bytes) -> Self {
        Buffer::Bytes(bytes)
    }
}

impl From<SharedWord> for Buffer {
    fn from(word: SharedWord) -> Self {
        Buffer::Word(word)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::Seq(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Conversion out of a [`Value`]
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl FromValue for () {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(()),
            other => Err(CodecError::type_mismatch("null", other.kind_name())),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(CodecError::type_mismatch("bool", other.kind_name())),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Int(i) => Ok(i),
            other => Err(CodecError::type_mismatch("int", other.kind_name())),
        }
    }
}

macro_rules! from_value_narrowing {
    ($($target:ty),* $(,)?) => {
        $(
            impl FromValue for $target {
                fn from_value(value: Value) -> Result<Self> {
                    let wide = i64::from_value(value)?;
                    <$target>::try_from(wide)
                        .map_err(|_| CodecError::type_mismatch(stringify!($target), "int out of range"))
                }
            }
        )*
    };
}

from_value_narrowing!(i32, u32, u64, usize);

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as f64),
            other => Err(CodecError::type_mismatch("float", other.kind_name())),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(CodecError::type_mismatch("string", other.kind_name())),
        }
    }
}

impl FromValue for Bytes {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Buffer(Buffer::Bytes(bytes)) => Ok(bytes),
            other => Err(CodecError::type_mismatch("bytes", other.kind_name())),
        }
    }
}

impl FromValue for SharedWord {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Buffer(Buffer::Word(word)) => Ok(word),
            other => Err(CodecError::type_mismatch("shared word", other.kind_name())),
        }
    }
}

impl FromValue for Fields {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Record(fields) => Ok(fields),
            other => Err(CodecError::type_mismatch("record", other.kind_name())),
        }
    }
}

impl FromValue for Port {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Port(port) => Ok(port),
            other => Err(CodecError::type_mismatch("port", other.kind_name())),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Seq(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(CodecError::type_mismatch("sequence", other.kind_name())),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
