//! Registry of marshalled types
//!
//! Keys are assigned in registration order starting at 0. Every process
//! that exchanges tagged values must register the same types in the same
//! order, which holds when all of them run the same startup code.

use crate::error::{CodecError, Result};
use crate::value::{Fields, Marshal, MarshalObject, Value};
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Key identifying a marshalled type across execution units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarshalKey(u32);

impl MarshalKey {
    pub const fn new(key: u32) -> Self {
        Self(key)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for MarshalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rebuilds a live instance from decoded fields without running its constructor
pub type Factory = fn(Fields) -> Result<Box<dyn MarshalObject>>;

/// Everything the encoder needs to know about one registered type
#[derive(Clone)]
pub struct TypeDescriptor {
    pub key: MarshalKey,
    pub name: &'static str,
    pub type_id: TypeId,
    pub factory: Factory,
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("key", &self.key)
            .field("name", &self.name)
            .finish()
    }
}

fn rebuild<T: Marshal>(fields: Fields) -> Result<Box<dyn MarshalObject>> {
    Ok(Box::new(T::from_fields(fields)?))
}

#[derive(Debug, Default)]
pub struct MarshalRegistry {
    types: Vec<TypeDescriptor>,
    keys: HashMap<TypeId, MarshalKey>,
}

impl MarshalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under the next free key
    pub fn register<T: Marshal>(&mut self) -> Result<MarshalKey> {
        let type_id = TypeId::of::<T>();
        if let Some(&key) = self.keys.get(&type_id) {
            return Err(CodecError::DuplicateRegistration {
                type_name: type_name::<T>(),
                key,
            });
        }

        let key = MarshalKey::new(self.types.len() as u32);
        self.types.push(TypeDescriptor {
            key,
            name: type_name::<T>(),
            type_id,
            factory: rebuild::<T>,
        });
        self.keys.insert(type_id, key);

        debug!(key = %key, type_name = type_name::<T>(), "Registered marshalled type");
        Ok(key)
    }

    pub fn key_for<T: 'static>(&self) -> Option<MarshalKey> {
        self.key_for_type(TypeId::of::<T>())
    }

    pub fn key_for_type(&self, type_id: TypeId) -> Option<MarshalKey> {
        self.keys.get(&type_id).copied()
    }

    pub fn descriptor(&self, key: MarshalKey) -> Option<&TypeDescriptor> {
        self.types.get(key.get() as usize)
    }

    /// Look up the descriptor for a key, failing for keys never registered here
    pub fn type_for(&self, key: MarshalKey) -> Result<&TypeDescriptor> {
        self.descriptor(key)
            .ok_or(CodecError::UnknownMarshalKey { key })
    }

    pub fn is_registered<T: 'static>(&self) -> bool {
        self.keys.contains_key(&TypeId::of::<T>())
    }

    /// Key of a live object's runtime type, if that type is registered
    pub fn key_of(&self, object: &dyn MarshalObject) -> Option<MarshalKey> {
        self.key_for_type(object.as_any().type_id())
    }

    /// Whether the value, or anything reachable through plain records,
    /// sequences or map values, is an instance of a registered type
    ///
    /// Buffers are never marshalled. An unregistered object cannot be
    /// inspected without consuming it and counts as plain data.
    pub fn is_transitively_marshalled(&self, value: &Value) -> bool {
        match value {
            Value::Object(object) => self.key_of(object.as_ref()).is_some(),
            Value::Record(fields) => fields
                .values()
                .any(|field| self.is_transitively_marshalled(field)),
            Value::Seq(items) => items.iter().any(|item| self.is_transitively_marshalled(item)),
            Value::Map(entries) => entries
                .iter()
                .any(|(_, entry)| self.is_transitively_marshalled(entry)),
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
