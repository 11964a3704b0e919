//! # Spindle Codec - Value Marshalling Across Worker Boundaries
//!
//! ## Purpose
//!
//! The data layer shared by every worker: the dynamic [`Value`] model, the
//! registry of marshalled types, the tagged encoder that restores type
//! identity on the far side, and the port primitive messages travel over.
//!
//! ## Architecture Role
//!
//! ```text
//! live Value ──encode──▶ Encoded ──port──▶ Encoded ──decode──▶ live Value
//!      │                   ▲                                      ▲
//!      └─ transfer scan    └──────── MarshalRegistry ─────────────┘
//! ```
//!
//! ## What This Crate Contains
//! - [`Value`], [`Fields`] and the [`MarshalObject`] / [`Marshal`] traits
//! - [`MarshalRegistry`]: append-only type ↔ key table
//! - [`MarshalEncoder`]: recursive encode/decode with intrinsic tags
//! - [`collect_transfers`]: ports reachable from a value
//! - [`port::pair`]: connected in-process endpoints
//! - [`SharedWord`]: the shared-memory cell behind the mutex
//!
//! ## What This Crate Does NOT Contain
//! - Worker lifecycle, RPC or channels (see the `spindle` crate)
//! - Thread launching

pub mod encoder;
pub mod error;
pub mod port;
pub mod reflect;
pub mod registry;
pub mod transfer;
pub mod value;
pub mod word;

pub use encoder::{decode, encode, Encoded, MarshalEncoder, Payload, Tag};
pub use error::{CodecError, Result};
pub use port::{Port, PortId, PortReader, PortWriter};
pub use reflect::ValueKind;
pub use registry::{MarshalKey, MarshalRegistry, TypeDescriptor};
pub use transfer::collect_transfers;
pub use value::{object_eq, AsAny, Buffer, Fields, FromValue, Marshal, MarshalObject, Value};
pub use word::SharedWord;
