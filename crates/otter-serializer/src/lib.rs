//! # Otter Serializer
//!
//! Linearizes heap object graphs into a tagged byte stream and rebuilds
//! them in another isolate or a later process.
//!
//! ## Design
//!
//! - **Walk**: one graph walk ([`BaseSerializer`]) with per-policy hooks
//!   for cloned values ([`ValueSerializer`]) and module snapshots
//!   ([`ModuleSerializer`])
//! - **References**: objects get an index on first visit; later visits
//!   emit a back-reference, so cycles and shared sub-graphs survive
//! - **Placement**: the serializer records where regions fill up so the
//!   deserializer can reserve every region up front and bump-allocate in
//!   stream order
//! - **Foreign callbacks**: native detach/attach calls run after the walk,
//!   outside managed state
//!
//! ## Example
//!
//! ```ignore
//! let mut serializer = ValueSerializer::new(&mut sender);
//! serializer.write_value(value, TaggedValue::UNDEFINED, TaggedValue::UNDEFINED)?;
//! let mut data = serializer.release();
//! let copy = BaseDeserializer::new(&mut receiver, &mut data).read_value()?;
//! ```

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod data;
pub mod deserializer;
pub mod encode;
pub mod error;
pub mod serializer;

pub use config::SerializeConfig;
pub use data::{POOL_COUNT, SIZE_GROUP_LEN, SerializeData, persisted_pools};
pub use deserializer::{BaseDeserializer, CrossVmBridge, InterOpValueDeserializer, ModuleDeserializer};
pub use encode::{EncodeFlag, SerializedObjectSpace};
pub use error::{DeserializeError, DeserializeResult, SerializeError, SerializeResult};
pub use serializer::{BaseSerializer, ModuleSerializer, ValueSerializer};
