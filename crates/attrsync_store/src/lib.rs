//! # attrsync Store
//!
//! Persistent key-value store trait and backends for attrsync.
//!
//! Every attrsync component persists its state as one named string blob per
//! key. Stores are **opaque blob stores**: they do not interpret the values
//! they hold, and each key's read-modify-write is serialized internally, so
//! no cross-component transaction is needed (components own disjoint keys).
//!
//! ## Available Backends
//!
//! - [`InMemoryStore`] - For testing and ephemeral state
//! - [`FileStore`] - Durable storage in a single JSON file, written
//!   atomically via rename
//!
//! ## Example
//!
//! ```rust
//! use attrsync_store::{InMemoryStore, KeyValueStore};
//!
//! let store = InMemoryStore::new();
//! store.put("clock:offset", "42").unwrap();
//! assert_eq!(store.get("clock:offset").unwrap().as_deref(), Some("42"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use store::KeyValueStore;
