//! Key-value store trait definition.

use crate::error::StoreResult;

/// A durable, synchronous key-value store of string blobs.
///
/// Stores are **opaque blob stores**: values are uninterpreted strings and
/// each component of attrsync owns a disjoint set of keys.
///
/// # Invariants
///
/// - `get` returns exactly the value previously `put` under that key
/// - after `put` returns, the value survives process termination
/// - each key's read-modify-write is serialized by the implementation
/// - stores must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be read.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// After this returns successfully the value is durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be made durable.
    fn put(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Removes the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cannot be made durable.
    fn remove(&self, key: &str) -> StoreResult<()>;
}
