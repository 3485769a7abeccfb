//! In-memory store backend for testing.

use crate::error::StoreResult;
use crate::store::KeyValueStore;
use parking_lot::RwLock;
use std::collections::HashMap;

/// An in-memory key-value store.
///
/// This backend keeps all values in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral state that does not need to survive restarts
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use attrsync_store::{InMemoryStore, KeyValueStore};
///
/// let store = InMemoryStore::new();
/// store.put("key", "value").unwrap();
/// assert_eq!(store.get("key").unwrap().as_deref(), Some("value"));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with data.
    ///
    /// Useful for testing restore scenarios.
    #[must_use]
    pub fn with_data(data: HashMap<String, String>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of all stored entries.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn data(&self) -> HashMap<String, String> {
        self.data.read().clone()
    }

    /// Clears all stored entries.
    pub fn clear(&self) {
        self.data.write().clear();
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> StoreResult<()> {
        self.data.write().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.data.write().remove(key);
        Ok(())
    }
}
