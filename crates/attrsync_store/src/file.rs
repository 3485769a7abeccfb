//! File-based store backend for persistent storage.

use crate::error::StoreResult;
use crate::store::KeyValueStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// A file-based key-value store.
///
/// All entries live in a single JSON file. Every mutation rewrites the file
/// through a temporary sibling followed by an atomic rename, so a crash mid
/// write leaves the previous snapshot intact.
///
/// # Durability
///
/// - every `put`/`remove` writes the snapshot and calls `sync_all`
/// - the rename makes the new snapshot visible atomically
///
/// # Thread Safety
///
/// This store is thread-safe; a single lock serializes all access.
///
/// # Example
///
/// ```no_run
/// use attrsync_store::{FileStore, KeyValueStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("attrsync.json")).unwrap();
/// store.put("clock:offset", "42").unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Opens or creates a file store at the given path.
    ///
    /// A missing file starts the store empty. A present but unreadable
    /// snapshot also starts the store empty: persisted state is best-effort
    /// and corruption must never propagate as a crash.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let inner = match File::open(path) {
            Ok(mut file) => {
                let mut contents = String::new();
                file.read_to_string(&mut contents)?;
                match serde_json::from_str::<HashMap<String, String>>(&contents) {
                    Ok(map) => map,
                    Err(err) => {
                        tracing::warn!(path = %path.display(), %err, "discarding corrupt store snapshot");
                        HashMap::new()
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(inner),
        })
    }

    /// Opens or creates a file store, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot
    /// be read.
    pub fn open_with_create_dirs(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &HashMap<String, String>) -> StoreResult<()> {
        let tmp_path = self.path.with_extension("tmp");
        let contents = serde_json::to_string(data)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.inner.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut data = self.inner.lock();
        data.insert(key.to_owned(), value.to_owned());
        self.persist(&data)
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let mut data = self.inner.lock();
        if data.remove(key).is_some() {
            self.persist(&data)?;
        }
        Ok(())
    }
}
