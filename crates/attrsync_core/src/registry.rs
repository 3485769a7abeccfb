//! Process-wide registry of per-entity reconciliation engines.

use crate::error::SyncResult;
use crate::sync::{EntitySync, PatchServer, SyncDelegate};
use attrsync_document::Document;
use attrsync_store::KeyValueStore;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

const INDEX_KEY: &str = "sync_state:index";

/// Callback invoked when an entity schedules a patch call, so the
/// application can arrange a flush (typically after a write-coalescing
/// delay).
pub type ScheduleHook = Box<dyn Fn(&str) + Send + Sync>;

/// Executes patch calls for named entities.
///
/// The registry cannot know how patch requests are addressed; the
/// application bridges this to its transport (directly, or through the
/// delivery vault for durability-critical traffic).
pub trait EntityPatchServer {
    /// Sends `diff` for the given entity.
    ///
    /// # Errors
    ///
    /// Any error counts as a failed delivery for that entity.
    fn patch_entity(&self, entity_id: &str, diff: &Document) -> SyncResult<()>;
}

/// Adapts an [`EntityPatchServer`] to one entity's [`PatchServer`] seam.
struct ForEntity<'a> {
    server: &'a dyn EntityPatchServer,
    entity_id: &'a str,
}

impl PatchServer for ForEntity<'_> {
    fn patch(&self, diff: &Document) -> SyncResult<()> {
        self.server.patch_entity(self.entity_id, diff)
    }
}

/// Persists one entity's reconciliation state under its store key.
struct StoreDelegate {
    store: Arc<dyn KeyValueStore>,
    key: String,
    entity_id: String,
    hook: Arc<RwLock<Option<ScheduleHook>>>,
}

impl SyncDelegate for StoreDelegate {
    fn persist(&self, state: &serde_json::Value) {
        match serde_json::to_string(state) {
            Ok(serialized) => {
                if let Err(err) = self.store.put(&self.key, &serialized) {
                    tracing::warn!(entity = %self.entity_id, %err, "failed to persist sync state");
                }
            }
            Err(err) => {
                tracing::error!(entity = %self.entity_id, %err, "failed to serialize sync state");
            }
        }
    }

    fn schedule_patch_call(&self) {
        if let Some(hook) = self.hook.read().as_ref() {
            hook(&self.entity_id);
        } else {
            tracing::debug!(entity = %self.entity_id, "patch call scheduled, no flush hook set");
        }
    }
}

/// Registry of reconciliation engines, one per synchronized entity.
///
/// Entities are restored from the store at construction and created empty
/// on first use. Instances live for the whole process.
pub struct SyncRegistry {
    store: Arc<dyn KeyValueStore>,
    entities: Mutex<HashMap<String, Arc<EntitySync>>>,
    hook: Arc<RwLock<Option<ScheduleHook>>>,
}

impl SyncRegistry {
    /// Opens the registry, restoring every known entity.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let registry = Self {
            store,
            entities: Mutex::new(HashMap::new()),
            hook: Arc::new(RwLock::new(None)),
        };
        for entity_id in registry.read_index() {
            let _ = registry.for_entity(&entity_id);
        }
        registry
    }

    /// Sets the callback invoked when an entity schedules a patch call.
    ///
    /// Replaces any previous hook. The hook also fires for calls that were
    /// pending when the registry was restored.
    pub fn set_schedule_hook(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.hook.write() = Some(Box::new(hook));
    }

    /// Returns the engine for `entity_id`, restoring or creating it.
    pub fn for_entity(&self, entity_id: &str) -> Arc<EntitySync> {
        let mut entities = self.entities.lock();
        if let Some(sync) = entities.get(entity_id) {
            return Arc::clone(sync);
        }

        let key = state_key(entity_id);
        let delegate = Arc::new(StoreDelegate {
            store: Arc::clone(&self.store),
            key: key.clone(),
            entity_id: entity_id.to_owned(),
            hook: Arc::clone(&self.hook),
        });

        let sync = match self.store.get(&key) {
            Ok(Some(serialized)) => match serde_json::from_str(&serialized) {
                Ok(saved) => Arc::new(EntitySync::from_saved_state(delegate, &saved)),
                Err(err) => {
                    tracing::warn!(entity = entity_id, %err, "corrupt sync state, starting empty");
                    Arc::new(EntitySync::new(delegate))
                }
            },
            Ok(None) => Arc::new(EntitySync::new(delegate)),
            Err(err) => {
                tracing::warn!(entity = entity_id, %err, "failed to read sync state, starting empty");
                Arc::new(EntitySync::new(delegate))
            }
        };

        entities.insert(entity_id.to_owned(), Arc::clone(&sync));
        self.write_index(entities.keys());
        sync
    }

    /// The ids of all known entities.
    #[must_use]
    pub fn entity_ids(&self) -> Vec<String> {
        self.entities.lock().keys().cloned().collect()
    }

    /// Performs the scheduled patch call of every entity that has one.
    pub fn flush_all(&self, server: &dyn EntityPatchServer) {
        tracing::debug!("flushing scheduled patch calls for all known entities");
        let entities: Vec<(String, Arc<EntitySync>)> = self
            .entities
            .lock()
            .iter()
            .map(|(id, sync)| (id.clone(), Arc::clone(sync)))
            .collect();
        for (entity_id, sync) in entities {
            sync.perform_scheduled_patch_call(&ForEntity {
                server,
                entity_id: &entity_id,
            });
        }
    }

    fn read_index(&self) -> Vec<String> {
        match self.store.get(INDEX_KEY) {
            Ok(Some(serialized)) => match serde_json::from_str(&serialized) {
                Ok(ids) => ids,
                Err(err) => {
                    tracing::warn!(%err, "discarding corrupt entity index");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                tracing::warn!(%err, "failed to read entity index");
                Vec::new()
            }
        }
    }

    fn write_index<'a>(&self, ids: impl Iterator<Item = &'a String>) {
        let mut ids: Vec<&String> = ids.collect();
        ids.sort();
        match serde_json::to_string(&ids) {
            Ok(serialized) => {
                if let Err(err) = self.store.put(INDEX_KEY, &serialized) {
                    tracing::warn!(%err, "failed to persist entity index");
                }
            }
            Err(err) => {
                tracing::error!(%err, "failed to serialize entity index");
            }
        }
    }
}

fn state_key(entity_id: &str) -> String {
    format!("sync_state:{entity_id}")
}
