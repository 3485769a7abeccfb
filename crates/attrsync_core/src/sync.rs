//! Per-entity state reconciliation against the remote attribute store.
//!
//! Each synchronized entity owns four documents plus the diff currently in
//! flight:
//!
//! - `sdk_state` - the client's authoritative view
//! - `server_state` - the last content the server acknowledged
//! - `put_accumulator` - local mutations not yet sent in any patch
//! - `inflight_diff` - the body of the patch currently in flight
//! - `inflight_put_accumulator` - the accumulator as of the moment the
//!   in-flight patch was issued, folded back if the patch fails
//!
//! Invariants: `sdk_state` always equals `server_state` merged with the
//! not-yet-acknowledged local writes; at most one patch call is in flight
//! per entity; every mutation is applied to state and accumulator inside
//! one mutual-exclusion section and persisted before the lock is released.

use crate::error::SyncResult;
use attrsync_document::{diff, merge, strip_nulls, Document, NullMode};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const SAVED_STATE_VERSION: u32 = 2;

/// Collaborator callbacks of an [`EntitySync`].
///
/// Implementations must not call back into the engine from these methods;
/// they run while the caller's turn is still in progress.
pub trait SyncDelegate: Send + Sync {
    /// Persists the serialized reconciliation state.
    ///
    /// Called after every mutation. Persistence failures must be absorbed
    /// (logged) by the implementation; the engine never sees them.
    fn persist(&self, state: &serde_json::Value);

    /// Signals that a patch call is due.
    ///
    /// The application decides when to actually flush, typically by calling
    /// [`EntitySync::perform_scheduled_patch_call`] after a short
    /// write-coalescing delay.
    fn schedule_patch_call(&self);
}

/// Executes a single patch call against the remote record.
pub trait PatchServer {
    /// Sends `diff` to the server.
    ///
    /// # Errors
    ///
    /// Any error counts as a failed delivery; the engine folds the
    /// in-flight accumulator back and reschedules.
    fn patch(&self, diff: &Document) -> SyncResult<()>;
}

#[derive(Debug, Default)]
struct SyncState {
    sdk_state: Document,
    server_state: Document,
    put_accumulator: Document,
    inflight_diff: Document,
    inflight_put_accumulator: Document,
    scheduled_patch_call: bool,
    inflight_patch_call: bool,
}

/// Persisted form of the reconciliation state.
#[derive(Debug, Serialize, Deserialize)]
struct SavedState {
    version: u32,
    #[serde(default)]
    sdk_state: Document,
    #[serde(default)]
    server_state: Document,
    #[serde(default)]
    put_accumulator: Document,
    #[serde(default)]
    inflight_diff: Document,
    #[serde(default)]
    inflight_put_accumulator: Document,
    #[serde(default)]
    scheduled_patch_call: bool,
    #[serde(default)]
    inflight_patch_call: bool,
}

/// State reconciliation engine for one synchronized entity.
pub struct EntitySync {
    delegate: Arc<dyn SyncDelegate>,
    state: Mutex<SyncState>,
}

impl EntitySync {
    /// Creates an engine with empty state.
    pub fn new(delegate: Arc<dyn SyncDelegate>) -> Self {
        Self {
            delegate,
            state: Mutex::new(SyncState::default()),
        }
    }

    /// Restores an engine from a previously persisted state.
    ///
    /// A malformed blob, or one written by a future format version, restores
    /// as empty: persisted state is best-effort and corruption must never
    /// propagate as a crash. If the saved state records a patch call that
    /// was in flight when the process died, that call is treated as failed
    /// so its writes are folded back and rescheduled.
    pub fn from_saved_state(delegate: Arc<dyn SyncDelegate>, saved: &serde_json::Value) -> Self {
        let parsed = match serde_json::from_value::<SavedState>(saved.clone()) {
            Ok(parsed) if parsed.version <= SAVED_STATE_VERSION => Some(parsed),
            Ok(parsed) => {
                tracing::warn!(
                    version = parsed.version,
                    "saved sync state has an unknown future version, starting empty"
                );
                None
            }
            Err(err) => {
                tracing::warn!(%err, "failed to restore sync state, starting empty");
                None
            }
        };

        let engine = match parsed {
            None => Self::new(delegate),
            Some(parsed) => {
                let mut state = SyncState {
                    sdk_state: parsed.sdk_state,
                    server_state: parsed.server_state,
                    put_accumulator: parsed.put_accumulator,
                    inflight_diff: parsed.inflight_diff,
                    inflight_put_accumulator: parsed.inflight_put_accumulator,
                    scheduled_patch_call: parsed.scheduled_patch_call,
                    inflight_patch_call: parsed.inflight_patch_call,
                };
                strip_nulls(&mut state.sdk_state);
                strip_nulls(&mut state.server_state);
                Self {
                    delegate,
                    state: Mutex::new(state),
                }
            }
        };

        if engine.has_inflight_patch_call() {
            // The process died while a patch was in flight; its fate is
            // unknown, so recover as a failure. Patch application is
            // idempotent server-side, a duplicate delivery is harmless.
            engine.on_patch_failure();
        }

        engine
    }

    /// Returns a copy of the client's current authoritative view.
    #[must_use]
    pub fn sdk_state(&self) -> Document {
        self.state.lock().sdk_state.clone()
    }

    /// Merges a local mutation into the entity.
    ///
    /// Applies `delta` to the sdk state and the put accumulator, persists,
    /// and schedules a patch call. Never fails: document-level problems are
    /// logged and the entity stays internally consistent.
    pub fn put(&self, delta: &Document) {
        {
            let mut state = self.state.lock();
            let state = &mut *state;
            merge(&mut state.sdk_state, delta, NullMode::Remove);
            merge(&mut state.put_accumulator, delta, NullMode::Keep);
            state.scheduled_patch_call = true;
            self.save(state);
        }
        self.delegate.schedule_patch_call();
    }

    /// Replaces the last-known server state with `server_state`.
    ///
    /// The diff is the server's own view, so the sdk state and accumulators
    /// are left untouched; the next patch call reconciles any divergence.
    pub fn receive_server_state(&self, server_state: &Document) {
        {
            let mut state = self.state.lock();
            state.server_state = server_state.clone();
            strip_nulls(&mut state.server_state);
            state.scheduled_patch_call = true;
            self.save(&state);
        }
        self.delegate.schedule_patch_call();
    }

    /// Receives a full state refresh from the server.
    ///
    /// With `reset_sdk_state` the refresh supersedes all pending local
    /// intent (for example right after an identity switch) and the
    /// accumulator is dropped. Otherwise in-flight and pending local writes
    /// are re-applied on top so nothing unacknowledged is lost.
    pub fn receive_state(&self, received: &Document, reset_sdk_state: bool) {
        {
            let mut state = self.state.lock();
            let state = &mut *state;
            state.server_state = received.clone();
            strip_nulls(&mut state.server_state);
            state.sdk_state = state.server_state.clone();
            if reset_sdk_state {
                state.put_accumulator = Document::new();
            } else {
                merge(&mut state.sdk_state, &state.inflight_diff, NullMode::Remove);
                merge(&mut state.sdk_state, &state.put_accumulator, NullMode::Remove);
            }
            state.scheduled_patch_call = true;
            self.save(state);
        }
        self.delegate.schedule_patch_call();
    }

    /// Receives a server-authoritative diff.
    ///
    /// The diff is merged into the last-known server state (it already
    /// happened server-side, by contract) and then applied locally like a
    /// [`put`](Self::put).
    pub fn receive_diff(&self, delta: &Document) {
        {
            let mut state = self.state.lock();
            let state = &mut *state;
            merge(&mut state.server_state, delta, NullMode::Remove);
            merge(&mut state.sdk_state, delta, NullMode::Remove);
            merge(&mut state.put_accumulator, delta, NullMode::Keep);
            state.scheduled_patch_call = true;
            self.save(state);
        }
        self.delegate.schedule_patch_call();
    }

    /// Returns true if a patch call is due.
    #[must_use]
    pub fn has_scheduled_patch_call(&self) -> bool {
        self.state.lock().scheduled_patch_call
    }

    /// Returns true if a patch call is currently in flight.
    #[must_use]
    pub fn has_inflight_patch_call(&self) -> bool {
        self.state.lock().inflight_patch_call
    }

    /// Performs the scheduled patch call, if any.
    ///
    /// Returns true if a call was scheduled. The actual network call runs
    /// outside the entity lock, so mutations arriving meanwhile are captured
    /// by the fresh accumulator and folded into the next patch.
    pub fn perform_scheduled_patch_call(&self, server: &dyn PatchServer) -> bool {
        if self.has_scheduled_patch_call() {
            self.call_patch(server);
            true
        } else {
            false
        }
    }

    fn call_patch(&self, server: &dyn PatchServer) {
        enum Action {
            Send(Document),
            Rescheduled,
            Nothing,
        }

        let action = {
            let mut state = self.state.lock();
            let state = &mut *state;
            if state.inflight_patch_call {
                let action = if state.scheduled_patch_call {
                    tracing::debug!("patch call already inflight, and already scheduled");
                    Action::Nothing
                } else {
                    tracing::debug!("patch call already inflight, scheduling another");
                    state.scheduled_patch_call = true;
                    Action::Rescheduled
                };
                self.save(state);
                action
            } else {
                state.scheduled_patch_call = false;

                state.inflight_diff = diff(&state.server_state, &state.sdk_state);
                if state.inflight_diff.is_empty() {
                    tracing::debug!("no diff to send to server");
                    self.save(state);
                    Action::Nothing
                } else {
                    state.inflight_patch_call = true;

                    // From here on, new mutations accumulate separately; the
                    // saved copy is folded back if this call fails.
                    state.inflight_put_accumulator = state.put_accumulator.clone();
                    state.put_accumulator = Document::new();

                    self.save(state);
                    Action::Send(state.inflight_diff.clone())
                }
            }
        };

        match action {
            Action::Send(patch_body) => match server.patch(&patch_body) {
                Ok(()) => self.on_patch_success(),
                Err(err) => {
                    tracing::warn!(%err, "patch call failed");
                    self.on_patch_failure();
                }
            },
            Action::Rescheduled => self.delegate.schedule_patch_call(),
            Action::Nothing => {}
        }
    }

    fn on_patch_success(&self) {
        let mut state = self.state.lock();
        let state = &mut *state;
        state.inflight_patch_call = false;
        state.inflight_put_accumulator = Document::new();
        merge(&mut state.server_state, &state.inflight_diff, NullMode::Remove);
        state.inflight_diff = Document::new();
        self.save(state);
    }

    fn on_patch_failure(&self) {
        {
            let mut state = self.state.lock();
            let state = &mut *state;
            state.inflight_patch_call = false;
            // Writes made while the failed call was in flight win over the
            // ones it carried.
            merge(
                &mut state.inflight_put_accumulator,
                &state.put_accumulator,
                NullMode::Keep,
            );
            state.put_accumulator = std::mem::take(&mut state.inflight_put_accumulator);
            state.scheduled_patch_call = true;
            self.save(state);
        }
        self.delegate.schedule_patch_call();
    }

    fn save(&self, state: &SyncState) {
        let saved = SavedState {
            version: SAVED_STATE_VERSION,
            sdk_state: state.sdk_state.clone(),
            server_state: state.server_state.clone(),
            put_accumulator: state.put_accumulator.clone(),
            inflight_diff: state.inflight_diff.clone(),
            inflight_put_accumulator: state.inflight_put_accumulator.clone(),
            scheduled_patch_call: state.scheduled_patch_call,
            inflight_patch_call: state.inflight_patch_call,
        };
        match serde_json::to_value(&saved) {
            Ok(value) => self.delegate.persist(&value),
            Err(err) => {
                tracing::error!(%err, "failed to serialize sync state for saving");
            }
        }
    }
}
