//! # attrsync Core
//!
//! Client-side state synchronization with a remote attribute store.
//!
//! This crate provides:
//! - Per-entity state reconciliation ([`EntitySync`], [`SyncRegistry`])
//! - Durable, backoff-driven request delivery ([`RequestVault`])
//! - Clock synchronization against server time ([`TimeKeeper`])
//! - Sliding-window rate limiting ([`RateLimiter`])
//! - Transport abstraction ([`Transport`])
//!
//! ## Architecture
//!
//! Application mutations enter a per-entity reconciliation engine, which
//! keeps the local view, the last server-acknowledged view, and pending
//! change accumulators consistent, and schedules **patch calls** carrying
//! minimal diffs. Durability-critical requests are handed to the delivery
//! vault, which persists them before the first attempt and retries with
//! exponential backoff until the server accepts or permanently rejects
//! them.
//!
//! ## Key Invariants
//!
//! - The server is the single arbiter of truth
//! - The sdk state always equals the server state plus unacknowledged
//!   local writes
//! - At most one patch call is in flight per entity
//! - A locally applied mutation is never lost, across failures, offline
//!   periods, and process death
//! - Patch application is idempotent server-side; repeated delivery of the
//!   same request is keyed by a stable idempotency identifier
//!
//! No failure of this machinery is surfaced to the application: persistence
//! and diff/merge problems are logged and absorbed, and delivery failures
//! resolve into either retry or discard inside the vault.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod error;
mod queue;
mod ratelimit;
mod registry;
mod sync;
mod transport;
mod vault;

pub use clock::{Clock, MockClock, SystemClock, TimeKeeper, TimeSource};
pub use config::VaultConfig;
pub use error::{SyncError, SyncResult};
pub use queue::{Job, JobQueue};
pub use ratelimit::{RateLimit, RateLimiter};
pub use registry::{EntityPatchServer, ScheduleHook, SyncRegistry};
pub use sync::{EntitySync, PatchServer, SyncDelegate};
pub use transport::{Method, MockTransport, Request, Response, Transport};
pub use vault::RequestVault;
