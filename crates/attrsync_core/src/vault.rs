//! Durable, backoff-driven request delivery.
//!
//! A [`RequestVault`] guarantees that important requests are eventually
//! delivered, even across offline periods and process restarts. Requests
//! are persisted in a [`JobQueue`] before the first attempt; a single
//! worker thread drains the queue in deadline order, retrying transient
//! failures with exponential backoff and discarding requests the server
//! has permanently rejected (retrying those would only amplify load).
//!
//! The worker sleeps until the next deadline or an external wake signal,
//! whichever comes first: enqueueing an earlier job, opening the gate, or
//! shutdown all interrupt the sleep immediately.

use crate::clock::TimeKeeper;
use crate::config::VaultConfig;
use crate::error::SyncResult;
use crate::queue::{Job, JobQueue};
use crate::transport::{Request, Transport};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

struct VaultState {
    gate_open: bool,
    backoff: Duration,
    shutdown: bool,
}

struct VaultInner {
    queue: JobQueue,
    transport: Arc<dyn Transport>,
    time: Arc<TimeKeeper>,
    config: VaultConfig,
    state: Mutex<VaultState>,
    wake: Condvar,
}

/// Durable delivery vault with one background worker.
///
/// The vault lives for the whole process in production; [`shutdown`]
/// (also run on drop) exists so tests do not leak worker threads.
///
/// [`shutdown`]: RequestVault::shutdown
pub struct RequestVault {
    inner: Arc<VaultInner>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl RequestVault {
    /// Starts a vault over the given queue and spawns its worker.
    ///
    /// While `gate_open` is false the worker sleeps regardless of queued
    /// jobs; see [`set_gate`](Self::set_gate).
    pub fn start(
        queue: JobQueue,
        transport: Arc<dyn Transport>,
        time: Arc<TimeKeeper>,
        config: VaultConfig,
        gate_open: bool,
    ) -> Self {
        let min_backoff = config.min_backoff;
        let inner = Arc::new(VaultInner {
            queue,
            transport,
            time,
            config,
            state: Mutex::new(VaultState {
                gate_open,
                backoff: min_backoff,
                shutdown: false,
            }),
            wake: Condvar::new(),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = std::thread::Builder::new()
            .name("attrsync-vault".into())
            .spawn(move || Self::run(&worker_inner))
            .expect("failed to spawn vault worker");

        Self {
            inner,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Persists `request` and schedules it for delivery after `delay`.
    ///
    /// The request is durable once this returns; delivery is retried with
    /// backoff until it succeeds or is permanently rejected. If the new
    /// deadline precedes the one the worker is waiting on, the worker is
    /// woken.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SyncError::QueueFull`] if the queue is at capacity.
    pub fn enqueue(&self, request: Request, delay: Duration) -> SyncResult<()> {
        let not_before_ms = if delay.is_zero() {
            0
        } else {
            self.inner.time.monotonic_ms() + delay.as_millis() as i64
        };

        let previous = self.inner.queue.peek_next_not_before_ms();
        self.inner.queue.post(request, not_before_ms)?;
        if previous.is_none_or(|p| not_before_ms < p) {
            let _state = self.inner.state.lock();
            self.inner.wake.notify_all();
        }
        Ok(())
    }

    /// Opens or closes the delivery gate.
    ///
    /// A closed gate suspends delivery without dropping jobs; opening it
    /// wakes the worker immediately.
    pub fn set_gate(&self, open: bool) {
        let mut state = self.inner.state.lock();
        state.gate_open = open;
        self.inner.wake.notify_all();
    }

    /// The current retry backoff, for observability.
    #[must_use]
    pub fn current_backoff(&self) -> Duration {
        self.inner.state.lock().backoff
    }

    /// Number of jobs waiting for delivery.
    #[must_use]
    pub fn queued_jobs(&self) -> usize {
        self.inner.queue.len()
    }

    /// Stops the worker thread.
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            state.shutdown = true;
            self.inner.wake.notify_all();
        }
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }

    fn run(inner: &Arc<VaultInner>) {
        loop {
            {
                let mut state = inner.state.lock();
                loop {
                    if state.shutdown {
                        return;
                    }
                    let next = if state.gate_open {
                        inner.queue.peek_next_not_before_ms()
                    } else {
                        None
                    };
                    match next {
                        None => {
                            // Nothing to do (or gate closed): sleep until
                            // woken.
                            inner.wake.wait(&mut state);
                        }
                        Some(not_before_ms) => {
                            let now = inner.time.monotonic_ms();
                            if not_before_ms <= now {
                                break;
                            }
                            let timeout =
                                Duration::from_millis((not_before_ms - now) as u64);
                            let _ = inner.wake.wait_for(&mut state, timeout);
                        }
                    }
                }
            }

            // The state lock is released before touching the queue; this
            // worker is the queue's sole consumer so the job is still there.
            let Some(job) = inner.queue.take_next() else {
                continue;
            };
            Self::deliver(inner, job);
        }
    }

    fn deliver(inner: &Arc<VaultInner>, job: Job) {
        match inner.transport.execute(job.request()) {
            Ok(response) if response.is_success() => {
                tracing::debug!(job = %job.id(), "job delivered");
                inner.state.lock().backoff = inner.config.min_backoff;
            }
            Ok(response) => {
                tracing::warn!(
                    job = %job.id(),
                    status = response.status,
                    "job rejected by server, discarding"
                );
            }
            Err(err) if err.is_retryable() => {
                let delay = {
                    let mut state = inner.state.lock();
                    state.backoff = inner.config.next_backoff(state.backoff);
                    state.backoff
                };
                tracing::debug!(job = %job.id(), ?delay, "transient delivery failure, reposting");
                let not_before_ms = inner.time.monotonic_ms() + delay.as_millis() as i64;
                if let Err(err) = inner
                    .queue
                    .repost(job.with_not_before_ms(not_before_ms))
                {
                    tracing::error!(%err, "failed to repost job, dropping it");
                }
            }
            Err(err) => {
                tracing::warn!(job = %job.id(), %err, "permanent delivery failure, discarding");
            }
        }
    }
}

impl Drop for RequestVault {
    fn drop(&mut self) {
        self.shutdown();
    }
}
