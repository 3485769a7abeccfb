//! Persisted, deadline-ordered delivery job queue.

use crate::error::{SyncError, SyncResult};
use crate::transport::Request;
use attrsync_store::KeyValueStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// A queued delivery job: a request plus a "not before" deadline on the
/// monotonic clock.
#[derive(Debug, Clone)]
pub struct Job {
    id: Uuid,
    request: Request,
    not_before_ms: i64,
}

impl Job {
    /// The job's unique identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The request this job will deliver.
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Earliest monotonic time at which this job may run.
    #[must_use]
    pub fn not_before_ms(&self) -> i64 {
        self.not_before_ms
    }

    /// Returns this job with a new deadline, used when reposting after a
    /// transient failure.
    #[must_use]
    pub fn with_not_before_ms(mut self, not_before_ms: i64) -> Self {
        self.not_before_ms = not_before_ms;
        self
    }
}

/// Persisted form of a job.
///
/// The deadline is deliberately absent: a retry delay is not meant to
/// survive process death, so restored jobs are immediately eligible.
#[derive(Debug, Serialize, Deserialize)]
struct SavedJob {
    id: Uuid,
    request: Request,
}

/// A capacity-bounded job queue, ordered by deadline with ties broken by
/// insertion order, persisted on every mutation.
pub struct JobQueue {
    store: Arc<dyn KeyValueStore>,
    key: String,
    capacity: usize,
    jobs: Mutex<Vec<Job>>,
}

impl JobQueue {
    /// Opens the named queue, restoring any persisted jobs.
    ///
    /// Each persisted entry is restored independently; a malformed entry is
    /// logged and skipped rather than poisoning the whole queue.
    pub fn new(store: Arc<dyn KeyValueStore>, name: &str, capacity: usize) -> Self {
        let key = format!("request_vault:{name}");
        let jobs = Self::restore(store.as_ref(), &key);
        Self {
            store,
            key,
            capacity,
            jobs: Mutex::new(jobs),
        }
    }

    fn restore(store: &dyn KeyValueStore, key: &str) -> Vec<Job> {
        let serialized = match store.get(key) {
            Ok(Some(serialized)) => serialized,
            Ok(None) => return Vec::new(),
            Err(err) => {
                tracing::warn!(key, %err, "failed to read job queue");
                return Vec::new();
            }
        };
        let entries: Vec<serde_json::Value> = match serde_json::from_str(&serialized) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(key, %err, "discarding corrupt job queue");
                return Vec::new();
            }
        };
        entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<SavedJob>(entry) {
                Ok(saved) => Some(Job {
                    id: saved.id,
                    request: saved.request,
                    not_before_ms: 0,
                }),
                Err(err) => {
                    tracing::warn!(key, %err, "skipping malformed job");
                    None
                }
            })
            .collect()
    }

    /// Creates and stores a job for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::QueueFull`] if the queue is at capacity.
    pub fn post(&self, request: Request, not_before_ms: i64) -> SyncResult<Job> {
        let job = Job {
            id: Uuid::new_v4(),
            request,
            not_before_ms,
        };
        self.repost(job.clone())?;
        Ok(job)
    }

    /// Stores an existing job back in the queue, keeping its identity.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::QueueFull`] if the queue is at capacity.
    pub fn repost(&self, job: Job) -> SyncResult<()> {
        let mut jobs = self.jobs.lock();
        if jobs.len() >= self.capacity {
            return Err(SyncError::QueueFull);
        }
        let at = jobs.partition_point(|queued| queued.not_before_ms <= job.not_before_ms);
        jobs.insert(at, job);
        self.save(&jobs);
        Ok(())
    }

    /// The deadline of the earliest job, if any.
    #[must_use]
    pub fn peek_next_not_before_ms(&self) -> Option<i64> {
        self.jobs.lock().first().map(Job::not_before_ms)
    }

    /// Removes and returns the earliest job.
    ///
    /// Deadline enforcement is the caller's concern; the earliest job is
    /// returned whether or not its deadline has passed.
    #[must_use]
    pub fn take_next(&self) -> Option<Job> {
        let mut jobs = self.jobs.lock();
        if jobs.is_empty() {
            return None;
        }
        let job = jobs.remove(0);
        self.save(&jobs);
        Some(job)
    }

    /// Number of queued jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Returns true if no jobs are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    fn save(&self, jobs: &[Job]) {
        let saved: Vec<SavedJob> = jobs
            .iter()
            .map(|job| SavedJob {
                id: job.id,
                request: job.request.clone(),
            })
            .collect();
        let serialized = match serde_json::to_string(&saved) {
            Ok(serialized) => serialized,
            Err(err) => {
                tracing::error!(key = %self.key, %err, "failed to serialize job queue");
                return;
            }
        };
        if let Err(err) = self.store.put(&self.key, &serialized) {
            tracing::warn!(key = %self.key, %err, "failed to persist job queue");
        }
    }
}
