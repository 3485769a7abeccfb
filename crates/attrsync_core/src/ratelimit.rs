//! Sliding-window rate limiting with persisted counters.

use crate::clock::TimeSource;
use attrsync_store::KeyValueStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const COUNTERS_KEY: &str = "rate_limiter:counters";

/// A named rate limit: at most `limit` events per `time_to_live` window.
#[derive(Debug, Clone)]
pub struct RateLimit {
    /// Name of the limit; counters are kept per key.
    pub key: String,
    /// Length of the sliding window.
    pub time_to_live: Duration,
    /// Number of events allowed inside the window.
    pub limit: usize,
}

impl RateLimit {
    /// Creates a rate limit spec.
    #[must_use]
    pub fn new(key: impl Into<String>, time_to_live: Duration, limit: usize) -> Self {
        Self {
            key: key.into(),
            time_to_live,
            limit,
        }
    }
}

/// A sliding-window rate limiter over persisted event-timestamp counters.
///
/// Each named limit owns a time-ordered list of event timestamps. Every
/// access prunes entries older than the limit's window from the front, so
/// counters never grow beyond one window of events. Counters are persisted
/// after every mutation and restored on construction.
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    time: Arc<dyn TimeSource>,
    counters: Mutex<HashMap<String, Vec<i64>>>,
}

impl RateLimiter {
    /// Creates a rate limiter, restoring persisted counters.
    ///
    /// A corrupt snapshot restores as empty.
    pub fn new(store: Arc<dyn KeyValueStore>, time: Arc<dyn TimeSource>) -> Self {
        let counters = match store.get(COUNTERS_KEY) {
            Ok(Some(serialized)) => match serde_json::from_str(&serialized) {
                Ok(counters) => counters,
                Err(err) => {
                    tracing::warn!(%err, "discarding corrupt rate limiter counters");
                    HashMap::new()
                }
            },
            Ok(None) => HashMap::new(),
            Err(err) => {
                tracing::warn!(%err, "failed to read rate limiter counters");
                HashMap::new()
            }
        };

        Self {
            store,
            time,
            counters: Mutex::new(counters),
        }
    }

    /// Records one event against the limit.
    pub fn increment(&self, limit: &RateLimit) {
        let now = self.time.now_ms();
        let mut counters = self.counters.lock();
        let events = counters.entry(limit.key.clone()).or_default();
        prune(events, now, limit.time_to_live);
        events.push(now);
        self.save(&counters);
    }

    /// Returns true if the limit has been reached within its window.
    pub fn is_rate_limited(&self, limit: &RateLimit) -> bool {
        let now = self.time.now_ms();
        let mut counters = self.counters.lock();
        let Some(events) = counters.get_mut(&limit.key) else {
            return false;
        };
        prune(events, now, limit.time_to_live);
        let limited = events.len() >= limit.limit;
        self.save(&counters);
        limited
    }

    /// Removes the limit's counter entirely.
    pub fn clear(&self, limit: &RateLimit) {
        let mut counters = self.counters.lock();
        counters.remove(&limit.key);
        self.save(&counters);
    }

    fn save(&self, counters: &HashMap<String, Vec<i64>>) {
        let serialized = match serde_json::to_string(counters) {
            Ok(serialized) => serialized,
            Err(err) => {
                tracing::warn!(%err, "failed to serialize rate limiter counters");
                return;
            }
        };
        if let Err(err) = self.store.put(COUNTERS_KEY, &serialized) {
            tracing::warn!(%err, "failed to persist rate limiter counters");
        }
    }
}

/// Drops events older than the window from the front of the time-ordered
/// list.
fn prune(events: &mut Vec<i64>, now_ms: i64, time_to_live: Duration) {
    let start = now_ms - time_to_live.as_millis() as i64;
    let keep_from = events.partition_point(|&at| at < start);
    events.drain(..keep_from);
}

#[cfg(test)]
mod tests {
    use super::*;
    use attrsync_store::InMemoryStore;

    struct ManualTime(Mutex<i64>);

    impl ManualTime {
        fn new(now_ms: i64) -> Arc<Self> {
            Arc::new(Self(Mutex::new(now_ms)))
        }

        fn advance(&self, delta_ms: i64) {
            *self.0.lock() += delta_ms;
        }
    }

    impl TimeSource for ManualTime {
        fn now_ms(&self) -> i64 {
            *self.0.lock()
        }
    }

    fn limit() -> RateLimit {
        RateLimit::new("test", Duration::from_millis(1000), 3)
    }

    #[test]
    fn under_the_limit_is_not_limited() {
        let time = ManualTime::new(10_000);
        let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()), time);

        assert!(!limiter.is_rate_limited(&limit()));
        limiter.increment(&limit());
        limiter.increment(&limit());
        assert!(!limiter.is_rate_limited(&limit()));
    }

    #[test]
    fn reaching_the_limit_rate_limits() {
        let time = ManualTime::new(10_000);
        let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()), Arc::clone(&time) as _);

        for _ in 0..3 {
            limiter.increment(&limit());
        }
        assert!(limiter.is_rate_limited(&limit()));

        // Waiting past the window releases the limit with no further calls.
        time.advance(1_001);
        assert!(!limiter.is_rate_limited(&limit()));
    }

    #[test]
    fn window_slides_per_event() {
        let time = ManualTime::new(10_000);
        let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()), Arc::clone(&time) as _);

        limiter.increment(&limit());
        time.advance(600);
        limiter.increment(&limit());
        limiter.increment(&limit());
        assert!(limiter.is_rate_limited(&limit()));

        // The first event ages out; the two recent ones remain.
        time.advance(500);
        assert!(!limiter.is_rate_limited(&limit()));
    }

    #[test]
    fn clear_removes_the_counter() {
        let time = ManualTime::new(10_000);
        let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()), time);

        for _ in 0..3 {
            limiter.increment(&limit());
        }
        limiter.clear(&limit());
        assert!(!limiter.is_rate_limited(&limit()));
    }

    #[test]
    fn counters_survive_restart() {
        let store = Arc::new(InMemoryStore::new());
        let time = ManualTime::new(10_000);

        {
            let limiter =
                RateLimiter::new(Arc::clone(&store) as _, Arc::clone(&time) as _);
            for _ in 0..3 {
                limiter.increment(&limit());
            }
        }

        let limiter = RateLimiter::new(store, time);
        assert!(limiter.is_rate_limited(&limit()));
    }

    #[test]
    fn corrupt_counters_restore_empty() {
        let store = Arc::new(InMemoryStore::new());
        store.put(COUNTERS_KEY, "{broken").unwrap();

        let limiter = RateLimiter::new(store, ManualTime::new(10_000));
        assert!(!limiter.is_rate_limited(&limit()));
    }

    #[test]
    fn limits_are_independent_per_key() {
        let time = ManualTime::new(10_000);
        let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()), time);
        let other = RateLimit::new("other", Duration::from_millis(1000), 1);

        limiter.increment(&other);
        assert!(limiter.is_rate_limited(&other));
        assert!(!limiter.is_rate_limited(&limit()));
    }
}
