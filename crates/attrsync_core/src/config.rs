//! Configuration for the delivery vault.

use std::time::Duration;

/// Configuration for a delivery vault and its retry backoff.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Delay applied after the first transient failure, and the value the
    /// backoff resets to after a success.
    pub min_backoff: Duration,
    /// Upper bound on the retry delay.
    pub max_backoff: Duration,
    /// Multiplier applied to the current delay on each consecutive
    /// transient failure.
    pub backoff_multiplier: f64,
    /// Maximum number of jobs the queue can hold.
    pub queue_capacity: usize,
}

impl VaultConfig {
    /// Creates a configuration with the default backoff window.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the minimum backoff delay.
    #[must_use]
    pub fn with_min_backoff(mut self, delay: Duration) -> Self {
        self.min_backoff = delay;
        self
    }

    /// Sets the maximum backoff delay.
    #[must_use]
    pub fn with_max_backoff(mut self, delay: Duration) -> Self {
        self.max_backoff = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// The next backoff delay after a transient failure at `current`.
    #[must_use]
    pub fn next_backoff(&self, current: Duration) -> Duration {
        let bumped = current.as_secs_f64() * self.backoff_multiplier;
        Duration::from_secs_f64(bumped.min(self.max_backoff.as_secs_f64()))
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(5 * 60),
            backoff_multiplier: 1.5,
            queue_capacity: 32,
        }
    }
}
