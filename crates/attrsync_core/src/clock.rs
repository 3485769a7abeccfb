//! Clock synchronization against server time.
//!
//! Device clocks cannot be trusted: the wall clock moves whenever the user
//! adjusts the system date, and the monotonic clock restarts with the
//! process. [`TimeKeeper`] maintains two offset/uncertainty pairs toward
//! server time and serves the best current estimate:
//!
//! - a **startup** pair bound to the monotonic clock. It cannot be tampered
//!   with but only lives until the process exits.
//! - a **device** pair bound to the wall clock, persisted across restarts.
//!   It survives but moves with user date changes, which are detected
//!   through the monotonic/wall relationship and compensated.

use attrsync_store::KeyValueStore;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

const DEVICE_OFFSET_KEY: &str = "time_sync:device_offset";
const DEVICE_UNCERTAINTY_KEY: &str = "time_sync:device_uncertainty";

/// Sentinel for "never synchronized".
const UNSYNCED: i64 = i64::MAX;

/// A wall-clock jump smaller than this is attributed to drift between the
/// two clock sources rather than a user date change.
const WALL_JUMP_TOLERANCE_MS: i64 = 1000;

/// Raw clock readings, in milliseconds.
///
/// The seam exists so tests can drive time explicitly; production code uses
/// [`SystemClock`].
pub trait Clock: Send + Sync {
    /// Wall-clock time, Unix epoch milliseconds. Moves with user date
    /// changes.
    fn wall_ms(&self) -> i64;

    /// Monotonic time since an arbitrary origin. Tamper-proof, resets with
    /// the process.
    fn monotonic_ms(&self) -> i64;
}

/// The process clocks.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Creates a clock whose monotonic origin is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn wall_ms(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_millis() as i64,
            Err(before_epoch) => -(before_epoch.duration().as_millis() as i64),
        }
    }

    fn monotonic_ms(&self) -> i64 {
        self.origin.elapsed().as_millis() as i64
    }
}

/// A server-synchronized timestamp source.
///
/// Implemented by [`TimeKeeper`]; consumers that only need "now" depend on
/// this trait.
pub trait TimeSource: Send + Sync {
    /// Best current estimate of server time, Unix epoch milliseconds.
    fn now_ms(&self) -> i64;
}

#[derive(Debug)]
struct ClockState {
    startup_to_server_offset: i64,
    startup_to_server_uncertainty: i64,
    device_to_server_offset: i64,
    device_to_server_uncertainty: i64,
    /// Last observed wall-minus-monotonic relationship, used to detect user
    /// date changes.
    startup_to_device_offset: i64,
}

/// Maintains the best current estimate of server time.
///
/// All state lives under one process-wide lock; the device pair is persisted
/// after every change so a fresh process starts with plausible timestamps
/// before its first server round trip.
pub struct TimeKeeper {
    clock: Arc<dyn Clock>,
    store: Arc<dyn KeyValueStore>,
    state: Mutex<ClockState>,
}

impl TimeKeeper {
    /// Creates a time keeper, restoring the persisted device pair.
    pub fn new(clock: Arc<dyn Clock>, store: Arc<dyn KeyValueStore>) -> Self {
        let device_to_server_offset = read_i64(store.as_ref(), DEVICE_OFFSET_KEY).unwrap_or(0);
        let device_to_server_uncertainty =
            read_i64(store.as_ref(), DEVICE_UNCERTAINTY_KEY).unwrap_or(UNSYNCED);

        Self {
            clock,
            store,
            state: Mutex::new(ClockState {
                startup_to_server_offset: 0,
                startup_to_server_uncertainty: UNSYNCED,
                device_to_server_offset,
                device_to_server_uncertainty,
                startup_to_device_offset: UNSYNCED,
            }),
        }
    }

    /// Best current estimate of server time, Unix epoch milliseconds.
    ///
    /// Prefers the monotonic-based startup pair once it has been calibrated
    /// at least as accurately as the device pair; otherwise falls back to
    /// wall clock plus the persisted device offset.
    pub fn now_ms(&self) -> i64 {
        let wall = self.clock.wall_ms();
        let monotonic = self.clock.monotonic_ms();

        let mut state = self.state.lock();
        self.observe_wall_clock(&mut state, wall, monotonic);

        if state.startup_to_server_uncertainty <= state.device_to_server_uncertainty
            && state.startup_to_server_uncertainty != UNSYNCED
        {
            monotonic + state.startup_to_server_offset
        } else {
            wall + state.device_to_server_offset
        }
    }

    /// Monotonic milliseconds since process start.
    ///
    /// The delivery vault schedules its deadlines on this clock.
    pub fn monotonic_ms(&self) -> i64 {
        self.clock.monotonic_ms()
    }

    /// Records one request round trip to the server.
    ///
    /// `send_monotonic_ms` and `receive_monotonic_ms` bracket the request on
    /// the monotonic clock; `server_time_ms` is the server's timestamp at
    /// receipt and `server_took_ms` how long the server spent processing.
    ///
    /// The startup pair is replaced when the measurement is more accurate,
    /// or when the offsets disagree beyond their combined uncertainty (a
    /// server-side time discontinuity, which forces a reset rather than a
    /// blend). The device pair follows the startup pair when the startup
    /// pair is now more accurate, the wall clock has moved, or the two
    /// pairs disagree beyond combined uncertainty.
    pub fn record_round_trip(
        &self,
        send_monotonic_ms: i64,
        receive_monotonic_ms: i64,
        server_time_ms: i64,
        server_took_ms: i64,
    ) {
        if server_time_ms == 0 {
            return;
        }

        let wall = self.clock.wall_ms();
        let monotonic = self.clock.monotonic_ms();
        let startup_to_device = wall - monotonic;

        let uncertainty = (receive_monotonic_ms - send_monotonic_ms - server_took_ms) / 2;
        let offset = server_time_ms + server_took_ms / 2
            - (send_monotonic_ms + receive_monotonic_ms) / 2;

        let mut state = self.state.lock();
        if state.startup_to_device_offset == UNSYNCED {
            state.startup_to_device_offset = startup_to_device;
        }

        if uncertainty < state.startup_to_server_uncertainty
            || (offset - state.startup_to_server_offset).abs()
                > uncertainty.saturating_add(state.startup_to_server_uncertainty)
        {
            tracing::debug!(offset, uncertainty, "startup clock sync updated");
            state.startup_to_server_offset = offset;
            state.startup_to_server_uncertainty = uncertainty;
        }

        if state.startup_to_server_uncertainty < state.device_to_server_uncertainty
            || (startup_to_device - state.startup_to_device_offset).abs()
                > state.startup_to_server_uncertainty
            || (state.device_to_server_offset
                - (state.startup_to_server_offset - state.startup_to_device_offset))
                .abs()
                > state
                    .device_to_server_uncertainty
                    .saturating_add(state.startup_to_server_uncertainty)
        {
            state.device_to_server_offset =
                state.startup_to_server_offset - state.startup_to_device_offset;
            state.device_to_server_uncertainty = state.startup_to_server_uncertainty;
            self.persist_device_pair(&state);
        }
    }

    /// Detects wall-clock jumps and re-bases the device pair onto the new
    /// system date.
    fn observe_wall_clock(&self, state: &mut ClockState, wall: i64, monotonic: i64) {
        let startup_to_device = wall - monotonic;
        if state.startup_to_device_offset == UNSYNCED {
            state.startup_to_device_offset = startup_to_device;
        }
        if (startup_to_device - state.startup_to_device_offset).abs() > WALL_JUMP_TOLERANCE_MS {
            tracing::debug!(
                jump_ms = startup_to_device - state.startup_to_device_offset,
                "wall clock moved, re-basing device clock sync"
            );
            state.device_to_server_offset -= startup_to_device - state.startup_to_device_offset;
            state.startup_to_device_offset = startup_to_device;
            self.persist_device_pair(state);
        }
    }

    fn persist_device_pair(&self, state: &ClockState) {
        if let Err(err) = self
            .store
            .put(DEVICE_OFFSET_KEY, &state.device_to_server_offset.to_string())
            .and_then(|()| {
                self.store.put(
                    DEVICE_UNCERTAINTY_KEY,
                    &state.device_to_server_uncertainty.to_string(),
                )
            })
        {
            tracing::warn!(%err, "failed to persist device clock sync");
        }
    }
}

impl TimeSource for TimeKeeper {
    fn now_ms(&self) -> i64 {
        TimeKeeper::now_ms(self)
    }
}

fn read_i64(store: &dyn KeyValueStore, key: &str) -> Option<i64> {
    match store.get(key) {
        Ok(value) => value.and_then(|v| v.parse().ok()),
        Err(err) => {
            tracing::warn!(key, %err, "failed to read clock sync state");
            None
        }
    }
}

/// A manually driven clock for tests.
#[derive(Debug)]
pub struct MockClock {
    wall: Mutex<i64>,
    monotonic: Mutex<i64>,
}

impl MockClock {
    /// Creates a clock with the given initial readings.
    #[must_use]
    pub fn new(wall_ms: i64, monotonic_ms: i64) -> Self {
        Self {
            wall: Mutex::new(wall_ms),
            monotonic: Mutex::new(monotonic_ms),
        }
    }

    /// Advances both clocks, as real time passing would.
    pub fn advance(&self, delta_ms: i64) {
        *self.wall.lock() += delta_ms;
        *self.monotonic.lock() += delta_ms;
    }

    /// Moves only the wall clock, as a user date change would.
    pub fn jump_wall(&self, delta_ms: i64) {
        *self.wall.lock() += delta_ms;
    }
}

impl Clock for MockClock {
    fn wall_ms(&self) -> i64 {
        *self.wall.lock()
    }

    fn monotonic_ms(&self) -> i64 {
        *self.monotonic.lock()
    }
}
