use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use chrono::{DateTime, Utc};

/// Source of time for accumulators, reservoirs and timing contexts.
pub trait Clock: Send + Sync + Debug {
    /// Monotonic nanoseconds since an arbitrary, fixed origin.
    fn nanos(&self) -> u64;

    /// Wall-clock milliseconds since the UNIX epoch.
    fn epoch_millis(&self) -> i64;
}

/// The process clock: `Instant` for elapsed time, `chrono` for wall time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

fn origin() -> Instant {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    *ORIGIN.get_or_init(Instant::now)
}

impl Clock for SystemClock {
    fn nanos(&self) -> u64 {
        origin().elapsed().as_nanos() as u64
    }

    fn epoch_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
    epoch_millis: AtomicI64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance_nanos(&self, nanos: u64) {
        self.nanos.fetch_add(nanos, Ordering::SeqCst);
        self.epoch_millis
            .fetch_add((nanos / 1_000_000) as i64, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance_nanos(secs * 1_000_000_000);
    }
}

impl Clock for ManualClock {
    fn nanos(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }

    fn epoch_millis(&self) -> i64 {
        self.epoch_millis.load(Ordering::SeqCst)
    }
}

/// The shared process clock handed to metrics by default.
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// `clock`'s wall time as a UTC timestamp.
pub fn wall_time(clock: &dyn Clock) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(clock.epoch_millis()).unwrap_or_else(Utc::now)
}

/// Shorthand for `SystemClock.nanos()`.
pub fn now_nanos() -> u64 {
    SystemClock.nanos()
}
