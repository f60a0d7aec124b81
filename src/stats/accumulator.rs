use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use super::clock::{system_clock, Clock};

// ─── Snapshot types ──────────────────────────────────────────────

/// Immutable result of a counter collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterStats {
    pub count: u64,
    /// Epoch millis at which this interval started.
    pub start_time: i64,
    pub duration_millis: i64,
}

/// Sentinel held in `max` while the accumulator is empty.
const MAX_SENTINEL: i64 = i64::MIN;

/// Immutable result of a value collection.
///
/// `mean` is `round(total / count)`, or 0 for an empty interval. `max`
/// reports 0 for an empty interval, and falls back to `mean` when the
/// interval counted adds whose max had not landed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValueStats {
    pub count: u64,
    pub total: i64,
    pub max: i64,
    pub mean: i64,
    pub start_time: i64,
    pub duration_millis: i64,
}

impl ValueStats {
    pub fn new(count: u64, total: i64, max: i64, start_time: i64, end_time: i64) -> Self {
        let mean = mean(count, total);
        let max = match (count, max) {
            (0, _) => 0,
            (_, MAX_SENTINEL) => mean,
            (_, max) => max,
        };
        Self {
            count,
            total,
            max,
            mean,
            start_time,
            duration_millis: (end_time - start_time).max(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

fn mean(count: u64, total: i64) -> i64 {
    if count < 1 {
        0
    } else {
        (total as f64 / count as f64).round() as i64
    }
}

// ─── CounterAccumulator ──────────────────────────────────────────

/// Add-only event counter with collect-and-reset semantics.
#[derive(Debug)]
pub struct CounterAccumulator {
    clock: Arc<dyn Clock>,
    count: AtomicU64,
    start_time: AtomicI64,
}

impl Default for CounterAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterAccumulator {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            count: AtomicU64::new(0),
            start_time: AtomicI64::new(clock.epoch_millis()),
            clock,
        }
    }

    pub fn increment(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn snapshot(&self, reset: bool) -> CounterStats {
        let now = self.clock.epoch_millis();
        let (count, start_time) = if reset {
            (
                self.count.swap(0, Ordering::AcqRel),
                self.start_time.swap(now, Ordering::AcqRel),
            )
        } else {
            (
                self.count.load(Ordering::Acquire),
                self.start_time.load(Ordering::Acquire),
            )
        };
        CounterStats {
            count,
            start_time,
            duration_millis: (now - start_time).max(0),
        }
    }
}

// ─── ValueAccumulator ────────────────────────────────────────────

/// Count / total / max accumulator built on atomic adds.
///
/// `add` is wait-free. The three fields are read (or swapped) one after
/// the other, so a snapshot taken while writers are active may split an
/// add across two intervals: its count in one, its total or max in the
/// next. The skew is bounded by the number of adds in flight during the
/// snapshot. A reset that swaps out a zero count hands any total and max
/// it caught back to the accumulator, so summed over intervals the count
/// and total are exact.
#[derive(Debug)]
pub struct ValueAccumulator {
    clock: Arc<dyn Clock>,
    count: AtomicU64,
    total: AtomicI64,
    max: AtomicI64,
    start_time: AtomicI64,
}

impl Default for ValueAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueAccumulator {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            count: AtomicU64::new(0),
            total: AtomicI64::new(0),
            max: AtomicI64::new(MAX_SENTINEL),
            start_time: AtomicI64::new(clock.epoch_millis()),
            clock,
        }
    }

    pub fn add(&self, value: i64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Read the current interval. With `reset` the fields are swapped
    /// back to their empty state and a new interval starts now.
    ///
    /// Only the collector should pass `reset = true`.
    pub fn snapshot(&self, reset: bool) -> ValueStats {
        let now = self.clock.epoch_millis();
        if reset {
            let count = self.count.swap(0, Ordering::AcqRel);
            let total = self.total.swap(0, Ordering::AcqRel);
            let max = self.max.swap(MAX_SENTINEL, Ordering::AcqRel);
            let start = self.start_time.swap(now, Ordering::AcqRel);
            if count == 0 {
                // in-flight adds whose count landed in the new interval
                if total != 0 {
                    self.total.fetch_add(total, Ordering::AcqRel);
                }
                if max != MAX_SENTINEL {
                    self.max.fetch_max(max, Ordering::AcqRel);
                }
                return ValueStats::new(0, 0, MAX_SENTINEL, start, now);
            }
            ValueStats::new(count, total, max, start, now)
        } else {
            let count = self.count.load(Ordering::Acquire);
            let total = self.total.load(Ordering::Acquire);
            let max = self.max.load(Ordering::Acquire);
            let start = self.start_time.load(Ordering::Acquire);
            ValueStats::new(count, total, max, start, now)
        }
    }
}
