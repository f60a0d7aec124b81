use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_skiplist::SkipMap;
use parking_lot::RwLock;
use rand::Rng;
use serde::Serialize;

use super::clock::{system_clock, Clock};
use crate::error::{MetricsError, Result};

/// Sample size giving roughly 99.9% confidence with a 5% margin,
/// assuming a normal distribution.
pub const DEFAULT_CAPACITY: usize = 1028;

/// Recency bias of the default decaying reservoir (about the last five
/// minutes dominate).
pub const DEFAULT_ALPHA: f64 = 0.015;

/// How often the decaying reservoir moves its landmark forward.
const RESCALE_THRESHOLD_NANOS: u64 = 60 * 60 * 1_000_000_000;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A bounded sample of a value stream.
pub trait Reservoir: Send + Sync + std::fmt::Debug {
    fn update(&self, value: i64);

    /// Number of values currently retained.
    fn size(&self) -> usize;

    /// Sorted copy of the sample. With `reset` the sample is emptied.
    fn snapshot(&self, reset: bool) -> Snapshot;
}

// ─── Snapshot / percentiles ──────────────────────────────────────

/// The standard percentile set reported alongside value statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Percentiles {
    pub median: f64,
    pub p75: f64,
    pub p95: f64,
    pub p99: f64,
    pub p999: f64,
}

/// Sorted sample values taken from a reservoir.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    values: Vec<i64>,
}

impl Snapshot {
    pub fn new(mut values: Vec<i64>) -> Self {
        values.sort_unstable();
        Self { values }
    }

    pub fn size(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }

    pub fn min(&self) -> i64 {
        self.values.first().copied().unwrap_or(0)
    }

    pub fn max(&self) -> i64 {
        self.values.last().copied().unwrap_or(0)
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().map(|&v| v as f64).sum::<f64>() / self.values.len() as f64
    }

    /// Value at `quantile`, linearly interpolated between neighbouring
    /// samples. Returns 0 for an empty sample.
    pub fn value(&self, quantile: f64) -> Result<f64> {
        if !(0.0..=1.0).contains(&quantile) {
            return Err(MetricsError::InvalidQuantile(quantile));
        }
        Ok(self.interpolate(quantile))
    }

    fn interpolate(&self, quantile: f64) -> f64 {
        let n = self.values.len();
        if n == 0 {
            return 0.0;
        }

        let pos = quantile * (n + 1) as f64;
        if pos < 1.0 {
            return self.values[0] as f64;
        }
        if pos >= n as f64 {
            return self.values[n - 1] as f64;
        }

        let index = pos as usize;
        let lower = self.values[index - 1] as f64;
        let upper = self.values[index] as f64;
        lower + (pos - pos.floor()) * (upper - lower)
    }

    pub fn median(&self) -> f64 {
        self.interpolate(0.5)
    }

    pub fn p75(&self) -> f64 {
        self.interpolate(0.75)
    }

    pub fn p95(&self) -> f64 {
        self.interpolate(0.95)
    }

    pub fn p99(&self) -> f64 {
        self.interpolate(0.99)
    }

    pub fn p999(&self) -> f64 {
        self.interpolate(0.999)
    }

    pub fn percentiles(&self) -> Percentiles {
        Percentiles {
            median: self.median(),
            p75: self.p75(),
            p95: self.p95(),
            p99: self.p99(),
            p999: self.p999(),
        }
    }
}

// ─── UniformReservoir ────────────────────────────────────────────

/// Fixed-size random sample with no time bias (Vitter's algorithm R).
#[derive(Debug)]
pub struct UniformReservoir {
    values: Vec<AtomicI64>,
    count: AtomicU64,
}

impl UniformReservoir {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(MetricsError::InvalidCapacity);
        }
        Ok(Self {
            values: (0..capacity).map(|_| AtomicI64::new(0)).collect(),
            count: AtomicU64::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.values.len()
    }
}

impl Reservoir for UniformReservoir {
    fn update(&self, value: i64) {
        let seen = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        let capacity = self.values.len() as u64;
        let slot = if seen <= capacity {
            seen - 1
        } else {
            rand::thread_rng().gen_range(0..seen)
        };
        if slot < capacity {
            self.values[slot as usize].store(value, Ordering::Release);
        }
    }

    fn size(&self) -> usize {
        (self.count.load(Ordering::Acquire) as usize).min(self.values.len())
    }

    fn snapshot(&self, reset: bool) -> Snapshot {
        let size = if reset {
            self.count.swap(0, Ordering::AcqRel) as usize
        } else {
            self.count.load(Ordering::Acquire) as usize
        };
        let size = size.min(self.values.len());
        Snapshot::new(
            self.values[..size]
                .iter()
                .map(|v| v.load(Ordering::Acquire))
                .collect(),
        )
    }
}

// ─── DecayingReservoir ───────────────────────────────────────────

/// How often the decaying reservoir moves its landmark forward, in seconds.
const RESCALE_THRESHOLD_SECS: u64 = RESCALE_THRESHOLD_NANOS / NANOS_PER_SEC;

/// Fresh priorities drawn for one value before it is dropped.
const MAX_REDRAWS: usize = 8;

/// Largest alpha whose weights stay finite between two rescales.
///
/// Weights are `exp(alpha * elapsed)` with `elapsed` up to one rescale
/// period plus the landmark's sub-second truncation.
pub fn max_alpha() -> f64 {
    f64::MAX.ln() / (RESCALE_THRESHOLD_SECS + 1) as f64
}

/// Reject alphas that are not positive, or large enough to overflow the
/// forward-decay weights before the next rescale.
pub fn validate_alpha(alpha: f64) -> Result<()> {
    if alpha.is_finite() && alpha > 0.0 && alpha < max_alpha() {
        Ok(())
    } else {
        Err(MetricsError::InvalidAlpha(alpha))
    }
}

/// Forward-decay weighted sample, biased toward recent values.
///
/// Each value gets priority `exp(alpha * (t - landmark)) / u` where `u`
/// is uniform on `(0, 1]`; the `capacity` highest priorities are kept.
/// Once an hour the landmark moves forward and stored priorities are
/// scaled down to match, keeping the weights finite.
///
/// Updates hold the landmark lock shared and insert into a concurrent
/// skip list; a rescale holds the lock exclusive.
#[derive(Debug)]
pub struct DecayingReservoir {
    capacity: usize,
    alpha: f64,
    clock: Arc<dyn Clock>,
    count: AtomicU64,
    next_rescale_nanos: AtomicU64,
    /// Landmark in whole clock seconds.
    landmark: RwLock<u64>,
    /// Keyed by the bit pattern of the (always positive) priority, which
    /// orders the same as the priority itself.
    samples: SkipMap<u64, i64>,
}

impl DecayingReservoir {
    pub fn new(capacity: usize, alpha: f64) -> Result<Self> {
        Self::with_clock(capacity, alpha, system_clock())
    }

    pub fn with_clock(capacity: usize, alpha: f64, clock: Arc<dyn Clock>) -> Result<Self> {
        if capacity == 0 {
            return Err(MetricsError::InvalidCapacity);
        }
        validate_alpha(alpha)?;
        let now = clock.nanos();
        Ok(Self {
            capacity,
            alpha,
            count: AtomicU64::new(0),
            next_rescale_nanos: AtomicU64::new(now + RESCALE_THRESHOLD_NANOS),
            landmark: RwLock::new(now / NANOS_PER_SEC),
            samples: SkipMap::new(),
            clock,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events offered since the last reset or rescale.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    pub fn landmark_secs(&self) -> u64 {
        *self.landmark.read()
    }

    fn update_at(&self, value: i64, now_nanos: u64) {
        self.rescale_if_needed(now_nanos);

        let landmark = self.landmark.read();
        let elapsed = now_nanos as f64 / NANOS_PER_SEC as f64 - *landmark as f64;
        let weight = (self.alpha * elapsed).exp();

        self.count.fetch_add(1, Ordering::AcqRel);
        if !self.offer(weight, value) {
            tracing::trace!(weight, "decaying reservoir dropped a value");
        }
    }

    /// Insert `value` if its priority earns a place. A priority that
    /// collides with a stored one is redrawn, a bounded number of times.
    /// Returns false when the value was dropped for lack of a usable
    /// priority.
    fn offer(&self, weight: f64, value: i64) -> bool {
        let mut rng = rand::thread_rng();
        for _ in 0..MAX_REDRAWS {
            let priority = weight / (1.0 - rng.gen::<f64>());
            if !priority.is_finite() {
                return false;
            }
            let key = priority.to_bits();

            if self.samples.len() >= self.capacity {
                match self.samples.front() {
                    Some(lowest) if key <= *lowest.key() => return true,
                    _ => {}
                }
            }

            // a racing insert of the same key only swaps one sample for another
            if !self.samples.contains_key(&key) {
                self.samples.insert(key, value);
                if self.samples.len() > self.capacity {
                    self.samples.pop_front();
                }
                return true;
            }
        }
        false
    }

    fn rescale_if_needed(&self, now_nanos: u64) {
        let next = self.next_rescale_nanos.load(Ordering::Acquire);
        if now_nanos >= next
            && self
                .next_rescale_nanos
                .compare_exchange(
                    next,
                    now_nanos + RESCALE_THRESHOLD_NANOS,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        {
            self.rescale(now_nanos);
        }
    }

    fn rescale(&self, now_nanos: u64) {
        let mut landmark = self.landmark.write();
        let old = *landmark;
        let new = now_nanos / NANOS_PER_SEC;
        *landmark = new;

        let factor = (-self.alpha * new.saturating_sub(old) as f64).exp();
        let entries: Vec<(u64, i64)> = self
            .samples
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        self.samples.clear();

        let mut underflowed = 0usize;
        let mut merged = 0usize;
        for (key, value) in entries {
            let priority = f64::from_bits(key) * factor;
            if priority <= 0.0 {
                underflowed += 1;
            } else if self.samples.contains_key(&priority.to_bits()) {
                merged += 1;
            } else {
                self.samples.insert(priority.to_bits(), value);
            }
        }

        let retained = self.samples.len();
        self.count.store(retained as u64, Ordering::Release);
        tracing::debug!(
            old,
            new,
            retained,
            underflowed,
            merged,
            "rescaled decaying reservoir"
        );
    }
}

impl Reservoir for DecayingReservoir {
    fn update(&self, value: i64) {
        self.update_at(value, self.clock.nanos());
    }

    fn size(&self) -> usize {
        self.samples.len().min(self.capacity)
    }

    fn snapshot(&self, reset: bool) -> Snapshot {
        let _landmark = self.landmark.read();
        let mut values = Vec::with_capacity(self.capacity);
        for entry in self.samples.iter() {
            values.push(*entry.value());
            if reset {
                entry.remove();
            }
        }
        if reset {
            self.count.store(0, Ordering::Release);
        }
        Snapshot::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::clock::ManualClock;

    #[test]
    fn snapshot_interpolates_quantiles() {
        let snapshot = Snapshot::new((1..=5).collect());
        assert_eq!(snapshot.median(), 3.0);
        assert_eq!(snapshot.value(0.0).unwrap(), 1.0);
        assert_eq!(snapshot.value(1.0).unwrap(), 5.0);
        // pos = 0.75 * 6 = 4.5, halfway between 4 and 5
        assert_eq!(snapshot.p75(), 4.5);
    }

    #[test]
    fn snapshot_rejects_out_of_range_quantile() {
        let snapshot = Snapshot::new(vec![1, 2, 3]);
        assert!(matches!(
            snapshot.value(1.5),
            Err(MetricsError::InvalidQuantile(_))
        ));
        assert!(snapshot.value(-0.1).is_err());
        assert!(snapshot.value(f64::NAN).is_err());
    }

    #[test]
    fn empty_snapshot_reports_zero() {
        let snapshot = Snapshot::default();
        assert_eq!(snapshot.median(), 0.0);
        assert_eq!(snapshot.mean(), 0.0);
        assert_eq!(snapshot.max(), 0);
    }

    #[test]
    fn uniform_reservoir_is_bounded() {
        let reservoir = UniformReservoir::new(100).unwrap();
        for i in 0..1_000 {
            reservoir.update(i);
        }
        assert_eq!(reservoir.size(), 100);

        let snapshot = reservoir.snapshot(false);
        assert_eq!(snapshot.size(), 100);
        assert!(snapshot.values().iter().all(|v| (0..1_000).contains(v)));
    }

    #[test]
    fn uniform_reservoir_reset_empties_sample() {
        let reservoir = UniformReservoir::new(10).unwrap();
        for i in 0..5 {
            reservoir.update(i);
        }
        assert_eq!(reservoir.snapshot(true).size(), 5);
        assert_eq!(reservoir.size(), 0);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(
            UniformReservoir::new(0),
            Err(MetricsError::InvalidCapacity)
        ));
        assert!(DecayingReservoir::new(0, DEFAULT_ALPHA).is_err());
        assert!(matches!(
            DecayingReservoir::new(10, -1.0),
            Err(MetricsError::InvalidAlpha(_))
        ));
    }

    #[test]
    fn alpha_that_overflows_weights_is_rejected() {
        assert!(validate_alpha(DEFAULT_ALPHA).is_ok());
        assert!(max_alpha() > 0.19 && max_alpha() < 0.2);
        assert!(matches!(
            DecayingReservoir::new(10, 0.5),
            Err(MetricsError::InvalidAlpha(_))
        ));
        assert!(validate_alpha(f64::INFINITY).is_err());
        assert!(validate_alpha(f64::NAN).is_err());
    }

    #[test]
    fn largest_alpha_keeps_accepting_updates_until_rescale() {
        let clock = Arc::new(ManualClock::new());
        let alpha = max_alpha() * 0.999;
        let reservoir = Arc::new(DecayingReservoir::with_clock(10, alpha, clock.clone()).unwrap());

        clock.advance_secs(60 * 60 - 1);
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let worker = Arc::clone(&reservoir);
        std::thread::spawn(move || {
            for i in 0..100 {
                worker.update(i);
            }
            let _ = done_tx.send(());
        });
        done_rx
            .recv_timeout(std::time::Duration::from_secs(10))
            .expect("updates finish");
        assert!(reservoir.size() <= 10);
        assert_eq!(reservoir.count(), 100);
    }

    #[test]
    fn infinite_weight_drops_the_value_instead_of_spinning() {
        let reservoir = DecayingReservoir::new(4, DEFAULT_ALPHA).unwrap();
        assert!(!reservoir.offer(f64::INFINITY, 1));
        assert!(!reservoir.offer(f64::INFINITY, 2));
        assert!(reservoir.offer(1.0, 3));
        assert_eq!(reservoir.snapshot(false).values(), &[3]);
    }

    #[test]
    fn decaying_reservoir_is_bounded() {
        let reservoir = DecayingReservoir::new(DEFAULT_CAPACITY, DEFAULT_ALPHA).unwrap();
        for i in 0..5_000 {
            reservoir.update(i);
        }
        assert_eq!(reservoir.size(), DEFAULT_CAPACITY);

        let snapshot = reservoir.snapshot(false);
        assert_eq!(snapshot.size(), DEFAULT_CAPACITY);
        assert!(snapshot.values().iter().all(|v| (0..5_000).contains(v)));
    }

    #[test]
    fn decaying_reservoir_below_capacity_keeps_everything() {
        let reservoir = DecayingReservoir::new(100, DEFAULT_ALPHA).unwrap();
        for i in 0..10 {
            reservoir.update(i);
        }
        let snapshot = reservoir.snapshot(false);
        assert_eq!(snapshot.values(), &(0..10).collect::<Vec<_>>()[..]);
    }

    #[test]
    fn quantiles_are_monotonic() {
        let reservoir = DecayingReservoir::new(DEFAULT_CAPACITY, DEFAULT_ALPHA).unwrap();
        let mut rng = rand::thread_rng();
        for _ in 0..10_000 {
            reservoir.update(rng.gen_range(0..100_000));
        }
        let p = reservoir.snapshot(false).percentiles();
        assert!(p.median <= p.p75);
        assert!(p.p75 <= p.p95);
        assert!(p.p95 <= p.p99);
        assert!(p.p99 <= p.p999);
    }

    #[test]
    fn recent_values_dominate_after_time_passes() {
        let clock = Arc::new(ManualClock::new());
        let reservoir = DecayingReservoir::with_clock(10, 0.015, clock.clone()).unwrap();

        for _ in 0..1_000 {
            reservoir.update(1);
        }
        // Far enough ahead that new weights dwarf the old ones
        clock.advance_secs(30 * 60);
        for _ in 0..1_000 {
            reservoir.update(2);
        }

        let snapshot = reservoir.snapshot(false);
        assert_eq!(snapshot.size(), 10);
        assert!(snapshot.values().iter().all(|&v| v == 2));
    }

    #[test]
    fn rescale_moves_landmark_and_keeps_sample() {
        let clock = Arc::new(ManualClock::new());
        let reservoir = DecayingReservoir::with_clock(50, DEFAULT_ALPHA, clock.clone()).unwrap();
        for i in 0..50 {
            reservoir.update(i);
        }
        assert_eq!(reservoir.landmark_secs(), 0);

        clock.advance_secs(60 * 60 + 1);
        reservoir.update(1_000);

        assert_eq!(reservoir.landmark_secs(), 3_601);
        assert_eq!(reservoir.size(), 50);
        // the new value carries weight 1 against old priorities scaled by
        // exp(-0.015 * 3601), so it always makes the cut
        assert!(reservoir.snapshot(false).values().contains(&1_000));
    }

    #[test]
    fn rescale_drops_priorities_that_underflow() {
        let clock = Arc::new(ManualClock::new());
        let reservoir = DecayingReservoir::with_clock(50, DEFAULT_ALPHA, clock.clone()).unwrap();
        for i in 0..50 {
            reservoir.update(i);
        }

        // exp(-0.015 * 100_000) is zero in f64
        clock.advance_secs(100_000);
        reservoir.update(1_000);

        assert_eq!(reservoir.landmark_secs(), 100_000);
        assert_eq!(reservoir.size(), 1);
        assert_eq!(reservoir.count(), 1);
        assert_eq!(reservoir.snapshot(false).values(), [1_000]);
    }

    #[test]
    fn concurrent_updates_stay_bounded() {
        let reservoir = Arc::new(DecayingReservoir::new(64, DEFAULT_ALPHA).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let reservoir = Arc::clone(&reservoir);
                std::thread::spawn(move || {
                    for i in 0..5_000 {
                        reservoir.update(t * 10_000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reservoir.count(), 40_000);
        assert!(reservoir.size() <= 64);
        assert!(reservoir.snapshot(true).size() <= 64);
        assert_eq!(reservoir.size(), 0);
    }

    #[test]
    fn decaying_reset_empties_sample() {
        let reservoir = DecayingReservoir::new(10, DEFAULT_ALPHA).unwrap();
        reservoir.update(3);
        assert_eq!(reservoir.snapshot(true).size(), 1);
        assert_eq!(reservoir.size(), 0);
        assert_eq!(reservoir.count(), 0);
    }
}
