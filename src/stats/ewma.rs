use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Exponentially weighted moving average of an event rate, in the style
/// of the UNIX load average.
///
/// `update` may be called from any thread. `tick` must be called by a
/// single scheduler at the fixed interval the instance was built with.
#[derive(Debug)]
pub struct Ewma {
    window: Duration,
    interval: Duration,
    alpha: f64,
    uncounted: AtomicI64,
    /// Events per second, stored as `f64` bits. Only `tick` and `clear`
    /// write it.
    rate: AtomicU64,
    last_tick_nanos: AtomicU64,
}

impl Ewma {
    pub fn new(window: Duration, interval: Duration) -> Self {
        let interval_ms = interval.as_millis().max(1) as f64;
        let window_ms = window.as_millis().max(1) as f64;
        Self {
            window,
            interval,
            alpha: 1.0 - (-interval_ms / window_ms).exp(),
            uncounted: AtomicI64::new(0),
            rate: AtomicU64::new(0f64.to_bits()),
            last_tick_nanos: AtomicU64::new(0),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn update(&self, n: i64) {
        self.uncounted.fetch_add(n, Ordering::Relaxed);
    }

    /// Drain the events seen since the previous tick and fold them into
    /// the smoothed rate.
    pub fn tick(&self) {
        self.tick_at(super::clock::now_nanos());
    }

    pub(crate) fn tick_at(&self, now_nanos: u64) {
        let events = self.uncounted.swap(0, Ordering::AcqRel);
        let interval_ms = self.interval.as_millis().max(1) as f64;
        let instant_rate = events as f64 * 1000.0 / interval_ms;

        let rate = f64::from_bits(self.rate.load(Ordering::Acquire));
        let rate = rate + self.alpha * (instant_rate - rate);
        self.rate.store(rate.to_bits(), Ordering::Release);
        self.last_tick_nanos.store(now_nanos, Ordering::Release);
    }

    /// The smoothed rate expressed as events per `per`.
    pub fn rate(&self, per: Duration) -> f64 {
        f64::from_bits(self.rate.load(Ordering::Acquire)) * per.as_secs_f64()
    }

    /// Events per second.
    pub fn rate_per_sec(&self) -> f64 {
        self.rate(Duration::from_secs(1))
    }

    pub fn last_tick_nanos(&self) -> u64 {
        self.last_tick_nanos.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.uncounted.store(0, Ordering::Release);
        self.rate.store(0f64.to_bits(), Ordering::Release);
    }
}

// ─── Multi-window bundle ─────────────────────────────────────────

pub const WINDOW_10S: Duration = Duration::from_secs(10);
pub const WINDOW_1M: Duration = Duration::from_secs(60);
pub const WINDOW_5M: Duration = Duration::from_secs(5 * 60);
pub const WINDOW_15M: Duration = Duration::from_secs(15 * 60);

/// Per-second rates at each standard window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateStats {
    pub s10: f64,
    pub m1: f64,
    pub m5: f64,
    pub m15: f64,
}

/// The four standard windows (10s, 1m, 5m, 15m) fed from one stream.
#[derive(Debug)]
pub struct MovingAverages {
    windows: [Ewma; 4],
}

impl MovingAverages {
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            windows: [
                Ewma::new(WINDOW_10S, tick_interval),
                Ewma::new(WINDOW_1M, tick_interval),
                Ewma::new(WINDOW_5M, tick_interval),
                Ewma::new(WINDOW_15M, tick_interval),
            ],
        }
    }

    pub fn update(&self, n: i64) {
        for ewma in &self.windows {
            ewma.update(n);
        }
    }

    pub fn tick(&self) {
        self.tick_at(super::clock::now_nanos());
    }

    pub(crate) fn tick_at(&self, now_nanos: u64) {
        for ewma in &self.windows {
            ewma.tick_at(now_nanos);
        }
    }

    pub fn last_tick_nanos(&self) -> u64 {
        self.windows[0].last_tick_nanos()
    }

    pub fn clear(&self) {
        for ewma in &self.windows {
            ewma.clear();
        }
    }

    pub fn rates(&self) -> RateStats {
        let [s10, m1, m5, m15] = &self.windows;
        RateStats {
            s10: s10.rate_per_sec(),
            m1: m1.rate_per_sec(),
            m5: m5.rate_per_sec(),
            m15: m15.rate_per_sec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(5);

    #[test]
    fn rate_is_zero_before_first_tick() {
        let ewma = Ewma::new(WINDOW_1M, INTERVAL);
        ewma.update(1_000);
        assert_eq!(ewma.rate_per_sec(), 0.0);
    }

    #[test]
    fn first_tick_applies_alpha() {
        let ewma = Ewma::new(WINDOW_1M, INTERVAL);
        ewma.update(50);
        ewma.tick();
        // 50 events over 5s is 10/s, weighted by alpha
        let expected = ewma.alpha() * 10.0;
        assert!((ewma.rate_per_sec() - expected).abs() < 1e-9);
    }

    #[test]
    fn alpha_matches_load_average_formula() {
        let ewma = Ewma::new(WINDOW_1M, INTERVAL);
        let expected = 1.0 - (-5.0f64 / 60.0).exp();
        assert!((ewma.alpha() - expected).abs() < 1e-12);
    }

    #[test]
    fn converges_on_steady_rate() {
        for window in [WINDOW_10S, WINDOW_1M, WINDOW_5M] {
            let ewma = Ewma::new(window, INTERVAL);
            for _ in 0..2_000 {
                ewma.update(100);
                ewma.tick();
            }
            assert!(
                (ewma.rate_per_sec() - 20.0).abs() < 0.01,
                "window {:?} rate {}",
                window,
                ewma.rate_per_sec()
            );
        }
    }

    #[test]
    fn decays_when_events_stop() {
        let ewma = Ewma::new(WINDOW_10S, INTERVAL);
        for _ in 0..50 {
            ewma.update(100);
            ewma.tick();
        }
        let busy = ewma.rate_per_sec();
        for _ in 0..10 {
            ewma.tick();
        }
        assert!(ewma.rate_per_sec() < busy / 10.0);
    }

    #[test]
    fn rate_scales_to_unit() {
        let ewma = Ewma::new(WINDOW_10S, INTERVAL);
        for _ in 0..500 {
            ewma.update(5);
            ewma.tick();
        }
        let per_sec = ewma.rate_per_sec();
        let per_min = ewma.rate(Duration::from_secs(60));
        assert!((per_min - per_sec * 60.0).abs() < 1e-9);
    }

    #[test]
    fn clear_resets_to_exactly_zero() {
        let ewma = Ewma::new(WINDOW_1M, INTERVAL);
        ewma.update(10);
        ewma.tick();
        ewma.update(10);
        ewma.clear();
        assert_eq!(ewma.rate_per_sec(), 0.0);
        ewma.tick();
        assert_eq!(ewma.rate_per_sec(), 0.0);
    }

    #[test]
    fn moving_averages_feed_every_window() {
        let averages = MovingAverages::new(INTERVAL);
        averages.update(10);
        averages.tick();
        let rates = averages.rates();
        assert!(rates.s10 > rates.m1);
        assert!(rates.m1 > rates.m5);
        assert!(rates.m5 > rates.m15);
        assert!(rates.m15 > 0.0);
    }
}
