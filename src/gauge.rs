//! Polled gauges over external value sources.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::stat::{GaugeDoubleStat, GaugeLongStat, Stat};

/// Failure reported by a gauge's value source.
pub type GaugeError = Box<dyn std::error::Error + Send + Sync>;

type Source<V> = Box<dyn Fn() -> Result<V, GaugeError> + Send + Sync>;

/// Numeric types a gauge can report.
pub trait GaugeValue: Copy + Send + Sync + 'static {
    fn to_bits(self) -> u64;
    fn from_bits(bits: u64) -> Self;
    fn delta(self, baseline: Self) -> Self;
    fn into_stat(self, name: String) -> Stat;
}

impl GaugeValue for i64 {
    fn to_bits(self) -> u64 {
        self as u64
    }

    fn from_bits(bits: u64) -> Self {
        bits as i64
    }

    fn delta(self, baseline: Self) -> Self {
        self.wrapping_sub(baseline)
    }

    fn into_stat(self, name: String) -> Stat {
        Stat::GaugeLong(GaugeLongStat { name, value: self })
    }
}

impl GaugeValue for f64 {
    fn to_bits(self) -> u64 {
        f64::to_bits(self)
    }

    fn from_bits(bits: u64) -> Self {
        f64::from_bits(bits)
    }

    fn delta(self, baseline: Self) -> Self {
        self - baseline
    }

    fn into_stat(self, name: String) -> Stat {
        Stat::GaugeDouble(GaugeDoubleStat { name, value: self })
    }
}

/// A gauge polled once per collection pass.
///
/// By default a value bit-identical to the previous poll is not reported.
/// An incrementing gauge reports the change since the previous poll, for
/// cumulative sources such as total GC time; its baseline starts at zero.
///
/// A failing or panicking source is logged and contributes nothing for
/// that pass.
pub struct Gauge<V: GaugeValue> {
    name: String,
    source: Source<V>,
    report_changes_only: bool,
    incrementing: bool,
    has_last: AtomicBool,
    last: AtomicU64,
    baseline: AtomicU64,
}

pub type GaugeLong = Gauge<i64>;
pub type GaugeDouble = Gauge<f64>;

impl<V: GaugeValue> fmt::Debug for Gauge<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gauge")
            .field("name", &self.name)
            .field("report_changes_only", &self.report_changes_only)
            .field("incrementing", &self.incrementing)
            .finish_non_exhaustive()
    }
}

impl<V: GaugeValue> Gauge<V> {
    pub fn new<F>(name: impl Into<String>, source: F) -> Self
    where
        F: Fn() -> Result<V, GaugeError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            source: Box::new(source),
            report_changes_only: true,
            incrementing: false,
            has_last: AtomicBool::new(false),
            last: AtomicU64::new(0),
            baseline: AtomicU64::new(0),
        }
    }

    pub fn report_changes_only(mut self, enabled: bool) -> Self {
        self.report_changes_only = enabled;
        self
    }

    pub fn incrementing(mut self) -> Self {
        self.incrementing = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn poll(&self) -> Option<V> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.source)())) {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                tracing::warn!(gauge = %self.name, error = %err, "gauge source failed");
                None
            }
            Err(_) => {
                tracing::warn!(gauge = %self.name, "gauge source panicked");
                None
            }
        }
    }

    /// Poll the source and produce this pass's statistic, if any.
    pub fn collect(&self) -> Option<Stat> {
        let value = self.poll()?;
        let bits = value.to_bits();

        let previous = self.last.swap(bits, Ordering::AcqRel);
        let seen_before = self.has_last.swap(true, Ordering::AcqRel);
        if self.report_changes_only && seen_before && previous == bits {
            return None;
        }

        let reported = if self.incrementing {
            let baseline = V::from_bits(self.baseline.swap(bits, Ordering::AcqRel));
            value.delta(baseline)
        } else {
            value
        };
        Some(reported.into_stat(self.name.clone()))
    }
}
