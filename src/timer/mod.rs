//! Timers: success/error duration statistics with optional request
//! timing capture.

mod bucket;
mod event;

use std::sync::Arc;

pub use bucket::{BucketRange, BucketedTimer};
pub use event::TimedEvent;

use crate::stat::{Stat, TimedStat, ERROR_SUFFIX};
use crate::stats::clock::{system_clock, Clock};
use crate::stats::{Reservoir, ValueAccumulator, ValueStats};
use crate::timing::{MetricRef, RequestTimingSink};

/// Behaviour shared by the plain and bucketed timers.
pub trait Timer: Send + Sync {
    fn metric_ref(&self) -> &Arc<MetricRef>;

    /// Record one event that took `duration_nanos`.
    fn add_event_duration(&self, success: bool, duration_nanos: i64);

    /// Collect the current interval.
    fn collect(&self, reset: bool) -> Vec<Stat>;

    fn name(&self) -> &str {
        self.metric_ref().name()
    }

    /// Record an event that started at `start_nanos`, read from this
    /// timer's [`MetricRef::clock`], and ends now.
    fn add_event_since(&self, success: bool, start_nanos: u64) {
        let elapsed = self.metric_ref().clock().nanos().saturating_sub(start_nanos);
        self.add_event_duration(success, elapsed as i64);
    }

    /// Start timing an event. See [`TimedEvent`].
    fn start_event(&self) -> TimedEvent<'_, Self>
    where
        Self: Sized,
    {
        TimedEvent::start(self)
    }

    /// Time `f`, recording an error when it returns `Err`.
    fn time<T, E, F>(&self, f: F) -> Result<T, E>
    where
        Self: Sized,
        F: FnOnce() -> Result<T, E>,
    {
        let event = self.start_event();
        let result = f();
        if result.is_ok() {
            event.end();
        } else {
            event.end_with_error();
        }
        result
    }
}

pub(crate) fn nanos_to_micros(nanos: i64) -> i64 {
    nanos / 1_000
}

pub(crate) fn timed_stat(
    name: String,
    bucket: Option<String>,
    error: bool,
    stats: ValueStats,
) -> Stat {
    Stat::Timed(TimedStat {
        name,
        bucket,
        error,
        stats,
        percentiles: None,
    })
}

// ─── TimedMetric ─────────────────────────────────────────────────

/// Timer keeping separate success and error statistics, in microseconds.
#[derive(Debug)]
pub struct TimedMetric {
    metric: Arc<MetricRef>,
    success: ValueAccumulator,
    error: ValueAccumulator,
    reservoir: Option<Box<dyn Reservoir>>,
}

impl TimedMetric {
    pub fn new(name: impl Into<String>, sink: Arc<RequestTimingSink>) -> Self {
        Self::with_clock(name, sink, system_clock())
    }

    pub fn with_clock(
        name: impl Into<String>,
        sink: Arc<RequestTimingSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            success: ValueAccumulator::with_clock(Arc::clone(&clock)),
            error: ValueAccumulator::with_clock(Arc::clone(&clock)),
            metric: MetricRef::with_clock(name, sink, clock),
            reservoir: None,
        }
    }

    /// Sample successful durations to report percentiles.
    pub fn with_reservoir(mut self, reservoir: Box<dyn Reservoir>) -> Self {
        self.reservoir = Some(reservoir);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.success.is_empty() && self.error.is_empty()
    }

    pub fn success_stats(&self) -> ValueStats {
        self.success.snapshot(false)
    }

    pub fn error_stats(&self) -> ValueStats {
        self.error.snapshot(false)
    }
}

impl Timer for TimedMetric {
    fn metric_ref(&self) -> &Arc<MetricRef> {
        &self.metric
    }

    fn add_event_duration(&self, success: bool, duration_nanos: i64) {
        let micros = nanos_to_micros(duration_nanos);
        if success {
            self.success.add(micros);
            if let Some(reservoir) = &self.reservoir {
                reservoir.update(micros);
            }
        } else {
            self.error.add(micros);
        }
    }

    fn collect(&self, reset: bool) -> Vec<Stat> {
        let mut stats = Vec::with_capacity(2);

        let success = self.success.snapshot(reset);
        let percentiles = self
            .reservoir
            .as_ref()
            .map(|r| r.snapshot(reset).percentiles());
        if !success.is_empty() {
            stats.push(Stat::Timed(TimedStat {
                name: self.name().to_string(),
                bucket: None,
                error: false,
                stats: success,
                percentiles,
            }));
        }

        let error = self.error.snapshot(reset);
        if !error.is_empty() {
            stats.push(timed_stat(
                format!("{}{ERROR_SUFFIX}", self.name()),
                None,
                true,
                error,
            ));
        }
        stats
    }
}
