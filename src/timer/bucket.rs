use std::fmt;
use std::sync::Arc;

use crate::error::{MetricsError, Result};
use crate::stat::{Stat, ERROR_SUFFIX};
use crate::stats::clock::{system_clock, Clock};
use crate::stats::{ValueAccumulator, ValueStats};
use crate::timing::{MetricRef, RequestTimingSink};

use super::{nanos_to_micros, timed_stat, Timer};

/// Millisecond range `[lower, upper)` covered by one bucket. The overflow
/// bucket has no upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketRange {
    pub lower: i64,
    pub upper: Option<i64>,
}

impl BucketRange {
    pub fn contains(&self, millis: i64) -> bool {
        millis >= self.lower && self.upper.map_or(true, |upper| millis < upper)
    }
}

impl fmt::Display for BucketRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upper {
            Some(upper) => write!(f, "{}-{}", self.lower, upper),
            None => write!(f, "{}+", self.lower),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    range: BucketRange,
    label: String,
    accumulator: ValueAccumulator,
}

/// Timer that splits successful durations into millisecond ranges.
///
/// Bounds `[100, 200, 300]` give buckets `0-100`, `100-200`, `200-300`
/// and `300+`. Errors are never split: every error duration goes to the
/// single `.error` accumulator.
#[derive(Debug)]
pub struct BucketedTimer {
    metric: Arc<MetricRef>,
    bounds: Vec<i64>,
    buckets: Vec<Bucket>,
    error: ValueAccumulator,
}

impl BucketedTimer {
    pub fn new(
        name: impl Into<String>,
        bounds_millis: &[i64],
        sink: Arc<RequestTimingSink>,
    ) -> Result<Self> {
        Self::with_clock(name, bounds_millis, sink, system_clock())
    }

    pub fn with_clock(
        name: impl Into<String>,
        bounds_millis: &[i64],
        sink: Arc<RequestTimingSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        validate_bounds(bounds_millis)?;

        let mut buckets = Vec::with_capacity(bounds_millis.len() + 1);
        let mut lower = 0;
        for &upper in bounds_millis {
            buckets.push(Bucket::new(
                BucketRange {
                    lower,
                    upper: Some(upper),
                },
                &clock,
            ));
            lower = upper;
        }
        buckets.push(Bucket::new(BucketRange { lower, upper: None }, &clock));

        Ok(Self {
            bounds: bounds_millis.to_vec(),
            buckets,
            error: ValueAccumulator::with_clock(Arc::clone(&clock)),
            metric: MetricRef::with_clock(name, sink, clock),
        })
    }

    pub fn bounds(&self) -> &[i64] {
        &self.bounds
    }

    pub fn ranges(&self) -> impl Iterator<Item = BucketRange> + '_ {
        self.buckets.iter().map(|b| b.range)
    }

    /// Index of the bucket a successful `millis` duration lands in.
    pub fn bucket_index(&self, millis: i64) -> usize {
        self.bounds.partition_point(|&bound| bound <= millis)
    }

    pub fn bucket_stats(&self, index: usize) -> Option<ValueStats> {
        self.buckets.get(index).map(|b| b.accumulator.snapshot(false))
    }

    pub fn error_stats(&self) -> ValueStats {
        self.error.snapshot(false)
    }

    pub fn is_empty(&self) -> bool {
        self.error.is_empty() && self.buckets.iter().all(|b| b.accumulator.is_empty())
    }
}

impl Bucket {
    fn new(range: BucketRange, clock: &Arc<dyn Clock>) -> Self {
        Self {
            range,
            label: range.to_string(),
            accumulator: ValueAccumulator::with_clock(Arc::clone(clock)),
        }
    }
}

fn validate_bounds(bounds: &[i64]) -> Result<()> {
    let Some(&first) = bounds.first() else {
        return Err(MetricsError::EmptyBuckets);
    };
    if first <= 0 {
        return Err(MetricsError::NonPositiveBucket(first));
    }
    for (index, pair) in bounds.windows(2).enumerate() {
        if pair[1] <= pair[0] {
            return Err(MetricsError::UnsortedBuckets {
                index: index + 1,
                previous: pair[0],
                bound: pair[1],
            });
        }
    }
    Ok(())
}

impl Timer for BucketedTimer {
    fn metric_ref(&self) -> &Arc<MetricRef> {
        &self.metric
    }

    fn add_event_duration(&self, success: bool, duration_nanos: i64) {
        let micros = nanos_to_micros(duration_nanos);
        if success {
            let index = self.bucket_index(duration_nanos / 1_000_000);
            self.buckets[index].accumulator.add(micros);
        } else {
            self.error.add(micros);
        }
    }

    fn collect(&self, reset: bool) -> Vec<Stat> {
        let mut stats: Vec<Stat> = self
            .buckets
            .iter()
            .filter_map(|bucket| {
                let snapshot = bucket.accumulator.snapshot(reset);
                (!snapshot.is_empty()).then(|| {
                    timed_stat(
                        self.name().to_string(),
                        Some(bucket.label.clone()),
                        false,
                        snapshot,
                    )
                })
            })
            .collect();

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
