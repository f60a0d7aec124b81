//! Named metric handles and the collection pass over them.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::MetricsConfig;
use crate::error::{MetricsError, Result};
use crate::gauge::{GaugeDouble, GaugeLong};
use crate::metric::{Counter, Meter, ValueMetric};
use crate::stat::Stat;
use crate::stats::clock::{system_clock, Clock};
use crate::stats::{DecayingReservoir, Reservoir};
use crate::timer::{BucketedTimer, TimedMetric, Timer};
use crate::timing::{MetricRef, RequestTiming, RequestTimingSink};

/// A registered metric of any kind.
#[derive(Debug, Clone)]
pub enum Metric {
    Counter(Arc<Counter>),
    Value(Arc<ValueMetric>),
    Timer(Arc<TimedMetric>),
    BucketedTimer(Arc<BucketedTimer>),
    Meter(Arc<Meter>),
    GaugeLong(Arc<GaugeLong>),
    GaugeDouble(Arc<GaugeDouble>),
}

impl Metric {
    pub fn kind(&self) -> &'static str {
        match self {
            Metric::Counter(_) => Counter::KIND,
            Metric::Value(_) => ValueMetric::KIND,
            Metric::Timer(_) => TimedMetric::KIND,
            Metric::BucketedTimer(_) => BucketedTimer::KIND,
            Metric::Meter(_) => Meter::KIND,
            Metric::GaugeLong(_) => "long gauge",
            Metric::GaugeDouble(_) => "double gauge",
        }
    }

    fn metric_ref(&self) -> Option<&Arc<MetricRef>> {
        match self {
            Metric::Timer(t) => Some(t.metric_ref()),
            Metric::BucketedTimer(t) => Some(t.metric_ref()),
            _ => None,
        }
    }

    fn collect_into(&self, reset: bool, out: &mut Vec<Stat>) {
        match self {
            Metric::Counter(m) => out.extend(m.collect(reset)),
            Metric::Value(m) => out.extend(m.collect(reset)),
            Metric::Timer(m) => out.extend(m.collect(reset)),
            Metric::BucketedTimer(m) => out.extend(m.collect(reset)),
            Metric::Meter(m) => out.extend(m.collect(reset)),
            Metric::GaugeLong(m) => out.extend(m.collect()),
            Metric::GaugeDouble(m) => out.extend(m.collect()),
        }
    }
}

/// Metric types the registry creates on first lookup.
trait Registered: Sized {
    const KIND: &'static str;
    fn wrap(metric: Arc<Self>) -> Metric;
    fn unwrap(metric: &Metric) -> Option<&Arc<Self>>;
}

macro_rules! registered {
    ($type:ty, $variant:ident, $kind:literal) => {
        impl Registered for $type {
            const KIND: &'static str = $kind;

            fn wrap(metric: Arc<Self>) -> Metric {
                Metric::$variant(metric)
            }

            fn unwrap(metric: &Metric) -> Option<&Arc<Self>> {
                match metric {
                    Metric::$variant(m) => Some(m),
                    _ => None,
                }
            }
        }
    };
}

registered!(Counter, Counter, "counter");
registered!(ValueMetric, Value, "value");
registered!(TimedMetric, Timer, "timer");
registered!(BucketedTimer, BucketedTimer, "bucketed timer");
registered!(Meter, Meter, "meter");

/// Stores metrics by name. Lookups create on first use; a name is bound
/// to one kind for the life of the registry.
#[derive(Debug)]
pub struct MetricRegistry {
    config: MetricsConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<RequestTimingSink>,
    metrics: RwLock<BTreeMap<String, Metric>>,
}

impl MetricRegistry {
    pub fn new(config: MetricsConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Registry whose metrics all read time from `clock`.
    pub fn with_clock(config: MetricsConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            sink: Arc::new(RequestTimingSink::new(config.timing_buffer)),
            config,
            clock,
            metrics: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn timing_sink(&self) -> &Arc<RequestTimingSink> {
        &self.sink
    }

    fn reservoir(&self) -> Result<Box<dyn Reservoir>> {
        Ok(Box::new(DecayingReservoir::with_clock(
            self.config.reservoir_capacity,
            self.config.reservoir_alpha,
            Arc::clone(&self.clock),
        )?))
    }

    fn get_or_create<T, F>(&self, name: String, make: F) -> Result<Arc<T>>
    where
        T: Registered,
        F: FnOnce(&str) -> Result<T>,
    {
        if let Some(existing) = self.metrics.read().get(&name) {
            return lookup(&name, existing);
        }

        let mut metrics = self.metrics.write();
        if let Some(existing) = metrics.get(&name) {
            return lookup(&name, existing);
        }
        let metric = Arc::new(make(&name)?);
        metrics.insert(name, T::wrap(Arc::clone(&metric)));
        Ok(metric)
    }

    pub fn counter(&self, name: impl Into<String>) -> Result<Arc<Counter>> {
        self.get_or_create(name.into(), |n| {
            Ok(Counter::with_clock(n, Arc::clone(&self.clock)))
        })
    }

    pub fn value(&self, name: impl Into<String>) -> Result<Arc<ValueMetric>> {
        self.get_or_create(name.into(), |n| {
            Ok(ValueMetric::with_clock(n, Arc::clone(&self.clock))
                .with_reservoir(self.reservoir()?))
        })
    }

    pub fn timer(&self, name: impl Into<String>) -> Result<Arc<TimedMetric>> {
        self.get_or_create(name.into(), |n| {
            Ok(
                TimedMetric::with_clock(n, Arc::clone(&self.sink), Arc::clone(&self.clock))
                    .with_reservoir(self.reservoir()?),
            )
        })
    }

    /// Bucketed timer over `bounds_millis`. The bounds only apply when the
    /// timer is first created.
    pub fn bucketed_timer(
        &self,
        name: impl Into<String>,
        bounds_millis: &[i64],
    ) -> Result<Arc<BucketedTimer>> {
        self.get_or_create(name.into(), |n| {
            BucketedTimer::with_clock(
                n,
                bounds_millis,
                Arc::clone(&self.sink),
                Arc::clone(&self.clock),
            )
        })
    }

    pub fn meter(&self, name: impl Into<String>) -> Result<Arc<Meter>> {
        let tick = self.config.tick_interval();
        self.get_or_create(name.into(), |n| {
            Ok(Meter::with_clock(n, tick, Arc::clone(&self.clock)))
        })
    }

    /// Register a gauge, replacing any gauge of the same name.
    pub fn register_gauge_long(&self, gauge: GaugeLong) -> Result<Arc<GaugeLong>> {
        let gauge = Arc::new(gauge);
        self.register(gauge.name().to_string(), Metric::GaugeLong(Arc::clone(&gauge)))?;
        Ok(gauge)
    }

    pub fn register_gauge_double(&self, gauge: GaugeDouble) -> Result<Arc<GaugeDouble>> {
        let gauge = Arc::new(gauge);
        self.register(gauge.name().to_string(), Metric::GaugeDouble(Arc::clone(&gauge)))?;
        Ok(gauge)
    }

    fn register(&self, name: String, metric: Metric) -> Result<()> {
        let mut metrics = self.metrics.write();
        if let Some(existing) = metrics.get(&name) {
            if existing.kind() != metric.kind() {
                return Err(MetricsError::KindMismatch {
                    name,
                    existing: existing.kind(),
                    requested: metric.kind(),
                });
            }
        }
        metrics.insert(name, metric);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Metric> {
        self.metrics.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.metrics.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.metrics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot_metrics(&self) -> Vec<Metric> {
        self.metrics.read().values().cloned().collect()
    }

    /// Tick every moving average. Called by the reporter at the
    /// configured tick interval.
    pub fn tick(&self) {
        for metric in self.snapshot_metrics() {
            if let Metric::Meter(meter) = metric {
                meter.tick();
            }
        }
    }

    /// One collection pass over every metric, in name order. Only the
    /// single collector should pass `reset = true`.
    pub fn collect(&self, reset: bool) -> Vec<Stat> {
        let metrics = self.snapshot_metrics();
        let mut stats = Vec::with_capacity(metrics.len());
        for metric in &metrics {
            metric.collect_into(reset, &mut stats);
        }
        tracing::debug!(metrics = metrics.len(), stats = stats.len(), reset, "collected");
        stats
    }

    pub fn drain_request_timings(&self) -> Vec<RequestTiming> {
        self.sink.drain()
    }

    /// Collect request timings for the next `count` requests of every
    /// timer matching `pattern`. Returns the names affected.
    ///
    /// `pattern` is an exact name, `prefix*`, `*suffix`, `*infix*` or `*`.
    pub fn set_request_timing_collection(&self, pattern: &str, count: i64) -> Vec<String> {
        let metrics = self.metrics.read();
        let updated: Vec<String> = metrics
            .iter()
            .filter(|(name, _)| matches_pattern(pattern, name))
            .filter_map(|(name, metric)| {
                metric.metric_ref().map(|r| {
                    r.set_request_timing_collection(count);
                    name.clone()
                })
            })
            .collect();
        tracing::info!(pattern, count, timers = updated.len(), "request timing collection set");
        updated
    }

    /// Timers currently collecting, with their remaining counts.
    pub fn request_timing_collection_active(&self) -> Vec<(String, i64)> {
        self.metrics
            .read()
            .iter()
            .filter_map(|(name, metric)| {
                let remaining = metric.metric_ref()?.request_timing_collection();
                (remaining > 0).then(|| (name.clone(), remaining))
            })
            .collect()
    }
}

fn lookup<T: Registered>(name: &str, existing: &Metric) -> Result<Arc<T>> {
    T::unwrap(existing)
        .cloned()
        .ok_or_else(|| MetricsError::KindMismatch {
            name: name.to_string(),
            existing: existing.kind(),
            requested: T::KIND,
        })
}

fn matches_pattern(pattern: &str, name: &str) -> bool {
    match (pattern.strip_prefix('*'), pattern.strip_suffix('*')) {
        _ if pattern == "*" => true,
        (Some(rest), _) if rest.ends_with('*') => name.contains(&rest[..rest.len() - 1]),
        (Some(suffix), _) => name.ends_with(suffix),
        (None, Some(prefix)) => name.starts_with(prefix),
        (None, None) => name == pattern,
    }
}
