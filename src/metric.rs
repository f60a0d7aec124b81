//! Counter, value and meter metrics over the stats primitives.

use std::sync::Arc;
use std::time::Duration;

use crate::stat::{CounterStat, MeterStat, Stat, ValueStat};
use crate::stats::clock::{system_clock, Clock};
use crate::stats::{CounterAccumulator, MovingAverages, Reservoir, ValueAccumulator};

/// Counts events per collection interval.
#[derive(Debug)]
pub struct Counter {
    name: String,
    count: CounterAccumulator,
}

impl Counter {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_clock(name, system_clock())
    }

    pub fn with_clock(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            count: CounterAccumulator::with_clock(clock),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn increment(&self) {
        self.count.increment();
    }

    pub fn add(&self, n: u64) {
        self.count.add(n);
    }

    pub fn count(&self) -> u64 {
        self.count.count()
    }

    pub fn collect(&self, reset: bool) -> Option<Stat> {
        let stats = self.count.snapshot(reset);
        (stats.count > 0).then(|| {
            Stat::Counter(CounterStat {
                name: self.name.clone(),
                stats,
            })
        })
    }
}

/// Count / total / max / mean of arbitrary values, e.g. payload sizes.
#[derive(Debug)]
pub struct ValueMetric {
    name: String,
    values: ValueAccumulator,
    reservoir: Option<Box<dyn Reservoir>>,
}

impl ValueMetric {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_clock(name, system_clock())
    }

    pub fn with_clock(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            values: ValueAccumulator::with_clock(clock),
            reservoir: None,
        }
    }

    pub fn with_reservoir(mut self, reservoir: Box<dyn Reservoir>) -> Self {
        self.reservoir = Some(reservoir);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add(&self, value: i64) {
        self.values.add(value);
        if let Some(reservoir) = &self.reservoir {
            reservoir.update(value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn collect(&self, reset: bool) -> Option<Stat> {
        let stats = self.values.snapshot(reset);
        let percentiles = self
            .reservoir
            .as_ref()
            .map(|r| r.snapshot(reset).percentiles());
        (!stats.is_empty()).then(|| {
            Stat::Value(ValueStat {
                name: self.name.clone(),
                stats,
                percentiles,
            })
        })
    }
}

/// Event counter with 10s / 1m / 5m / 15m moving rates.
///
/// The rates only move when [`Meter::tick`] is called at the interval the
/// meter was built with.
#[derive(Debug)]
pub struct Meter {
    name: String,
    clock: Arc<dyn Clock>,
    count: CounterAccumulator,
    rates: MovingAverages,
}

impl Meter {
    pub fn new(name: impl Into<String>, tick_interval: Duration) -> Self {
        Self::with_clock(name, tick_interval, system_clock())
    }

    pub fn with_clock(
        name: impl Into<String>,
        tick_interval: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            count: CounterAccumulator::with_clock(Arc::clone(&clock)),
            rates: MovingAverages::new(tick_interval),
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mark(&self, n: u64) {
        self.count.add(n);
        self.rates.update(n as i64);
    }

    pub fn tick(&self) {
        self.rates.tick_at(self.clock.nanos());
    }

    pub fn collect(&self, reset: bool) -> Option<Stat> {
        let count = self.count.snapshot(reset).count;
        let rates = self.rates.rates();
        (count > 0 || rates.m15 > 0.0).then(|| {
            Stat::Meter(MeterStat {
                name: self.name.clone(),
                count,
                rates,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{ManualClock, UniformReservoir};

    #[test]
    fn empty_counter_reports_nothing() {
        let counter = Counter::new("orders");
        assert!(counter.collect(true).is_none());
        counter.add(3);
        match counter.collect(true) {
            Some(Stat::Counter(s)) => assert_eq!(s.stats.count, 3),
            other => panic!("unexpected {other:?}"),
        }
        assert!(counter.collect(true).is_none());
    }

    #[test]
    fn value_metric_reports_stats_and_percentiles() {
        let metric = ValueMetric::new("order.items")
            .with_reservoir(Box::new(UniformReservoir::new(64).unwrap()));
        for v in [12, 14, 16] {
            metric.add(v);
        }
        match metric.collect(true) {
            Some(Stat::Value(s)) => {
                assert_eq!(s.stats.mean, 14);
                assert_eq!(s.percentiles.unwrap().median, 14.0);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(metric.is_empty());
    }

    #[test]
    fn meter_keeps_reporting_decaying_rate() {
        let meter = Meter::new("orders.rate", Duration::from_secs(5));
        meter.mark(50);
        meter.tick();
        match meter.collect(true) {
            Some(Stat::Meter(s)) => {
                assert_eq!(s.count, 50);
                assert!(s.rates.s10 > 0.0);
            }
            other => panic!("unexpected {other:?}"),
        }
        // no new events, but the rate is still non-zero
        match meter.collect(true) {
            Some(Stat::Meter(s)) => assert_eq!(s.count, 0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn metrics_take_interval_times_from_their_clock() {
        let clock = Arc::new(ManualClock::new());
        clock.advance_secs(60);
        let counter = Counter::with_clock("orders", clock.clone());
        let meter = Meter::with_clock("orders.rate", Duration::from_secs(5), clock.clone());
        counter.increment();
        meter.mark(1);
        clock.advance_secs(5);
        meter.tick();

        match counter.collect(true) {
            Some(Stat::Counter(s)) => {
                assert_eq!(s.stats.start_time, 60_000);
                assert_eq!(s.stats.duration_millis, 5_000);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(meter.rates.last_tick_nanos(), 65_000_000_000);
    }
}
