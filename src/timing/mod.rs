//! Per-request call-tree timing for a sampled subset of requests.
//!
//! A timer whose [`MetricRef`] is put into collecting mode opens a
//! thread-confined context when it starts; nested timers started on the
//! same thread while that context is open are recorded as children. When
//! the outermost timer ends, the entries are assembled into a
//! [`RequestTiming`] and handed to the [`RequestTimingSink`].

pub mod context;
mod sink;

use std::cmp::Ordering;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use sink::RequestTimingSink;

use crate::stats::clock::{system_clock, Clock};

// ─── MetricRef ───────────────────────────────────────────────────

/// Identity of a timer as seen by the timing context, plus its
/// request-collection state.
///
/// The state machine is `OFF -> COLLECTING(n) -> OFF`: `n` counts down
/// each time a request that started at this metric completes.
#[derive(Debug)]
pub struct MetricRef {
    name: String,
    remaining: AtomicI64,
    sink: Arc<RequestTimingSink>,
    clock: Arc<dyn Clock>,
}

impl MetricRef {
    pub fn new(name: impl Into<String>, sink: Arc<RequestTimingSink>) -> Arc<Self> {
        Self::with_clock(name, sink, system_clock())
    }

    pub fn with_clock(
        name: impl Into<String>,
        sink: Arc<RequestTimingSink>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            remaining: AtomicI64::new(0),
            sink,
            clock,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Clock for this timer's event durations and, when it opens a
    /// request context, for every entry in that request.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn sink(&self) -> &Arc<RequestTimingSink> {
        &self.sink
    }

    /// Collect the next `count` top-level requests (0 switches off).
    pub fn set_request_timing_collection(&self, count: i64) {
        self.remaining.store(count.max(0), AtomicOrdering::Release);
    }

    pub fn request_timing_collection(&self) -> i64 {
        self.remaining.load(AtomicOrdering::Acquire)
    }

    pub fn is_collecting(&self) -> bool {
        self.request_timing_collection() > 0
    }

    /// Count one completed top-level request, never going below zero.
    fn complete_request(&self) {
        let _ = self.remaining.fetch_update(
            AtomicOrdering::AcqRel,
            AtomicOrdering::Acquire,
            |n| (n > 0).then(|| n - 1),
        );
    }
}

// ─── Entries ─────────────────────────────────────────────────────

/// One closed timed operation within a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimingEntry {
    pub depth: u16,
    pub metric_name: String,
    pub start_nanos: u64,
    pub end_nanos: u64,
    pub attributes: Vec<(String, String)>,
}

impl TimingEntry {
    pub fn duration_nanos(&self) -> u64 {
        self.end_nanos.saturating_sub(self.start_nanos)
    }
}

/// Display order for request entries: start time, then depth (a parent
/// and child that start on the same nanosecond show the parent first),
/// then the longer-running entry first.
///
/// Entries arrive in completion order, innermost first; sorting with this
/// comparator restores root-to-leaf start order.
pub fn start_order(a: &TimingEntry, b: &TimingEntry) -> Ordering {
    a.start_nanos
        .cmp(&b.start_nanos)
        .then(a.depth.cmp(&b.depth))
        .then(b.end_nanos.cmp(&a.end_nanos))
}

pub fn sort_entries(entries: &mut [TimingEntry]) {
    entries.sort_by(start_order);
}

/// The call tree of one sampled request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestTiming {
    pub report_time: DateTime<Utc>,
    pub external_id: Option<String>,
    pub top_metric: String,
    pub entries: Vec<TimingEntry>,
}

impl RequestTiming {
    pub fn new(
        top_metric: String,
        external_id: Option<String>,
        mut entries: Vec<TimingEntry>,
    ) -> Self {
        sort_entries(&mut entries);
        Self {
            report_time: Utc::now(),
            external_id,
            top_metric,
            entries,
        }
    }

    /// Duration of the outermost entry.
    pub fn total_nanos(&self) -> u64 {
        self.entries
            .iter()
            .find(|e| e.depth == 0)
            .map(TimingEntry::duration_nanos)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(depth: u16, name: &str, start: u64, end: u64) -> TimingEntry {
        TimingEntry {
            depth,
            metric_name: name.to_string(),
            start_nanos: start,
            end_nanos: end,
            attributes: Vec::new(),
        }
    }

    #[test]
    fn sort_restores_start_order_from_completion_order() {
        // completion order: innermost first
        let mut entries = vec![
            entry(2, "c", 300, 400),
            entry(1, "b", 200, 500),
            entry(0, "a", 100, 600),
        ];
        sort_entries(&mut entries);

        let names: Vec<_> = entries.iter().map(|e| e.metric_name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        let depths: Vec<_> = entries.iter().map(|e| e.depth).collect();
        assert_eq!(depths, [0, 1, 2]);
    }

    #[test]
    fn sort_handles_out_of_order_insertion() {
        let mut entries = vec![
            entry(1, "b2", 450, 550),
            entry(0, "a", 100, 600),
            entry(2, "c", 300, 400),
            entry(1, "b1", 200, 420),
        ];
        sort_entries(&mut entries);

        let names: Vec<_> = entries.iter().map(|e| e.metric_name.as_str()).collect();
        assert_eq!(names, ["a", "b1", "c", "b2"]);
    }

    #[test]
    fn equal_start_orders_by_depth_then_longest() {
        let parent = entry(0, "parent", 100, 500);
        let child = entry(1, "child", 100, 300);
        assert_eq!(start_order(&parent, &child), Ordering::Less);
        assert_eq!(start_order(&child, &parent), Ordering::Greater);

        let long = entry(1, "long", 100, 900);
        let short = entry(1, "short", 100, 200);
        assert_eq!(start_order(&long, &short), Ordering::Less);
        assert_eq!(start_order(&short, &short), Ordering::Equal);
    }

    #[test]
    fn collection_count_never_goes_negative() {
        let metric = MetricRef::new("svc", Arc::new(RequestTimingSink::new(10)));
        metric.set_request_timing_collection(1);
        assert!(metric.is_collecting());
        metric.complete_request();
        metric.complete_request();
        assert_eq!(metric.request_timing_collection(), 0);
        assert!(!metric.is_collecting());
    }

    #[test]
    fn negative_collection_count_means_off() {
        let metric = MetricRef::new("svc", Arc::new(RequestTimingSink::new(10)));
        metric.set_request_timing_collection(-5);
        assert_eq!(metric.request_timing_collection(), 0);
    }

    #[test]
    fn total_is_root_duration() {
        let timing = RequestTiming::new(
            "a".into(),
            None,
            vec![entry(1, "b", 20, 30), entry(0, "a", 10, 50)],
        );
        assert_eq!(timing.total_nanos(), 40);
        assert_eq!(timing.entries[0].metric_name, "a");
    }
}
