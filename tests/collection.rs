use std::sync::Arc;
use std::thread;

use pulse_metrics::timing::context;
use pulse_metrics::{MetricRegistry, MetricsConfig, Stat, Timer};

fn registry() -> Arc<MetricRegistry> {
    Arc::new(MetricRegistry::new(MetricsConfig::default()))
}

#[test]
fn concurrent_recording_is_fully_collected() {
    let registry = registry();
    let counter = registry.counter("jobs.done").unwrap();
    let value = registry.value("jobs.size").unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let counter = Arc::clone(&counter);
            let value = Arc::clone(&value);
            thread::spawn(move || {
                for i in 1..=1_000 {
                    counter.increment();
                    value.add(i);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let stats = registry.collect(true);
    assert_eq!(stats.len(), 2);
    match &stats[0] {
        Stat::Counter(c) => assert_eq!(c.stats.count, 4_000),
        other => panic!("unexpected {other:?}"),
    }
    match &stats[1] {
        Stat::Value(v) => {
            assert_eq!(v.stats.count, 4_000);
            assert_eq!(v.stats.total, 4 * 500_500);
            assert_eq!(v.stats.max, 1_000);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(registry.collect(true).is_empty());
}

#[test]
fn bucketed_timer_reports_buckets_then_errors() {
    let registry = registry();
    let timer = registry.bucketed_timer("web.api", &[100, 200, 300]).unwrap();

    timer.add_event_duration(true, 12_000_000);
    timer.add_event_duration(true, 150_000_000);
    timer.add_event_duration(true, 450_000_000);
    timer.add_event_duration(false, 220_000_000);

    let names: Vec<_> = registry
        .collect(true)
        .iter()
        .map(Stat::qualified_name)
        .collect();
    assert_eq!(
        names,
        [
            "web.api;bucket=0-100",
            "web.api;bucket=100-200",
            "web.api;bucket=300+",
            "web.api.error",
        ]
    );
}

#[test]
fn nested_events_build_one_request_timing() {
    let registry = registry();
    let outer = registry.timer("app.order.place").unwrap();
    let inner = registry.timer("app.db.insert").unwrap();
    registry.set_request_timing_collection("app.order.place", 1);

    let worker = {
        let outer = Arc::clone(&outer);
        let inner = Arc::clone(&inner);
        thread::spawn(move || {
            let event = outer.start_event();
            assert!(event.is_collecting());
            context::set_external_id("order-1");
            inner
                .time(|| {
                    context::attribute("table", "orders");
                    Ok::<_, ()>(())
                })
                .unwrap();
            event.end();
            assert!(!context::is_active());

            // the collection budget is spent
            let second = outer.start_event();
            assert!(!second.is_collecting());
            second.end();
        })
    };
    worker.join().unwrap();

    assert!(registry.request_timing_collection_active().is_empty());
    let timings = registry.drain_request_timings();
    assert_eq!(timings.len(), 1);

    let timing = &timings[0];
    assert_eq!(timing.top_metric, "app.order.place");
    assert_eq!(timing.external_id.as_deref(), Some("order-1"));
    let entries: Vec<_> = timing
        .entries
        .iter()
        .map(|e| (e.depth, e.metric_name.as_str()))
        .collect();
    assert_eq!(entries, [(0, "app.order.place"), (1, "app.db.insert")]);
    assert_eq!(
        timing.entries[1].attributes,
        [("table".to_string(), "orders".to_string())]
    );
    assert!(timing.entries[0].end_nanos >= timing.entries[1].end_nanos);
}

#[test]
fn timers_only_nest_inside_a_collecting_request() {
    let registry = registry();
    let inner = registry.timer("app.db.insert").unwrap();

    let event = inner.start_event();
    assert!(!event.is_collecting());
    event.end();

    assert!(registry.drain_request_timings().is_empty());
    assert_eq!(inner.success_stats().count, 1);
}
