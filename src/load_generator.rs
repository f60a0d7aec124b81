use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pulse_metrics::timing::context;
use pulse_metrics::{BucketedTimer, Counter, Meter, MetricRegistry, TimedMetric, Timer, ValueMetric};

// ─── Instruments ─────────────────────────────────────────────────

/// Bucket bounds (ms) for the top-level order operation.
const PLACE_ORDER_BUCKETS: &[i64] = &[5, 10, 20];

/// Every metric the synthetic order workload records into.
pub struct Instruments {
    place: Arc<BucketedTimer>,
    inventory: Arc<TimedMetric>,
    payment: Arc<TimedMetric>,
    db_insert: Arc<TimedMetric>,
    orders: Arc<Counter>,
    items: Arc<ValueMetric>,
    order_rate: Arc<Meter>,
}

impl Instruments {
    pub fn register(registry: &MetricRegistry) -> pulse_metrics::Result<Self> {
        Ok(Self {
            place: registry.bucketed_timer("app.order.place", PLACE_ORDER_BUCKETS)?,
            inventory: registry.timer("app.inventory.check")?,
            payment: registry.timer("app.payment.charge")?,
            db_insert: registry.timer("app.db.insert")?,
            orders: registry.counter("app.orders.placed")?,
            items: registry.value("app.order.items")?,
            order_rate: registry.meter("app.orders.rate")?,
        })
    }
}

// ─── Public entry point ──────────────────────────────────────────

/// Runs `concurrency` blocking workers placing synthetic orders until the
/// deadline or the `running` flag is cleared.
///
/// Workers are OS threads rather than async tasks: request timing
/// contexts are thread-confined.
pub async fn run(
    running: Arc<AtomicBool>,
    instruments: Arc<Instruments>,
    concurrency: u32,
    duration_secs: u64,
    error_pct: u8,
) {
    let deadline = Instant::now() + Duration::from_secs(duration_secs);

    let mut handles = Vec::with_capacity(concurrency as usize);

    for worker_id in 0..concurrency {
        let running = running.clone();
        let instruments = instruments.clone();

        handles.push(tokio::task::spawn_blocking(move || {
            worker(worker_id, &running, &instruments, deadline, error_pct);
        }));
    }

    // Wait for all workers to finish
    for h in handles {
        if let Err(err) = h.await {
            tracing::warn!(error = %err, "load worker failed");
        }
    }

    // Mark benchmark as finished
    running.store(false, Ordering::SeqCst);
    tracing::info!(concurrency, "load generator finished");
}

// ─── Worker loop ─────────────────────────────────────────────────

fn worker(
    id: u32,
    running: &AtomicBool,
    instruments: &Instruments,
    deadline: Instant,
    error_pct: u8,
) {
    // Each worker gets its own deterministic RNG seeded uniquely.
    let mut rng = StdRng::seed_from_u64(1000 + id as u64);

    while running.load(Ordering::Relaxed) && Instant::now() < deadline {
        place_order(&mut rng, instruments, error_pct);
    }
}

fn pause(rng: &mut StdRng, micros: Range<u64>) {
    std::thread::sleep(Duration::from_micros(rng.gen_range(micros)));
}

// ─── One order ───────────────────────────────────────────────────

/// place -> inventory check, payment charge -> db insert. A declined
/// payment fails the whole order.
fn place_order(rng: &mut StdRng, ins: &Instruments, error_pct: u8) {
    let event = ins.place.start_event();
    if event.is_collecting() {
        context::set_external_id(uuid::Uuid::new_v4().to_string());
    }

    let items = rng.gen_range(1..=8);
    ins.items.add(items);

    let _ = ins.inventory.time(|| {
        context::attribute("items", items.to_string());
        pause(rng, 200..2_000);
        Ok::<_, ()>(())
    });

    let charged = ins.payment.time(|| {
        pause(rng, 500..5_000);
        if rng.gen_range(0u8..100) < error_pct {
            Err(())
        } else {
            Ok(())
        }
    });

    if charged.is_err() {
        event.end_with_error();
        return;
    }

    let _ = ins.db_insert.time(|| {
        context::attribute("table", "orders");
        pause(rng, 300..3_000);
        Ok::<_, ()>(())
    });

    event.end();
    ins.orders.increment();
    ins.order_rate.mark(1);
}
