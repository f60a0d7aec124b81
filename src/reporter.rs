//! Periodic tick / collect task and the hand-off of its reports.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::format;
use crate::registry::MetricRegistry;
use crate::stats::clock::wall_time;
use crate::stat::Stat;
use crate::timing::RequestTiming;

// ─── Report ──────────────────────────────────────────────────────

/// Everything produced by one collection pass.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub collected_at: DateTime<Utc>,
    pub stats: Vec<Stat>,
    pub timings: Vec<RequestTiming>,
}

/// Consumer of collection results, e.g. a file or network writer.
pub trait ReportWriter: Send + Sync {
    fn write(&self, report: &Report);
}

/// Writes every statistic and request-timing row through `tracing`.
#[derive(Debug, Clone)]
pub struct LogWriter {
    decimal_places: u32,
}

impl LogWriter {
    pub fn new(decimal_places: u32) -> Self {
        Self { decimal_places }
    }
}

impl ReportWriter for LogWriter {
    fn write(&self, report: &Report) {
        for stat in &report.stats {
            match format::stat_line(stat, self.decimal_places) {
                Ok(line) => tracing::info!(target: "pulse_metrics::report", "{line}"),
                Err(err) => tracing::warn!(metric = stat.name(), error = %err, "cannot format stat"),
            }
        }
        for timing in &report.timings {
            tracing::info!(
                target: "pulse_metrics::report",
                metric = %timing.top_metric,
                external_id = timing.external_id.as_deref().unwrap_or("-"),
                "request timing"
            );
            for row in format::timing_rows(timing) {
                tracing::info!(target: "pulse_metrics::report", "  {row}");
            }
        }
    }
}

// ─── ReportStore ─────────────────────────────────────────────────

/// Latest report plus a rolling window of recent request timings, read
/// by the HTTP handlers.
#[derive(Debug)]
pub struct ReportStore {
    latest: RwLock<Option<Arc<Report>>>,
    recent_timings: Mutex<VecDeque<RequestTiming>>,
    timing_capacity: usize,
}

impl ReportStore {
    pub fn new(timing_capacity: usize) -> Self {
        Self {
            latest: RwLock::new(None),
            recent_timings: Mutex::new(VecDeque::with_capacity(timing_capacity)),
            timing_capacity: timing_capacity.max(1),
        }
    }

    pub fn publish(&self, report: Arc<Report>) {
        {
            let mut recent = self.recent_timings.lock();
            for timing in &report.timings {
                recent.push_back(timing.clone());
                if recent.len() > self.timing_capacity {
                    recent.pop_front();
                }
            }
        }
        *self.latest.write() = Some(report);
    }

    pub fn latest(&self) -> Option<Arc<Report>> {
        self.latest.read().clone()
    }

    pub fn recent_timings(&self) -> Vec<RequestTiming> {
        self.recent_timings.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        *self.latest.write() = None;
        self.recent_timings.lock().clear();
    }
}

// ─── Reporter ────────────────────────────────────────────────────

/// Run one collect-and-reset pass and hand the result to `store` and
/// every writer.
pub fn collect_pass(
    registry: &MetricRegistry,
    store: &ReportStore,
    writers: &[Arc<dyn ReportWriter>],
) -> Arc<Report> {
    let report = Arc::new(Report {
        collected_at: wall_time(registry.clock().as_ref()),
        stats: registry.collect(true),
        timings: registry.drain_request_timings(),
    });
    for writer in writers {
        writer.write(&report);
    }
    store.publish(Arc::clone(&report));
    report
}

/// Background task that ticks moving averages and runs collection passes
/// at the configured intervals.
///
/// `stop` ends the loop at its next wake-up; dropping the reporter aborts
/// it outright. There is no in-flight state to drain.
#[derive(Debug)]
pub struct Reporter {
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Reporter {
    pub fn spawn(
        registry: Arc<MetricRegistry>,
        store: Arc<ReportStore>,
        writers: Vec<Arc<dyn ReportWriter>>,
    ) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let tick_every = registry.config().tick_interval();
        let collect_every = registry.config().collect_interval();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_every);
            let mut collector = tokio::time::interval(collect_every);
            // both intervals fire immediately; skip that first instant
            ticker.tick().await;
            collector.tick().await;

            tracing::info!(?tick_every, ?collect_every, "reporter started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => registry.tick(),
                    _ = collector.tick() => {
                        let report = collect_pass(&registry, &store, &writers);
                        tracing::debug!(
                            stats = report.stats.len(),
                            timings = report.timings.len(),
                            "collection pass"
                        );
                    }
                    _ = stopped.changed() => break,
                }
            }
            tracing::info!("reporter stopped");
        });

        Self {
            stop,
            task: Some(task),
        }
    }

    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Stop and wait for the task to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
