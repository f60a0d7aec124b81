use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use pulse_metrics::{
    logging, GaugeDouble, GaugeError, GaugeLong, LogWriter, MetricRegistry, MetricsConfig,
    ReportStore, ReportWriter, Reporter,
};

mod handlers;
mod load_generator;
mod middleware;
mod server;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Every metric the service and the load generator record into.
    pub registry: Arc<MetricRegistry>,

    /// Reports published by the background reporter, read by the API.
    pub store: Arc<ReportStore>,

    /// Pre-registered handles used by the load generator.
    pub instruments: Arc<load_generator::Instruments>,

    /// Flag checked by every load-generator worker on each iteration.
    pub load_running: Arc<AtomicBool>,

    /// Handle to the spawned load-generator task so we can await clean shutdown.
    pub load_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Resident set size in KiB, from the `VmRSS` line of `/proc/self/status`.
fn resident_kib() -> Result<i64, GaugeError> {
    let status = std::fs::read_to_string("/proc/self/status")?;
    parse_vm_rss(&status)
}

fn parse_vm_rss(status: &str) -> Result<i64, GaugeError> {
    let line = status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .ok_or("status has no VmRSS line")?;
    let kib = line
        .split_whitespace()
        .next()
        .ok_or("VmRSS has no value")?
        .parse::<i64>()?;
    Ok(kib)
}

fn register_process_gauges(registry: &MetricRegistry) -> pulse_metrics::Result<()> {
    let started = Instant::now();
    registry.register_gauge_double(
        GaugeDouble::new("process.uptime_secs", move || {
            Ok(started.elapsed().as_secs_f64())
        })
        .report_changes_only(false),
    )?;
    registry.register_gauge_long(GaugeLong::new("process.rss_kb", resident_kib))?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "cannot listen for ctrl-c");
    }
}

#[tokio::main]
async fn main() {
    logging::init();

    // ── 1. Load configuration ────────────────────────────────────
    let config = match MetricsConfig::load() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            std::process::exit(1);
        }
    };
    tracing::info!(?config, "configuration loaded");

    // ── 2. Registry and instruments ──────────────────────────────
    let registry = Arc::new(MetricRegistry::new(config.clone()));
    let instruments = match register_process_gauges(&registry)
        .and_then(|()| load_generator::Instruments::register(&registry))
    {
        Ok(instruments) => Arc::new(instruments),
        Err(err) => {
            tracing::error!(error = %err, "cannot register metrics");
            std::process::exit(1);
        }
    };

    // ── 3. Background reporter ───────────────────────────────────
    let store = Arc::new(ReportStore::new(config.timing_buffer));
    let writers: Vec<Arc<dyn ReportWriter>> = vec![Arc::new(LogWriter::new(config.decimal_places))];
    let reporter = Reporter::spawn(Arc::clone(&registry), Arc::clone(&store), writers);

    // ── 4. Build shared state and router ─────────────────────────
    let state = Arc::new(AppState {
        registry,
        store,
        instruments,
        load_running: Arc::new(AtomicBool::new(false)),
        load_handle: tokio::sync::Mutex::new(None),
    });
    let app = server::create_router(state);

    // ── 5. Bind & serve ──────────────────────────────────────────
    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(addr = %config.listen_addr, error = %err, "cannot bind");
            std::process::exit(1);
        }
    };
    tracing::info!(addr = %config.listen_addr, "pulse observatory listening");

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %err, "server exited with error");
    }

    reporter.shutdown().await;
}
