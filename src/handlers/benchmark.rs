use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::AppState;

use super::AppError;

// ─── Request / response types ────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct BenchmarkConfig {
    /// Number of worker threads placing orders
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// How long the benchmark runs (seconds)
    #[serde(default = "default_duration")]
    pub duration_secs: u64,

    /// Percentage of payments that are declined (0–100)
    #[serde(default = "default_error_pct")]
    pub error_pct: u8,
}

fn default_concurrency() -> u32 {
    10
}
fn default_duration() -> u64 {
    30
}
fn default_error_pct() -> u8 {
    5
}

impl BenchmarkConfig {
    fn validate(&self) -> Result<(), AppError> {
        if self.concurrency == 0 || self.concurrency > 500 {
            return Err(AppError::BadRequest(
                "concurrency must be between 1 and 500".into(),
            ));
        }
        if self.duration_secs == 0 || self.duration_secs > 300 {
            return Err(AppError::BadRequest(
                "duration_secs must be between 1 and 300".into(),
            ));
        }
        if self.error_pct > 100 {
            return Err(AppError::BadRequest(
                "error_pct must be between 0 and 100".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct BenchmarkStatus {
    pub running: bool,
    pub message: String,
}

// ─── POST /api/benchmark/start ───────────────────────────────────

pub async fn start_benchmark(
    State(state): State<Arc<AppState>>,
    Json(config): Json<BenchmarkConfig>,
) -> Result<Json<BenchmarkStatus>, AppError> {
    // Guard: only one benchmark at a time
    if state.load_running.load(Ordering::SeqCst) {
        return Err(AppError::AlreadyRunning);
    }
    config.validate()?;

    // Drop reports from the previous run; the metrics themselves reset on
    // every collection pass.
    state.store.clear();

    // Flip the flag BEFORE spawning so workers see it immediately
    state.load_running.store(true, Ordering::SeqCst);

    let msg = format!(
        "Started: {} workers × {}s, {}% declined payments",
        config.concurrency, config.duration_secs, config.error_pct,
    );
    tracing::info!(?config, "benchmark started");

    let handle = tokio::spawn(crate::load_generator::run(
        state.load_running.clone(),
        state.instruments.clone(),
        config.concurrency,
        config.duration_secs,
        config.error_pct,
    ));

    // Stash the handle so `stop` can await clean shutdown
    *state.load_handle.lock().await = Some(handle);

    Ok(Json(BenchmarkStatus {
        running: true,
        message: msg,
    }))
}

// ─── POST /api/benchmark/stop ────────────────────────────────────

pub async fn stop_benchmark(State(state): State<Arc<AppState>>) -> Json<BenchmarkStatus> {
    if !state.load_running.load(Ordering::SeqCst) {
        return Json(BenchmarkStatus {
            running: false,
            message: "No benchmark is running".into(),
        });
    }

    // Signal all workers to stop
    state.load_running.store(false, Ordering::SeqCst);

    let mut guard = state.load_handle.lock().await;
    if let Some(handle) = guard.take() {
        // The task may have already finished
        let _ = handle.await;
    }

    Json(BenchmarkStatus {
        running: false,
        message: "Benchmark stopped".into(),
    })
}

// ─── GET /api/benchmark/status ───────────────────────────────────

pub async fn benchmark_status(State(state): State<Arc<AppState>>) -> Json<BenchmarkStatus> {
    let running = state.load_running.load(Ordering::SeqCst);
    Json(BenchmarkStatus {
        running,
        message: if running {
            "Benchmark in progress".into()
        } else {
            "Idle".into()
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(json: &str) -> BenchmarkConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let c = config("{}");
        assert_eq!(c.concurrency, 10);
        assert_eq!(c.duration_secs, 30);
        assert_eq!(c.error_pct, 5);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_inputs() {
        assert!(config(r#"{"concurrency":0}"#).validate().is_err());
        assert!(config(r#"{"duration_secs":301}"#).validate().is_err());
        assert!(config(r#"{"error_pct":101}"#).validate().is_err());
    }
}
