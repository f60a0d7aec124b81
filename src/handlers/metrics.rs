use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;

use pulse_metrics::stats::clock::wall_time;
use pulse_metrics::{Report, RequestTiming};

use super::AppError;
use crate::AppState;

/// Latest published report, or a non-resetting peek before the first
/// collection pass.
fn current_report(state: &AppState) -> Report {
    match state.store.latest() {
        Some(report) => Report::clone(&report),
        None => Report {
            collected_at: wall_time(state.registry.clock().as_ref()),
            stats: state.registry.collect(false),
            timings: Vec::new(),
        },
    }
}

// ─── GET /api/metrics ────────────────────────────────────────────

pub async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<Report> {
    Json(current_report(&state))
}

// ─── GET /api/metrics/stream ─────────────────────────────────────
/// Server-Sent Events endpoint.
/// Pushes the current report as JSON every 500 ms.

pub async fn metrics_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let interval = tokio::time::interval(Duration::from_millis(500));

    let stream = IntervalStream::new(interval).map(move |_| {
        let json = serde_json::to_string(&current_report(&state)).unwrap_or_default();
        Ok(Event::default().data(json))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

// ─── GET /api/timings ────────────────────────────────────────────

pub async fn get_timings(State(state): State<Arc<AppState>>) -> Json<Vec<RequestTiming>> {
    Json(state.store.recent_timings())
}

// ─── POST /api/timings/collect ───────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CollectRequest {
    /// Timer name or `*` pattern
    pub pattern: String,

    /// Requests to capture per matching timer; 0 cancels
    #[serde(default = "default_count")]
    pub count: i64,
}

fn default_count() -> i64 {
    1
}

#[derive(Debug, Serialize)]
pub struct CollectResponse {
    pub updated: Vec<String>,
    pub active: Vec<ActiveCollection>,
}

#[derive(Debug, Serialize)]
pub struct ActiveCollection {
    pub metric: String,
    pub remaining: i64,
}

pub async fn set_collection(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CollectRequest>,
) -> Result<Json<CollectResponse>, AppError> {
    if req.count < 0 {
        return Err(AppError::BadRequest("count must not be negative".into()));
    }
    if req.pattern.is_empty() {
        return Err(AppError::BadRequest("pattern must not be empty".into()));
    }

    let updated = state
        .registry
        .set_request_timing_collection(&req.pattern, req.count);
    let active = state
        .registry
        .request_timing_collection_active()
        .into_iter()
        .map(|(metric, remaining)| ActiveCollection { metric, remaining })
        .collect();

    Ok(Json(CollectResponse { updated, active }))
}
