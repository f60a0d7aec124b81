use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;

use pulse_metrics::Timer;

use crate::AppState;

/// Times every request into a `web.api.<method>` timer and adds two
/// response headers:
///
///   X-Response-Time-Us: total handler wall time in microseconds
///   Server-Timing: same value in the standard Server-Timing format
///
/// 5xx responses are recorded as errors.
pub async fn timing_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed = start.elapsed();
    let us = elapsed.as_micros();

    // ── Record into the registry ────────────────────────────────
    let status = response.status();
    let timer_name = format!("web.api.{}", method.as_str().to_lowercase());
    match state.registry.timer(timer_name) {
        Ok(timer) => timer.add_event_duration(
            !status.is_server_error(),
            i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX),
        ),
        Err(err) => tracing::warn!(error = %err, "request timer unavailable"),
    }

    // ── Inject response headers ─────────────────────────────────
    if let Ok(val) = us.to_string().parse() {
        response.headers_mut().insert("X-Response-Time-Us", val);
    }

    let server_timing = format!("total;dur={:.3}", elapsed.as_secs_f64() * 1000.0);
    if let Ok(val) = server_timing.parse() {
        response.headers_mut().insert("Server-Timing", val);
    }

    // Skip the noisy SSE stream
    if !path.contains("/stream") {
        tracing::debug!(status = status.as_u16(), %method, path, us, "request");
    }

    response
}
