pub mod benchmark;
pub mod metrics;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use pulse_metrics::MetricsError;

// ─── Unified error type ──────────────────────────────────────────

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Metrics(MetricsError),
    AlreadyRunning,
}

impl From<MetricsError> for AppError {
    fn from(err: MetricsError) -> Self {
        Self::Metrics(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Metrics(err) => {
                tracing::error!(error = %err, "metrics error");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            Self::AlreadyRunning => {
                (StatusCode::CONFLICT, "Benchmark already running".into())
            }
        };

        let body = serde_json::json!({
            "error":  message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}
