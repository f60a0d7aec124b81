use thiserror::Error;

/// Errors raised while configuring or querying metrics.
///
/// Every variant is a configuration or argument error: the hot-path
/// recording operations never fail.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("bucket boundaries must not be empty")]
    EmptyBuckets,

    #[error("bucket boundaries must be strictly ascending: {previous} then {bound} at index {index}")]
    UnsortedBuckets {
        index: usize,
        previous: i64,
        bound: i64,
    },

    #[error("bucket boundary {0} must be greater than zero")]
    NonPositiveBucket(i64),

    #[error("quantile {0} is not in [0, 1]")]
    InvalidQuantile(f64),

    #[error("decimal places {0} out of range (0..=9)")]
    InvalidDecimalPlaces(u32),

    #[error("reservoir capacity must be at least 1")]
    InvalidCapacity,

    #[error("reservoir alpha {0} must be positive and small enough to keep weights finite for an hour")]
    InvalidAlpha(f64),

    #[error("metric '{name}' is already registered as a {existing}, not a {requested}")]
    KindMismatch {
        name: String,
        existing: &'static str,
        requested: &'static str,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot read configuration file: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("cannot parse configuration file: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MetricsError>;
