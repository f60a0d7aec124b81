//! # pulse-metrics
//!
//! In-process metrics instrumentation. Application threads record counts,
//! values and timed-event durations on wait-free primitives; a single
//! background [`reporter::Reporter`] periodically ticks moving averages
//! and runs a collect-and-reset pass over the [`registry::MetricRegistry`],
//! producing immutable [`stat::Stat`] values for writers.
//!
//! ```no_run
//! use pulse_metrics::{MetricRegistry, MetricsConfig, Timer};
//!
//! let registry = MetricRegistry::new(MetricsConfig::default());
//! let timer = registry.bucketed_timer("web.api", &[100, 200, 300])?;
//!
//! let event = timer.start_event();
//! // ... handle the request ...
//! event.end();
//!
//! for stat in registry.collect(true) {
//!     println!("{}", stat.qualified_name());
//! }
//! # Ok::<(), pulse_metrics::MetricsError>(())
//! ```
//!
//! Sampled requests can be captured as call trees: see [`timing`].

pub mod config;
pub mod error;
pub mod format;
pub mod gauge;
pub mod logging;
pub mod metric;
pub mod registry;
pub mod reporter;
pub mod stat;
pub mod stats;
pub mod timer;
pub mod timing;

pub use config::MetricsConfig;
pub use error::{MetricsError, Result};
pub use gauge::{Gauge, GaugeDouble, GaugeError, GaugeLong};
pub use metric::{Counter, Meter, ValueMetric};
pub use registry::{Metric, MetricRegistry};
pub use reporter::{LogWriter, Report, ReportStore, ReportWriter, Reporter};
pub use stat::Stat;
pub use timer::{BucketedTimer, TimedEvent, TimedMetric, Timer};
pub use timing::{RequestTiming, RequestTimingSink, TimingEntry};
