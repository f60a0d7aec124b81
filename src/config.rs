use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MetricsError, Result};
use crate::format::MAX_DECIMAL_PLACES;
use crate::stats::reservoir::{validate_alpha, DEFAULT_ALPHA, DEFAULT_CAPACITY};

/// Environment variable naming an optional JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "PULSE_CONFIG";

// ─── Configuration ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Cadence at which every moving average is ticked
    pub tick_interval_secs: u64,

    /// Cadence of the collect-and-reset pass
    pub collect_interval_secs: u64,

    /// Samples kept per reservoir
    pub reservoir_capacity: usize,

    /// Recency bias of decaying reservoirs
    pub reservoir_alpha: f64,

    /// Completed request timings retained between drains
    pub timing_buffer: usize,

    /// Decimal places used by the text writer
    pub decimal_places: u32,

    /// Address the observatory binds to
    pub listen_addr: String,
}

fn default_tick_interval() -> u64 {
    5
}
fn default_collect_interval() -> u64 {
    10
}
fn default_timing_buffer() -> usize {
    200
}
fn default_decimal_places() -> u32 {
    2
}
fn default_listen_addr() -> String {
    "0.0.0.0:3000".into()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            collect_interval_secs: default_collect_interval(),
            reservoir_capacity: DEFAULT_CAPACITY,
            reservoir_alpha: DEFAULT_ALPHA,
            timing_buffer: default_timing_buffer(),
            decimal_places: default_decimal_places(),
            listen_addr: default_listen_addr(),
        }
    }
}

impl MetricsConfig {
    /// Defaults, overlaid by the file named in `PULSE_CONFIG` (if set),
    /// overlaid by `PULSE_*` variables, then validated.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Apply `PULSE_*` overrides looked up through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PULSE_TICK_INTERVAL_SECS") {
            self.tick_interval_secs = parse_env("PULSE_TICK_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("PULSE_COLLECT_INTERVAL_SECS") {
            self.collect_interval_secs = parse_env("PULSE_COLLECT_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("PULSE_RESERVOIR_CAPACITY") {
            self.reservoir_capacity = parse_env("PULSE_RESERVOIR_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("PULSE_RESERVOIR_ALPHA") {
            self.reservoir_alpha = parse_env("PULSE_RESERVOIR_ALPHA", &v)?;
        }
        if let Some(v) = lookup("PULSE_TIMING_BUFFER") {
            self.timing_buffer = parse_env("PULSE_TIMING_BUFFER", &v)?;
        }
        if let Some(v) = lookup("PULSE_DECIMAL_PLACES") {
            self.decimal_places = parse_env("PULSE_DECIMAL_PLACES", &v)?;
        }
        if let Some(v) = lookup("PULSE_LISTEN_ADDR") {
            self.listen_addr = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_secs == 0 {
            return Err(MetricsError::Config("tick_interval_secs must be at least 1".into()));
        }
        if self.collect_interval_secs == 0 {
            return Err(MetricsError::Config(
                "collect_interval_secs must be at least 1".into(),
            ));
        }
        if self.reservoir_capacity == 0 {
            return Err(MetricsError::InvalidCapacity);
        }
        validate_alpha(self.reservoir_alpha)?;
        if self.timing_buffer == 0 {
            return Err(MetricsError::Config("timing_buffer must be at least 1".into()));
        }
        if self.decimal_places > MAX_DECIMAL_PLACES {
            return Err(MetricsError::InvalidDecimalPlaces(self.decimal_places));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn collect_interval(&self) -> Duration {
        Duration::from_secs(self.collect_interval_secs)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| MetricsError::Config(format!("{key}={value:?} is not valid")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = MetricsConfig::default();
        config.validate().unwrap();
        assert_eq!(config.reservoir_capacity, 1028);
        assert_eq!(config.tick_interval(), Duration::from_secs(5));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = MetricsConfig::from_json(r#"{"collect_interval_secs": 60}"#).unwrap();
        assert_eq!(config.collect_interval_secs, 60);
        assert_eq!(config.tick_interval_secs, 5);
        assert_eq!(config.listen_addr, "0.0.0.0:3000");
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            MetricsConfig::from_json("{not json"),
            Err(MetricsError::ConfigParse(_))
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("PULSE_TICK_INTERVAL_SECS", "10"),
            ("PULSE_LISTEN_ADDR", "127.0.0.1:9000"),
        ]
        .into_iter()
        .collect();

        let mut config = MetricsConfig::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.tick_interval_secs, 10);
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
    }

    #[test]
    fn bad_env_value_fails_fast() {
        let mut config = MetricsConfig::default();
        let err = config
            .apply_env(|key| (key == "PULSE_RESERVOIR_CAPACITY").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, MetricsError::Config(_)));
    }

    #[test]
    fn validation_rejects_out_of_range() {
        let config = MetricsConfig {
            decimal_places: 12,
            ..MetricsConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(MetricsError::InvalidDecimalPlaces(12))
        ));

        let config = MetricsConfig {
            tick_interval_secs: 0,
            ..MetricsConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn alpha_large_enough_to_overflow_is_rejected() {
        let config = MetricsConfig {
            reservoir_alpha: 0.5,
            ..MetricsConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(MetricsError::InvalidAlpha(a)) if a == 0.5
        ));
    }
}
