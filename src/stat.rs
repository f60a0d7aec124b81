//! The closed set of statistic shapes a collection pass can produce.

use serde::Serialize;

use crate::stats::{CounterStats, Percentiles, RateStats, ValueStats};

/// Suffix appended to a timer's name for its error statistics.
pub const ERROR_SUFFIX: &str = ".error";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Stat {
    Counter(CounterStat),
    Value(ValueStat),
    Timed(TimedStat),
    Meter(MeterStat),
    GaugeLong(GaugeLongStat),
    GaugeDouble(GaugeDoubleStat),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterStat {
    pub name: String,
    #[serde(flatten)]
    pub stats: CounterStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueStat {
    pub name: String,
    #[serde(flatten)]
    pub stats: ValueStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentiles: Option<Percentiles>,
}

/// Durations of a timer, in microseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimedStat {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    pub error: bool,
    #[serde(flatten)]
    pub stats: ValueStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentiles: Option<Percentiles>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterStat {
    pub name: String,
    pub count: u64,
    pub rates: RateStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GaugeLongStat {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GaugeDoubleStat {
    pub name: String,
    pub value: f64,
}

impl Stat {
    pub fn name(&self) -> &str {
        match self {
            Stat::Counter(s) => &s.name,
            Stat::Value(s) => &s.name,
            Stat::Timed(s) => &s.name,
            Stat::Meter(s) => &s.name,
            Stat::GaugeLong(s) => &s.name,
            Stat::GaugeDouble(s) => &s.name,
        }
    }

    /// Name as written by reporters: bucketed timer stats carry their
    /// range as `name;bucket=<label>`.
    pub fn qualified_name(&self) -> String {
        match self {
            Stat::Timed(TimedStat {
                name,
                bucket: Some(label),
                ..
            }) => format!("{name};bucket={label}"),
            other => other.name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timed(bucket: Option<&str>) -> Stat {
        Stat::Timed(TimedStat {
            name: "web.api".into(),
            bucket: bucket.map(str::to_string),
            error: false,
            stats: ValueStats::new(1, 10, 10, 0, 0),
            percentiles: None,
        })
    }

    #[test]
    fn bucket_label_is_part_of_qualified_name() {
        assert_eq!(timed(Some("100-200")).qualified_name(), "web.api;bucket=100-200");
        assert_eq!(timed(None).qualified_name(), "web.api");
    }

    #[test]
    fn serializes_with_kind_tag() {
        let stat = Stat::GaugeLong(GaugeLongStat {
            name: "jvm.threads".into(),
            value: 12,
        });
        let json = serde_json::to_value(&stat).unwrap();
        assert_eq!(json["kind"], "gauge_long");
        assert_eq!(json["value"], 12);

        let json = serde_json::to_value(timed(Some("0-100"))).unwrap();
        assert_eq!(json["kind"], "timed");
        assert_eq!(json["bucket"], "0-100");
        assert_eq!(json["count"], 1);
    }
}
