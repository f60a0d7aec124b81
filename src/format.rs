//! Plain-text rendering of statistics and request timings.

use std::fmt::Write;

use crate::error::{MetricsError, Result};
use crate::stat::Stat;
use crate::stats::Percentiles;
use crate::timing::RequestTiming;

pub const MAX_DECIMAL_PLACES: u32 = 9;

/// Round `value` half away from zero to `places` decimal places.
pub fn round_to(value: f64, places: u32) -> Result<f64> {
    if places > MAX_DECIMAL_PLACES {
        return Err(MetricsError::InvalidDecimalPlaces(places));
    }
    let factor = 10f64.powi(places as i32);
    Ok((value * factor).round() / factor)
}

/// One line per statistic, e.g.
/// `web.api;bucket=0-100 count=3 total=42000 max=16000 mean=14000`.
pub fn stat_line(stat: &Stat, places: u32) -> Result<String> {
    let mut line = stat.qualified_name();
    match stat {
        Stat::Counter(s) => {
            let _ = write!(line, " count={}", s.stats.count);
        }
        Stat::Value(s) => {
            let v = &s.stats;
            let _ = write!(
                line,
                " count={} total={} max={} mean={}",
                v.count, v.total, v.max, v.mean
            );
            if let Some(p) = &s.percentiles {
                write_percentiles(&mut line, p, places)?;
            }
        }
        Stat::Timed(s) => {
            let v = &s.stats;
            let _ = write!(
                line,
                " count={} total={} max={} mean={}",
                v.count, v.total, v.max, v.mean
            );
            if let Some(p) = &s.percentiles {
                write_percentiles(&mut line, p, places)?;
            }
        }
        Stat::Meter(s) => {
            let _ = write!(
                line,
                " count={} s10={} m1={} m5={} m15={}",
                s.count,
                round_to(s.rates.s10, places)?,
                round_to(s.rates.m1, places)?,
                round_to(s.rates.m5, places)?,
                round_to(s.rates.m15, places)?,
            );
        }
        Stat::GaugeLong(s) => {
            let _ = write!(line, " value={}", s.value);
        }
        Stat::GaugeDouble(s) => {
            let _ = write!(line, " value={}", round_to(s.value, places)?);
        }
    }
    Ok(line)
}

fn write_percentiles(line: &mut String, p: &Percentiles, places: u32) -> Result<()> {
    let _ = write!(
        line,
        " p50={} p75={} p95={} p99={} p999={}",
        round_to(p.median, places)?,
        round_to(p.p75, places)?,
        round_to(p.p95, places)?,
        round_to(p.p99, places)?,
        round_to(p.p999, places)?,
    );
    Ok(())
}

/// One row per entry:
/// `d:<depth> p:<percent of total> ms:<millis> us:<micros> m:<name>`,
/// followed by any attributes as `key=value`.
pub fn timing_rows(timing: &RequestTiming) -> Vec<String> {
    let total = timing.total_nanos().max(1);
    timing
        .entries
        .iter()
        .map(|entry| {
            let nanos = entry.duration_nanos();
            let percent = nanos.saturating_mul(100) / total;
            let mut row = format!(
                "d:{:<2} p:{:<3} ms:{:<7} us:{:<10} m:{}",
                entry.depth,
                percent,
                nanos / 1_000_000,
                nanos / 1_000,
                entry.metric_name
            );
            for (key, value) in &entry.attributes {
                let _ = write!(row, " {key}={value}");
            }
            row
        })
        .collect()
}
