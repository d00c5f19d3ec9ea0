use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PrismError, Result};

pub fn parse_time_or_relative(input: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Ok(ts.with_timezone(&Utc));
    }

    if let Ok(duration) = humantime::parse_duration(input) {
        return Ok(Utc::now()
            - chrono::Duration::from_std(duration).map_err(|e| {
                PrismError::Parse(format!("failed to parse duration to chrono: {e}"))
            })?);
    }

    Err(PrismError::Parse(format!(
        "expected RFC3339 time or duration, got {input}"
    )))
}

pub fn parse_duration_str(input: &str) -> Result<Duration> {
    humantime::parse_duration(input)
        .map_err(|e| PrismError::Parse(format!("invalid duration {input}: {e}")))
}

/// Unit a trace's raw timestamps are expressed in. Only used when
/// presenting numbers; normalization works on raw values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnit {
    #[default]
    Micros,
    Millis,
}

impl TimeUnit {
    pub fn to_millis(self, value: i64) -> f64 {
        match self {
            Self::Micros => value as f64 / 1000.0,
            Self::Millis => value as f64,
        }
    }

    pub fn format(self, value: i64) -> String {
        let ms = self.to_millis(value);
        if ms >= 1000.0 {
            format!("{:.2}s", ms / 1000.0)
        } else if ms.fract() == 0.0 {
            format!("{ms:.0}ms")
        } else {
            format!("{ms:.2}ms")
        }
    }
}

impl FromStr for TimeUnit {
    type Err = PrismError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "us" | "micros" | "microseconds" => Ok(Self::Micros),
            "ms" | "millis" | "milliseconds" => Ok(Self::Millis),
            _ => Err(PrismError::Parse(format!("unknown time unit: {s}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339() {
        let ts = parse_time_or_relative("2026-01-01T00:00:00Z").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-01-01T00:00:00+00:00");
    }

    #[test]
    fn parses_duration() {
        let now = Utc::now();
        let ts = parse_time_or_relative("5m").unwrap();
        assert!(ts < now);
    }

    #[test]
    fn rejects_invalid() {
        assert!(parse_time_or_relative("nope").is_err());
    }

    #[test]
    fn formats_units() {
        assert_eq!(TimeUnit::Micros.format(1500), "1.50ms");
        assert_eq!(TimeUnit::Micros.format(2_000_000), "2.00s");
        assert_eq!(TimeUnit::Millis.format(250), "250ms");
        assert_eq!(TimeUnit::from_str("US").unwrap(), TimeUnit::Micros);
        assert!(TimeUnit::from_str("weeks").is_err());
    }
}
