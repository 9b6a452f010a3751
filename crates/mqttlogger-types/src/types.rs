//! Core types for stored measurements and rollup periods.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

use crate::error::ParseError;

/// Calendar period used to bucket readings for rollups.
///
/// All periods are evaluated in UTC. Weeks follow ISO-8601: they start on
/// Monday and belong to the ISO week-numbering year, so the first days of
/// January may fall into week 52/53 of the previous year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Calendar day, keyed `YYYY-MM-DD`.
    Day,
    /// ISO week, keyed `YYYY-Www`.
    Week,
    /// Calendar month, keyed `YYYY-MM`.
    Month,
    /// Calendar year, keyed `YYYY`.
    Year,
}

impl Granularity {
    /// All granularities in the order a rollup pass processes them.
    pub const ALL: [Granularity; 4] = [
        Granularity::Day,
        Granularity::Week,
        Granularity::Month,
        Granularity::Year,
    ];

    /// Lowercase name used in configuration and on the command line.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
            Granularity::Year => "year",
        }
    }

    /// Whether summaries of this granularity carry a cost figure.
    #[must_use]
    pub fn has_cost(&self) -> bool {
        matches!(self, Granularity::Month | Granularity::Year)
    }

    /// Compute the period key for an instant, in UTC.
    ///
    /// # Examples
    ///
    /// ```
    /// use mqttlogger_types::Granularity;
    /// use time::macros::datetime;
    ///
    /// let at = datetime!(2025-12-29 10:00 UTC);
    /// assert_eq!(Granularity::Day.period_key(at), "2025-12-29");
    /// assert_eq!(Granularity::Week.period_key(at), "2026-W01");
    /// assert_eq!(Granularity::Month.period_key(at), "2025-12");
    /// assert_eq!(Granularity::Year.period_key(at), "2025");
    /// ```
    #[must_use]
    pub fn period_key(&self, at: OffsetDateTime) -> String {
        let at = at.to_offset(UtcOffset::UTC);
        match self {
            Granularity::Day => format!(
                "{:04}-{:02}-{:02}",
                at.year(),
                u8::from(at.month()),
                at.day()
            ),
            Granularity::Week => {
                let (year, week, _) = at.to_iso_week_date();
                format!("{:04}-W{:02}", year, week)
            }
            Granularity::Month => format!("{:04}-{:02}", at.year(), u8::from(at.month())),
            Granularity::Year => format!("{:04}", at.year()),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "daily" => Ok(Granularity::Day),
            "week" | "weekly" => Ok(Granularity::Week),
            "month" | "monthly" => Ok(Granularity::Month),
            "year" | "yearly" => Ok(Granularity::Year),
            _ => Err(ParseError::UnknownGranularity(s.to_string())),
        }
    }
}

/// The instant a measurement was taken, in both stored representations.
///
/// Raw tables persist every timestamp twice: as epoch seconds for bucketing
/// and as an offset-aware RFC 3339 string for humans and dashboards. Both are
/// derived here from one `OffsetDateTime`, so they cannot drift apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementTime {
    unix: i64,
    rfc3339: String,
}

impl MeasurementTime {
    /// Build from an offset-aware instant. The offset is kept in the string form.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidTimestamp`] when the instant cannot be
    /// rendered as RFC 3339 (years outside 0000-9999, sub-minute offsets).
    pub fn new(at: OffsetDateTime) -> Result<Self, ParseError> {
        let rfc3339 = at
            .format(&Rfc3339)
            .map_err(|e| ParseError::InvalidTimestamp(e.to_string()))?;
        Ok(Self {
            unix: at.unix_timestamp(),
            rfc3339,
        })
    }

    /// Build from epoch seconds, rendered in UTC.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidTimestamp`] if `secs` is out of range.
    pub fn from_unix(secs: i64) -> Result<Self, ParseError> {
        let at = OffsetDateTime::from_unix_timestamp(secs)
            .map_err(|e| ParseError::InvalidTimestamp(e.to_string()))?;
        Self::new(at)
    }

    /// The current instant in UTC.
    #[must_use]
    pub fn now_utc() -> Self {
        let now = OffsetDateTime::now_utc();
        let now = now.replace_nanosecond(0).unwrap_or(now);
        let unix = now.unix_timestamp();
        let rfc3339 = now.format(&Rfc3339).unwrap_or_else(|_| unix.to_string());
        Self { unix, rfc3339 }
    }

    /// Epoch seconds.
    #[must_use]
    pub fn unix(&self) -> i64 {
        self.unix
    }

    /// RFC 3339 representation with the original offset.
    #[must_use]
    pub fn rfc3339(&self) -> &str {
        &self.rfc3339
    }

    /// Placeholder timestamps (epoch 0 or earlier) are never bucketed.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.unix <= 0
    }
}

/// Energy meter reading (Wattwächter / E320 smart meter).
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyReading {
    /// When the meter took the reading.
    pub time: MeasurementTime,
    /// Imported energy counter in kWh.
    pub e_in: f64,
    /// Exported energy counter in kWh.
    pub e_out: f64,
    /// Instantaneous power in W.
    pub power: i64,
}

/// Smart plug power reading (Tasmota).
#[derive(Debug, Clone, PartialEq)]
pub struct PlugReading {
    /// Device identifier taken from the topic.
    pub device_id: String,
    /// When the plug took the reading.
    pub time: MeasurementTime,
    /// Instantaneous power in W.
    pub power: i64,
}

/// Numeric value published by a solar inverter gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct SolarReading {
    /// Inverter serial, `ac`, `dc` or `summary`.
    pub device_id: String,
    /// Inverter channel, `-1` for inverter-wide values.
    pub channel: i64,
    /// Metric path below the channel, e.g. `power` or `yieldday`.
    pub metric: String,
    /// When the value was received.
    pub time: MeasurementTime,
    /// The measured value.
    pub value: f64,
}

/// Non-numeric solar attribute (name, firmware, status text).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolarMeta {
    /// Inverter serial, `ac`, `dc` or `summary`.
    pub device_id: String,
    /// Inverter channel, `-1` for inverter-wide values.
    pub channel: i64,
    /// Attribute name.
    pub key: String,
    /// Attribute value as published.
    pub value: String,
}
