//! Data models for stored data.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use mqttlogger_types::Granularity;

/// An energy meter row as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEnergyReading {
    /// Database row ID.
    pub id: i64,
    /// Measurement instant.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Human-readable form as written by ingestion or compaction.
    pub timestamp_rfc3339: String,
    /// Imported energy counter in kWh.
    pub e_in: Option<f64>,
    /// Exported energy counter in kWh.
    pub e_out: Option<f64>,
    /// Power in W (hourly mean once compacted).
    pub power: Option<f64>,
}

/// A smart plug row as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPlugReading {
    pub id: i64,
    pub device_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub timestamp_rfc3339: String,
    pub power: Option<f64>,
}

/// A solar row as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSolarReading {
    pub id: i64,
    pub device_id: Option<String>,
    pub channel: Option<i64>,
    pub metric: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub timestamp_rfc3339: String,
    pub value: Option<f64>,
}

/// One rollup row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodSummary {
    /// Granularity the row belongs to.
    pub granularity: Granularity,
    /// Period key (`2025-11-01`, `2025-W44`, `2025-11`, `2025`).
    pub period: String,
    /// Energy consumed in the period, kWh.
    pub consumption: f64,
    /// Cost of the consumption; only months and years carry one.
    pub cost: Option<f64>,
}

/// Row count of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    pub table: String,
    pub rows: u64,
}
