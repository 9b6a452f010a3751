//! Local persistence and maintenance for mqttlogger measurements.
//!
//! This crate provides the SQLite store that ingestion writes into and the
//! maintenance jobs that keep it small and reportable.
//!
//! # Features
//!
//! - Raw tables for energy meter, smart plug and solar readings
//! - Day/week/month/year rollups with cost, exposed through dashboard views
//! - Retention-driven compaction of old rows into hourly means
//! - Single-file backups of the WAL database and restore from them
//!
//! # Example
//!
//! ```no_run
//! use mqttlogger_store::Store;
//! use mqttlogger_types::Granularity;
//!
//! let store = Store::open_default()?;
//!
//! let report = store.rollup_all(0.32);
//! assert!(report.is_success());
//! for summary in store.summaries(Granularity::Month)? {
//!     println!("{}: {:.1} kWh", summary.period, summary.consumption);
//! }
//! # Ok::<(), mqttlogger_store::Error>(())
//! ```

mod backup;
mod compaction;
mod error;
mod models;
mod queries;
mod rollup;
mod schema;
mod store;

pub use backup::{BackupReport, RestoreReport, restore, sidecar_path};
pub use compaction::{CheckpointStats, CompactionReport, TableCompaction, horizon, hour_floor};
pub use error::{Error, Result};
pub use models::{
    PeriodSummary, StoredEnergyReading, StoredPlugReading, StoredSolarReading, TableStats,
};
pub use queries::RawQuery;
pub use rollup::RollupReport;
pub use schema::{RAW_TABLES, SCHEMA_VERSION, SUMMARY_TABLES};
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/mqttlogger/mqttlogger.db`
/// - macOS: `~/Library/Application Support/mqttlogger/mqttlogger.db`
/// - Windows: `C:\Users\<user>\AppData\Local\mqttlogger\mqttlogger.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("mqttlogger")
        .join("mqttlogger.db")
}
