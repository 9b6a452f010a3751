//! MQTT ingestion and scheduled maintenance for an energy-monitoring database.
//!
//! This crate provides a service that:
//! - Subscribes to energy meter, smart plug and solar gateway topics
//! - Stores every reading in the local SQLite database
//! - Recomputes the day/week/month/year summaries on an interval
//! - Downsamples old raw rows to hourly means once a day
//! - Runs either job immediately on SIGUSR1 (compaction) or SIGUSR2 (rollup)
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/mqttlogger/config.toml`:
//!
//! ```toml
//! [broker]
//! host = "mqtt://localhost:1883"
//!
//! [database]
//! path = "~/.local/share/mqttlogger/mqttlogger.db"
//!
//! [features]
//! tasmota_power = true
//!
//! [cost]
//! per_kwh = 0.32
//!
//! [maintenance]
//! rollup_interval_secs = 600
//! compaction_time = "03:00"
//! retention_days = 30
//!
//! [time]
//! timezone = "Europe/Berlin"
//! ```
//!
//! See [`config`] for every option.

pub mod config;
pub mod ingest;
pub mod jobs;
pub mod scheduler;
pub mod state;
pub mod zone;

pub use config::{
    BrokerConfig, Config, ConfigError, CostConfig, DatabaseConfig, FeatureFlags,
    MaintenanceConfig, TimeConfig, TopicsConfig, ValidationError,
};
pub use ingest::{Ingested, IngestError, Ingestor, SensorKind, Subscriptions};
pub use jobs::{JobKind, JobOutcome, JobReport, JobStats, MaintenanceJobs, Trigger, run_job};
pub use scheduler::{Schedule, Scheduler, listen_for_triggers};
pub use state::{AppState, ShutdownState};
pub use zone::Zone;
