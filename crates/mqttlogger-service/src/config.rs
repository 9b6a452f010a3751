//! Service configuration.
//!
//! ```toml
//! [broker]
//! host = "mqtt://192.168.1.10:1883"
//! username = "logger"
//! password = "secret"
//! client_id = "mqttlogger"
//! qos = 1
//!
//! [database]
//! path = "/var/lib/mqttlogger/mqttlogger.db"
//!
//! [topics]
//! wattwaechter = "tele/wattwaechter/SENSOR"
//! tasmota = "tele/+/SENSOR"
//!
//! [features]
//! tasmota_power = true
//! solar = true
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

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::zone::Zone;

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// MQTT broker connection.
    pub broker: BrokerConfig,
    /// Database location.
    pub database: DatabaseConfig,
    /// Topics to subscribe to.
    pub topics: TopicsConfig,
    /// Optional sensor families.
    pub features: FeatureFlags,
    /// Energy price.
    pub cost: CostConfig,
    /// Rollup and compaction schedules.
    pub maintenance: MaintenanceConfig,
    /// Zone for wall-clock times.
    pub time: TimeConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Write the default configuration to `path`.
    ///
    /// An existing file is only replaced when `force` is set.
    pub fn init<P: AsRef<Path>>(path: P, force: bool) -> Result<(), ConfigError> {
        if path.as_ref().exists() && !force {
            return Err(ConfigError::Exists(path.as_ref().to_path_buf()));
        }
        Self::default().save(path)
    }

    /// Validate the configuration and return all errors at once.
    ///
    /// # Example
    ///
    /// ```
    /// use mqttlogger_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.broker.validate());
        errors.extend(self.database.validate());
        errors.extend(self.topics.validate(&self.features));
        errors.extend(self.cost.validate());
        errors.extend(self.maintenance.validate());
        errors.extend(self.time.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// MQTT broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker URL (`mqtt://host:port` or `mqtts://host:port`).
    pub host: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Client ID presented to the broker.
    pub client_id: String,
    /// Subscription QoS (0, 1 or 2).
    pub qos: u8,
    /// Keep-alive interval in seconds.
    pub keep_alive: u64,
    /// Log every stored message at info level.
    pub debug: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "mqtt://localhost:1883".to_string(),
            username: None,
            password: None,
            client_id: "mqttlogger".to_string(),
            qos: 0,
            keep_alive: 30,
            debug: false,
        }
    }
}

impl BrokerConfig {
    /// Validate broker configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Err(message) = crate::ingest::parse_broker_url(&self.host) {
            errors.push(ValidationError {
                field: "broker.host".to_string(),
                message: format!("invalid broker URL '{}': {}", self.host, message),
            });
        }

        if self.client_id.is_empty() {
            errors.push(ValidationError {
                field: "broker.client_id".to_string(),
                message: "client ID cannot be empty".to_string(),
            });
        }

        if self.qos > 2 {
            errors.push(ValidationError {
                field: "broker.qos".to_string(),
                message: format!("QoS {} is invalid: must be 0, 1 or 2", self.qos),
            });
        }

        if self.password.is_some() && self.username.is_none() {
            errors.push(ValidationError {
                field: "broker.password".to_string(),
                message: "password is set but username is missing".to_string(),
            });
        }

        errors
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: mqttlogger_store::default_db_path(),
        }
    }
}

impl DatabaseConfig {
    /// Validate database configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "database.path".to_string(),
                message: "database path cannot be empty".to_string(),
            });
        }

        errors
    }
}

/// Topic filters for the sensor families.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    /// Energy meter telemetry.
    pub wattwaechter: String,
    /// Smart plug telemetry; the second topic segment names the device.
    pub tasmota: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            wattwaechter: "tele/wattwaechter/SENSOR".to_string(),
            tasmota: "tele/+/SENSOR".to_string(),
        }
    }
}

impl TopicsConfig {
    /// Validate topic filters for the enabled features.
    pub fn validate(&self, features: &FeatureFlags) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        let mut check = |field: &str, filter: &str| {
            if let Err(message) = crate::ingest::validate_filter(filter) {
                errors.push(ValidationError {
                    field: format!("topics.{}", field),
                    message: format!("invalid topic filter '{}': {}", filter, message),
                });
            }
        };

        check("wattwaechter", &self.wattwaechter);
        if features.tasmota_power {
            check("tasmota", &self.tasmota);
        }

        errors
    }
}

/// Optional sensor families.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Subscribe to smart plug telemetry.
    pub tasmota_power: bool,
    /// Subscribe to `solar/#`.
    pub solar: bool,
}

/// Energy price.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    /// Price per kWh, applied to monthly and yearly consumption.
    pub per_kwh: f64,
}

impl CostConfig {
    /// Validate cost configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !self.per_kwh.is_finite() || self.per_kwh < 0.0 {
            errors.push(ValidationError {
                field: "cost.per_kwh".to_string(),
                message: format!("price {} must be a non-negative number", self.per_kwh),
            });
        }

        errors
    }
}

/// Minimum rollup interval in seconds.
pub const MIN_ROLLUP_INTERVAL: u64 = 10;
/// Maximum rollup interval in seconds (1 day).
pub const MAX_ROLLUP_INTERVAL: u64 = 86_400;

/// Maintenance schedules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Seconds between rollup runs.
    pub rollup_interval_secs: u64,
    /// Wall-clock time of the daily compaction, `HH:MM`, in `[time] timezone`.
    pub compaction_time: String,
    /// Days of raw rows kept at full resolution.
    pub retention_days: u32,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            rollup_interval_secs: 600,
            compaction_time: "03:00".to_string(),
            retention_days: 30,
        }
    }
}

impl MaintenanceConfig {
    /// Validate maintenance configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.rollup_interval_secs < MIN_ROLLUP_INTERVAL {
            errors.push(ValidationError {
                field: "maintenance.rollup_interval_secs".to_string(),
                message: format!(
                    "rollup interval {} is too short (minimum {} seconds)",
                    self.rollup_interval_secs, MIN_ROLLUP_INTERVAL
                ),
            });
        } else if self.rollup_interval_secs > MAX_ROLLUP_INTERVAL {
            errors.push(ValidationError {
                field: "maintenance.rollup_interval_secs".to_string(),
                message: format!(
                    "rollup interval {} is too long (maximum {} seconds / 1 day)",
                    self.rollup_interval_secs, MAX_ROLLUP_INTERVAL
                ),
            });
        }

        if let Err(message) = parse_time_of_day(&self.compaction_time) {
            errors.push(ValidationError {
                field: "maintenance.compaction_time".to_string(),
                message,
            });
        }

        if self.retention_days == 0 {
            errors.push(ValidationError {
                field: "maintenance.retention_days".to_string(),
                message: "retention must be at least 1 day".to_string(),
            });
        }

        errors
    }

    /// Rollup interval as a duration.
    pub fn rollup_interval(&self) -> Duration {
        Duration::from_secs(self.rollup_interval_secs)
    }

    /// Retention window as a duration.
    pub fn retention(&self) -> time::Duration {
        time::Duration::days(i64::from(self.retention_days))
    }
}

/// Time zone configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// IANA zone name for device times without an offset and for the
    /// compaction schedule. Unset means the host's local zone.
    pub timezone: Option<String>,
}

impl TimeConfig {
    /// Validate time zone configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(name) = &self.timezone
            && let Err(message) = Zone::parse(name)
        {
            errors.push(ValidationError {
                field: "time.timezone".to_string(),
                message,
            });
        }

        errors
    }

    /// The configured zone.
    ///
    /// An unknown name falls back to the local zone.
    pub fn zone(&self) -> Zone {
        match &self.timezone {
            None => Zone::Local,
            Some(name) => Zone::parse(name).unwrap_or_else(|e| {
                warn!("{}, using the local time zone", e);
                Zone::Local
            }),
        }
    }
}

/// Parse `HH:MM` into hour and minute.
pub fn parse_time_of_day(s: &str) -> Result<(u32, u32), String> {
    let invalid = || format!("invalid time '{}': expected format 'HH:MM'", s);

    let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
    let hour: u32 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;

    if hour > 23 || minute > 59 {
        return Err(format!("time '{}' is out of range (00:00 - 23:59)", s));
    }

    Ok((hour, minute))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Config file {0} already exists, use --force to overwrite")]
    Exists(PathBuf),
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `broker.host` or `maintenance.compaction_time`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mqttlogger")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.broker.host, "mqtt://localhost:1883");
        assert_eq!(config.broker.qos, 0);
        assert_eq!(config.database.path, mqttlogger_store::default_db_path());
        assert!(!config.features.tasmota_power);
        assert!(!config.features.solar);
        assert_eq!(config.cost.per_kwh, 0.0);
        assert_eq!(config.maintenance.rollup_interval_secs, 600);
        assert_eq!(config.maintenance.compaction_time, "03:00");
        assert_eq!(config.maintenance.retention_days, 30);
        assert!(config.time.timezone.is_none());
        assert_eq!(config.time.zone(), Zone::Local);
    }

    #[test]
    fn test_config_full_toml() {
        let toml = r#"
            [broker]
            host = "mqtts://broker.example.com:8883"
            username = "logger"
            password = "secret"
            client_id = "logger-1"
            qos = 1
            debug = true

            [database]
            path = "/data/energy.db"

            [topics]
            wattwaechter = "tele/meter/SENSOR"
            tasmota = "tele/+/SENSOR"

            [features]
            tasmota_power = true
            solar = true

            [cost]
            per_kwh = 0.32

            [maintenance]
            rollup_interval_secs = 300
            compaction_time = "04:30"
            retention_days = 14

            [time]
            timezone = "Europe/Berlin"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.broker.username.as_deref(), Some("logger"));
        assert_eq!(config.broker.qos, 1);
        assert!(config.broker.debug);
        assert_eq!(config.broker.keep_alive, 30);
        assert_eq!(config.database.path, PathBuf::from("/data/energy.db"));
        assert_eq!(config.topics.wattwaechter, "tele/meter/SENSOR");
        assert!(config.features.tasmota_power);
        assert_eq!(config.cost.per_kwh, 0.32);
        assert_eq!(config.maintenance.rollup_interval(), Duration::from_secs(300));
        assert_eq!(config.maintenance.retention(), time::Duration::days(14));
        assert_eq!(config.time.zone(), Zone::Named(chrono_tz::Europe::Berlin));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str("[cost]\nper_kwh = 0.4\n").unwrap();
        assert_eq!(config.cost.per_kwh, 0.4);
        assert_eq!(config.maintenance.compaction_time, "03:00");
        assert_eq!(config.topics.tasmota, "tele/+/SENSOR");
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.database.path = PathBuf::from("/tmp/test.db");
        config.features.solar = true;
        config.maintenance.retention_days = 7;
        config.time.timezone = Some("Europe/Vienna".to_string());

        config.save(&config_path).unwrap();
        let loaded = Config::load(&config_path).unwrap();

        assert_eq!(loaded.database.path, PathBuf::from("/tmp/test.db"));
        assert!(loaded.features.solar);
        assert_eq!(loaded.maintenance.retention_days, 7);
        assert_eq!(loaded.time.timezone.as_deref(), Some("Europe/Vienna"));
        assert!(loaded.validate().is_ok());
    }

    #[test]
    fn test_config_init_writes_defaults_once() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("mqttlogger").join("config.toml");

        Config::init(&config_path, false).unwrap();
        let written = Config::load(&config_path).unwrap();
        assert_eq!(written.maintenance.compaction_time, "03:00");
        assert!(written.validate().is_ok());

        std::fs::write(&config_path, "[cost]\nper_kwh = 0.5\n").unwrap();
        let result = Config::init(&config_path, false);
        assert!(matches!(result, Err(ConfigError::Exists(_))));
        assert_eq!(Config::load(&config_path).unwrap().cost.per_kwh, 0.5);

        Config::init(&config_path, true).unwrap();
        assert_eq!(Config::load(&config_path).unwrap().cost.per_kwh, 0.0);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not valid { toml").unwrap();

        let result = Config::load(&config_path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_time_validation() {
        let mut time = TimeConfig::default();
        assert!(time.validate().is_empty());

        time.timezone = Some("Europe/Berlin".to_string());
        assert!(time.validate().is_empty());

        time.timezone = Some("Europe/Atlantis".to_string());
        let errors = time.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "time.timezone");
        assert_eq!(time.zone(), Zone::Local);

        let config: Config = toml::from_str("[time]\ntimezone = \"Nowhere\"\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("mqttlogger/config.toml"));
    }

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_broker_validation() {
        let mut broker = BrokerConfig::default();
        assert!(broker.validate().is_empty());

        broker.host = "http://localhost".to_string();
        broker.qos = 3;
        broker.client_id = String::new();
        broker.password = Some("secret".to_string());
        let errors = broker.validate();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.field == "broker.host"));
        assert!(errors.iter().any(|e| e.message.contains("must be 0, 1 or 2")));
        assert!(errors.iter().any(|e| e.message.contains("client ID")));
        assert!(errors.iter().any(|e| e.message.contains("username is missing")));
    }

    #[test]
    fn test_topic_validation_respects_features() {
        let topics = TopicsConfig {
            wattwaechter: "tele/meter/SENSOR".to_string(),
            tasmota: "tele/#/SENSOR".to_string(),
        };

        assert!(topics.validate(&FeatureFlags::default()).is_empty());

        let enabled = FeatureFlags {
            tasmota_power: true,
            solar: false,
        };
        let errors = topics.validate(&enabled);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "topics.tasmota");
    }

    #[test]
    fn test_cost_validation() {
        assert!(CostConfig { per_kwh: 0.0 }.validate().is_empty());
        assert_eq!(CostConfig { per_kwh: -0.1 }.validate().len(), 1);
        assert_eq!(CostConfig { per_kwh: f64::NAN }.validate().len(), 1);
    }

    #[test]
    fn test_maintenance_validation() {
        let mut maintenance = MaintenanceConfig::default();
        assert!(maintenance.validate().is_empty());

        maintenance.rollup_interval_secs = 1;
        let errors = maintenance.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("too short"));

        maintenance.rollup_interval_secs = 100_000;
        assert!(maintenance.validate()[0].message.contains("too long"));

        maintenance.rollup_interval_secs = 600;
        maintenance.compaction_time = "25:00".to_string();
        maintenance.retention_days = 0;
        let errors = maintenance.validate();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(parse_time_of_day("03:00"), Ok((3, 0)));
        assert_eq!(parse_time_of_day("23:59"), Ok((23, 59)));
        assert_eq!(parse_time_of_day(" 7:05 "), Ok((7, 5)));
        assert!(parse_time_of_day("24:00").is_err());
        assert!(parse_time_of_day("12:60").is_err());
        assert!(parse_time_of_day("noon").is_err());
        assert!(parse_time_of_day("12").is_err());
    }

    #[test]
    fn test_config_validation_error_display() {
        let errors = vec![
            ValidationError {
                field: "broker.host".to_string(),
                message: "invalid scheme".to_string(),
            },
            ValidationError {
                field: "maintenance.compaction_time".to_string(),
                message: "out of range".to_string(),
            },
        ];
        let error = ConfigError::Validation(errors);
        let display = format!("{}", error);
        assert!(display.contains("broker.host"));
        assert!(display.contains("maintenance.compaction_time"));
    }
}
