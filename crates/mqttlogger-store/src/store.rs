//! Main store implementation.

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use time::OffsetDateTime;
use tracing::{debug, info};

use mqttlogger_types::{EnergyReading, PlugReading, SolarMeta, SolarReading};

use crate::error::{Error, Result};
use crate::models::{StoredEnergyReading, StoredPlugReading, StoredSolarReading, TableStats};
use crate::queries::RawQuery;
use crate::schema;

/// SQLite-based store for sensor readings and their rollups.
///
/// A `Store` owns exactly one connection. It is not `Sync`; share it between
/// tasks behind a mutex.
pub struct Store {
    pub(crate) conn: Connection,
    pub(crate) path: Option<PathBuf>,
}

impl Store {
    /// Open or create a database at the given path.
    ///
    /// The database is switched into WAL mode so ingestion and readers can
    /// proceed while maintenance jobs run.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA wal_autocheckpoint = 1000;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn, path: None })
    }

    /// Path of the database file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current journal mode as reported by SQLite (`wal`, `delete`, `memory`, ...).
    pub fn journal_mode(&self) -> Result<String> {
        let mode: String = self
            .conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        Ok(mode.to_lowercase())
    }

    /// Switch the journal mode and confirm SQLite accepted it.
    pub(crate) fn set_journal_mode(&self, mode: &'static str) -> Result<()> {
        let actual: String =
            self.conn
                .query_row(&format!("PRAGMA journal_mode = {}", mode), [], |row| {
                    row.get(0)
                })?;
        let actual = actual.to_lowercase();
        if actual != mode.to_lowercase() {
            return Err(Error::JournalMode {
                expected: mode,
                actual,
            });
        }
        debug!("Journal mode set to {}", actual);
        Ok(())
    }

    /// Row counts for the raw, metadata and summary tables.
    pub fn table_stats(&self) -> Result<Vec<TableStats>> {
        let tables = schema::RAW_TABLES
            .iter()
            .chain(std::iter::once(&"solar_meta"))
            .chain(schema::SUMMARY_TABLES.iter());

        let mut stats = Vec::new();
        for table in tables {
            let rows: i64 =
                self.conn
                    .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                        row.get(0)
                    })?;
            stats.push(TableStats {
                table: table.to_string(),
                rows: rows as u64,
            });
        }
        Ok(stats)
    }

    /// Size of the main database file in bytes, `None` for in-memory stores.
    pub fn file_size(&self) -> Result<Option<u64>> {
        match &self.path {
            Some(path) => {
                let metadata = std::fs::metadata(path).map_err(|e| Error::File {
                    action: "stat",
                    path: path.clone(),
                    source: e,
                })?;
                Ok(Some(metadata.len()))
            }
            None => Ok(None),
        }
    }
}

fn timestamp_from_row(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let ts: i64 = row.get(idx)?;
    OffsetDateTime::from_unix_timestamp(ts).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Integer, Box::new(e))
    })
}

// Insert operations
impl Store {
    /// Insert an energy meter reading.
    pub fn insert_energy(&self, reading: &EnergyReading) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO energy_data (timestamp_unix, timestamp_rfc3339, e_in, e_out, power)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                reading.time.unix(),
                reading.time.rfc3339(),
                reading.e_in,
                reading.e_out,
                reading.power,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Insert a smart plug reading.
    pub fn insert_plug(&self, reading: &PlugReading) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO tasmota_data (device_id, timestamp_unix, timestamp_rfc3339, power)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                reading.device_id,
                reading.time.unix(),
                reading.time.rfc3339(),
                reading.power,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Insert a numeric solar value.
    pub fn insert_solar(&self, reading: &SolarReading) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO solar_data (timestamp_unix, timestamp_rfc3339, device_id, channel, metric, value)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                reading.time.unix(),
                reading.time.rfc3339(),
                reading.device_id,
                reading.channel,
                reading.metric,
                reading.value,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Insert or update a non-numeric solar attribute.
    pub fn upsert_solar_meta(&self, meta: &SolarMeta) -> Result<()> {
        self.conn.execute(
            "INSERT INTO solar_meta (device_id, channel, key, value) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(device_id, channel, key) DO UPDATE SET value = excluded.value",
            rusqlite::params![meta.device_id, meta.channel, meta.key, meta.value],
        )?;
        Ok(())
    }

    /// Look up a solar attribute.
    pub fn solar_meta(&self, device_id: &str, channel: i64, key: &str) -> Result<Option<String>> {
        use rusqlite::OptionalExtension;

        let value = self
            .conn
            .query_row(
                "SELECT value FROM solar_meta WHERE device_id = ?1 AND channel = ?2 AND key = ?3",
                rusqlite::params![device_id, channel, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

// Raw query operations
impl Store {
    /// Query energy meter rows.
    pub fn query_energy(&self, query: &RawQuery) -> Result<Vec<StoredEnergyReading>> {
        let sql = query.build_sql(
            "energy_data",
            "id, timestamp_unix, timestamp_rfc3339, e_in, e_out, power",
            false,
        );
        let (_, params) = query.build_where(false);
        debug!("Executing query: {}", sql);

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                Ok(StoredEnergyReading {
                    id: row.get(0)?,
                    timestamp: timestamp_from_row(row, 1)?,
                    timestamp_rfc3339: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    e_in: row.get(3)?,
                    e_out: row.get(4)?,
                    power: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Query smart plug rows.
    pub fn query_plug(&self, query: &RawQuery) -> Result<Vec<StoredPlugReading>> {
        let sql = query.build_sql(
            "tasmota_data",
            "id, device_id, timestamp_unix, timestamp_rfc3339, power",
            true,
        );
        let (_, params) = query.build_where(true);
        debug!("Executing query: {}", sql);

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                Ok(StoredPlugReading {
                    id: row.get(0)?,
                    device_id: row.get(1)?,
                    timestamp: timestamp_from_row(row, 2)?,
                    timestamp_rfc3339: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    power: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Query solar rows.
    pub fn query_solar(&self, query: &RawQuery) -> Result<Vec<StoredSolarReading>> {
        let sql = query.build_sql(
            "solar_data",
            "id, device_id, channel, metric, timestamp_unix, timestamp_rfc3339, value",
            true,
        );
        let (_, params) = query.build_where(true);
        debug!("Executing query: {}", sql);

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                Ok(StoredSolarReading {
                    id: row.get(0)?,
                    device_id: row.get(1)?,
                    channel: row.get(2)?,
                    metric: row.get(3)?,
                    timestamp: timestamp_from_row(row, 4)?,
                    timestamp_rfc3339: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                    value: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Count rows in one raw table.
    pub fn count_rows(&self, table: &str) -> Result<u64> {
        if !schema::RAW_TABLES.contains(&table) && table != "solar_meta" {
            return Err(Error::Database(rusqlite::Error::InvalidParameterName(
                table.to_string(),
            )));
        }
        let count: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })?;
        Ok(count as u64)
    }
}
