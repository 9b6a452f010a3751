//! Database schema and views.
//!
//! Databases written by earlier mqttlogger releases already contain the raw
//! and summary tables but no `schema_version` row. Every statement below is
//! `IF NOT EXISTS`, so such files are adopted in place as version 1.

use rusqlite::Connection;
use tracing::debug;

use crate::error::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Raw measurement tables, in the order maintenance jobs visit them.
pub const RAW_TABLES: [&str; 3] = ["energy_data", "tasmota_data", "solar_data"];

/// Summary tables written by rollups.
pub const SUMMARY_TABLES: [&str; 4] = [
    "daily_energy_raw",
    "weekly_energy_raw",
    "monthly_energy_cost_raw",
    "yearly_energy_cost_current_raw",
];

/// Initialize the database schema.
pub fn initialize(conn: &Connection) -> Result<()> {
    let version = get_schema_version(conn)?;

    if version == 0 {
        // Fresh or legacy database
        create_schema_v1(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    }

    // Views are read by dashboards and always reflect the current definition
    create_views(conn)?;

    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 =
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;

    Ok(version)
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )?;
    Ok(())
}

/// Create the initial schema (version 1).
fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );

        -- Energy meter readings (cumulative counters plus instantaneous power)
        CREATE TABLE IF NOT EXISTS energy_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp_unix INTEGER,
            timestamp_rfc3339 TEXT,
            e_in REAL,
            e_out REAL,
            power INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_energy_data_time
            ON energy_data(timestamp_unix);

        -- Smart plug power readings
        CREATE TABLE IF NOT EXISTS tasmota_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id TEXT,
            timestamp_unix INTEGER,
            timestamp_rfc3339 TEXT,
            power INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_tasmota_data_time
            ON tasmota_data(timestamp_unix);

        -- Solar inverter values, one row per device/channel/metric sample
        CREATE TABLE IF NOT EXISTS solar_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp_unix INTEGER,
            timestamp_rfc3339 TEXT,
            device_id TEXT,
            channel INTEGER,
            metric TEXT,
            value REAL
        );
        CREATE INDEX IF NOT EXISTS idx_solar_data_time
            ON solar_data(timestamp_unix);

        -- Latest non-numeric solar attributes
        CREATE TABLE IF NOT EXISTS solar_meta (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id TEXT,
            channel INTEGER,
            key TEXT,
            value TEXT,
            UNIQUE(device_id, channel, key)
        );

        -- Rollup summaries
        CREATE TABLE IF NOT EXISTS daily_energy_raw (
            day TEXT PRIMARY KEY,
            daily_consumption REAL
        );
        CREATE TABLE IF NOT EXISTS weekly_energy_raw (
            week TEXT PRIMARY KEY,
            weekly_consumption REAL
        );
        CREATE TABLE IF NOT EXISTS monthly_energy_cost_raw (
            month TEXT PRIMARY KEY,
            consumption REAL,
            cost REAL
        );
        CREATE TABLE IF NOT EXISTS yearly_energy_cost_current_raw (
            year INTEGER PRIMARY KEY,
            consumption REAL,
            cost REAL
        );
        "#,
    )?;

    Ok(())
}

/// Recreate the dashboard views on top of the summary tables.
///
/// Column names are part of the dashboard contract and must stay stable.
fn create_views(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP VIEW IF EXISTS daily_energy;
        CREATE VIEW daily_energy AS
            SELECT day, daily_consumption
            FROM daily_energy_raw;

        DROP VIEW IF EXISTS weekly_energy;
        CREATE VIEW weekly_energy AS
            SELECT week, weekly_consumption
            FROM weekly_energy_raw;

        DROP VIEW IF EXISTS monthly_energy_cost;
        CREATE VIEW monthly_energy_cost AS
            SELECT month, consumption AS monthly_consumption, cost AS monthly_cost
            FROM monthly_energy_cost_raw;

        DROP VIEW IF EXISTS yearly_energy_cost_current;
        CREATE VIEW yearly_energy_cost_current AS
            SELECT consumption AS total_consumption, cost AS total_cost
            FROM yearly_energy_cost_current_raw
            WHERE year = CAST(strftime('%Y', 'now') AS INTEGER);
        "#,
    )?;

    debug!("Dashboard views recreated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(conn: &Connection, kind: &str) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type = ?1 ORDER BY name")
            .unwrap()
            .query_map([kind], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_initialize_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let tables = names(&conn, "table");
        for table in RAW_TABLES.iter().chain(SUMMARY_TABLES.iter()) {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
        assert!(tables.contains(&"solar_meta".to_string()));
        assert!(tables.contains(&"schema_version".to_string()));

        let views = names(&conn, "view");
        for view in [
            "daily_energy",
            "weekly_energy",
            "monthly_energy_cost",
            "yearly_energy_cost_current",
        ] {
            assert!(views.contains(&view.to_string()), "missing view {view}");
        }
    }

    #[test]
    fn test_schema_version_tracking() {
        let conn = Connection::open_in_memory().unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), 0);

        initialize(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_initialize_is_repeatable() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        initialize(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_adopts_legacy_database() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE energy_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp_unix INTEGER,
                timestamp_rfc3339 TEXT,
                e_in REAL,
                e_out REAL,
                power INTEGER
            );
            INSERT INTO energy_data (timestamp_unix, timestamp_rfc3339, e_in, e_out, power)
                VALUES (1761984000, '2025-11-01T08:00:00Z', 100, 0, 0);
            CREATE VIEW monthly_energy_cost AS SELECT 1 AS legacy;",
        )
        .unwrap();

        initialize(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM energy_data", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);

        // The legacy view definition is replaced
        let mut stmt = conn.prepare("SELECT * FROM monthly_energy_cost").unwrap();
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        assert_eq!(columns, vec!["month", "monthly_consumption", "monthly_cost"]);
    }
}
