//! Query builder for the newest raw measurement rows.
//!
//! [`RawQuery`] is shared by the three raw tables. The device filter only
//! applies to tables that have a `device_id` column; energy meter rows
//! ignore it. Results are always ordered newest first.
//!
//! # Example
//!
//! ```
//! use mqttlogger_store::{RawQuery, Store};
//!
//! let store = Store::open_in_memory()?;
//!
//! let rows = store.query_plug(&RawQuery::new().device("plug-1").limit(20))?;
//! assert!(rows.is_empty());
//! # Ok::<(), mqttlogger_store::Error>(())
//! ```

/// Fluent query builder for raw rows.
#[derive(Debug, Default, Clone)]
pub struct RawQuery {
    /// Filter by device ID (plug and solar rows).
    pub device_id: Option<String>,
    /// Maximum number of results.
    pub limit: Option<u32>,
}

impl RawQuery {
    /// Create a new query: all rows, newest first.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by device ID.
    pub fn device(mut self, device_id: &str) -> Self {
        self.device_id = Some(device_id.to_string());
        self
    }

    /// Limit the maximum number of results returned.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self, has_device: bool) -> (String, Vec<String>) {
        match &self.device_id {
            Some(device_id) if has_device => {
                ("WHERE device_id = ?".to_string(), vec![device_id.clone()])
            }
            _ => (String::new(), Vec::new()),
        }
    }

    /// Build the full SQL query for `table`, selecting `columns`.
    pub(crate) fn build_sql(&self, table: &str, columns: &str, has_device: bool) -> String {
        let (where_clause, _) = self.build_where(has_device);

        let mut sql = format!(
            "SELECT {} FROM {} {} ORDER BY timestamp_unix DESC, id DESC",
            columns, table, where_clause
        );

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_query_new_defaults() {
        let query = RawQuery::new();
        assert!(query.device_id.is_none());
        assert!(query.limit.is_none());
    }

    #[test]
    fn test_raw_query_chaining() {
        let query = RawQuery::new().device("plug-1").limit(10);
        assert_eq!(query.device_id, Some("plug-1".to_string()));
        assert_eq!(query.limit, Some(10));
    }

    #[test]
    fn test_build_where_ignores_device_without_column() {
        let query = RawQuery::new().device("plug-1");
        let (where_clause, params) = query.build_where(false);
        assert_eq!(where_clause, "");
        assert!(params.is_empty());

        let (where_clause, params) = query.build_where(true);
        assert_eq!(where_clause, "WHERE device_id = ?");
        assert_eq!(params, vec!["plug-1".to_string()]);
    }

    #[test]
    fn test_build_sql() {
        let sql = RawQuery::new()
            .device("inverter")
            .limit(100)
            .build_sql("solar_data", "id, value", true);

        assert!(sql.starts_with("SELECT id, value FROM solar_data WHERE device_id = ?"));
        assert!(sql.contains("ORDER BY timestamp_unix DESC, id DESC"));
        assert!(sql.ends_with("LIMIT 100"));
    }

    #[test]
    fn test_build_sql_without_filters() {
        let sql = RawQuery::new().build_sql("energy_data", "id", false);
        assert_eq!(
            sql,
            "SELECT id FROM energy_data  ORDER BY timestamp_unix DESC, id DESC"
        );
    }
}
