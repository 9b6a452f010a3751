//! Retention-driven downsampling of raw rows into hourly means.
//!
//! Rows older than the retention horizon are grouped by UTC hour and by
//! every column except the timestamp and the instantaneous value, then
//! replaced by one row per group stamped at the top of the hour. The
//! instantaneous value is averaged. The energy counters are part of the
//! group, so every distinct counter reading survives and rollups computed
//! before and after compaction agree.
//!
//! Each table is rewritten inside its own transaction. The replacement rows
//! are staged in a TEMP table first, then the originals are deleted and the
//! staged rows inserted before commit, so readers see either the raw or the
//! compacted form of an hour, never both and never neither.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::store::Store;

const SECONDS_PER_HOUR: i64 = 3600;

/// Columns of a raw table as seen by compaction.
struct CompactionTarget {
    table: &'static str,
    /// Columns preserved per group.
    keys: &'static [&'static str],
    /// Instantaneous value, replaced by the hourly mean.
    averaged: &'static str,
}

const TARGETS: [CompactionTarget; 3] = [
    CompactionTarget {
        table: "energy_data",
        keys: &["e_in", "e_out"],
        averaged: "power",
    },
    CompactionTarget {
        table: "tasmota_data",
        keys: &["device_id"],
        averaged: "power",
    },
    CompactionTarget {
        table: "solar_data",
        keys: &["device_id", "channel", "metric"],
        averaged: "value",
    },
];

/// Rows removed and inserted for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCompaction {
    pub table: String,
    /// Original rows deleted.
    pub removed: usize,
    /// Hourly rows written in their place.
    pub inserted: usize,
}

/// Result of `PRAGMA wal_checkpoint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointStats {
    /// 1 if the checkpoint could not complete because of concurrent readers.
    pub busy: i64,
    /// Frames in the WAL file, -1 when not in WAL mode.
    pub log_frames: i64,
    /// Frames copied back into the database, -1 when not in WAL mode.
    pub checkpointed_frames: i64,
}

/// Outcome of a compaction pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompactionReport {
    /// Unix time of the horizon; only rows strictly before it were touched.
    pub horizon: i64,
    /// Per-table results for tables that succeeded.
    pub tables: Vec<TableCompaction>,
    /// Tables that failed, with the error message.
    pub failures: Vec<(String, String)>,
    /// Checkpoint result, `None` if the checkpoint failed.
    pub checkpoint: Option<CheckpointStats>,
    /// Whether VACUUM completed.
    pub vacuumed: bool,
}

impl CompactionReport {
    /// Whether every step succeeded.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.checkpoint.is_some() && self.vacuumed
    }

    /// Total original rows removed.
    pub fn removed(&self) -> usize {
        self.tables.iter().map(|t| t.removed).sum()
    }

    /// Total hourly rows inserted.
    pub fn inserted(&self) -> usize {
        self.tables.iter().map(|t| t.inserted).sum()
    }
}

/// Truncate an instant down to the top of its UTC hour, as unix seconds.
pub fn hour_floor(at: OffsetDateTime) -> i64 {
    at.unix_timestamp().div_euclid(SECONDS_PER_HOUR) * SECONDS_PER_HOUR
}

/// Compaction horizon for a retention window ending at `now`.
pub fn horizon(now: OffsetDateTime, retention: Duration) -> i64 {
    hour_floor(now - retention)
}

fn stage_sql(target: &CompactionTarget, horizon: i64) -> String {
    let mut columns = vec![format!(
        "(timestamp_unix / {SECONDS_PER_HOUR}) * {SECONDS_PER_HOUR} AS bucket"
    )];
    columns.extend(target.keys.iter().map(|k| k.to_string()));
    columns.push(format!("AVG({c}) AS {c}", c = target.averaged));

    let mut group_by = vec!["bucket"];
    group_by.extend(target.keys.iter().copied());

    format!(
        "CREATE TEMP TABLE compaction_stage AS
         SELECT {columns}
         FROM {table}
         WHERE timestamp_unix > 0 AND timestamp_unix < {horizon}
         GROUP BY {group_by}
         HAVING COUNT(*) > 1 OR MIN(timestamp_unix) % {SECONDS_PER_HOUR} != 0",
        columns = columns.join(", "),
        table = target.table,
        group_by = group_by.join(", "),
    )
}

fn delete_sql(target: &CompactionTarget, horizon: i64) -> String {
    let table = target.table;
    // NULL-safe match so rows with missing key columns are still swapped
    let key_match: String = target
        .keys
        .iter()
        .map(|k| format!(" AND s.{k} IS {table}.{k}"))
        .collect();

    format!(
        "DELETE FROM {table}
         WHERE timestamp_unix > 0 AND timestamp_unix < {horizon}
           AND EXISTS (
               SELECT 1 FROM temp.compaction_stage s
               WHERE s.bucket = ({table}.timestamp_unix / {SECONDS_PER_HOUR}) * {SECONDS_PER_HOUR}{key_match}
           )"
    )
}

fn insert_sql(target: &CompactionTarget) -> String {
    let mut values = target.keys.to_vec();
    values.push(target.averaged);
    let values = values.join(", ");

    format!(
        "INSERT INTO {table} (timestamp_unix, timestamp_rfc3339, {values})
         SELECT bucket, strftime('%Y-%m-%dT%H:00:00Z', bucket, 'unixepoch'), {values}
         FROM temp.compaction_stage
         ORDER BY bucket",
        table = target.table,
    )
}

// Compaction operations
impl Store {
    /// Compact rows older than `retention`, measured from now.
    pub fn compact(&self, retention: Duration) -> CompactionReport {
        self.compact_before(OffsetDateTime::now_utc() - retention)
    }

    /// Compact rows older than an explicit instant.
    ///
    /// The instant is truncated to the top of its UTC hour, so a partially
    /// elapsed hour is left alone until it lies entirely before the horizon.
    /// A failing table is logged and recorded; the remaining tables, the WAL
    /// checkpoint and the VACUUM still run.
    pub fn compact_before(&self, before: OffsetDateTime) -> CompactionReport {
        let mut report = CompactionReport {
            horizon: hour_floor(before),
            ..Default::default()
        };
        info!("Compacting rows before unix time {}", report.horizon);

        for target in &TARGETS {
            match self.compact_table(target, report.horizon) {
                Ok(result) => {
                    debug!(
                        "Compacted {}: {} rows replaced by {}",
                        result.table, result.removed, result.inserted
                    );
                    report.tables.push(result);
                }
                Err(e) => {
                    error!("Compaction of {} failed: {}", target.table, e);
                    report.failures.push((target.table.to_string(), e.to_string()));
                }
            }
        }

        match self.checkpoint() {
            Ok(stats) => {
                if stats.busy != 0 {
                    warn!("WAL checkpoint could not complete, readers still active");
                }
                report.checkpoint = Some(stats);
            }
            Err(e) => error!("WAL checkpoint failed: {}", e),
        }

        match self.conn.execute_batch("VACUUM") {
            Ok(()) => report.vacuumed = true,
            Err(e) => error!("VACUUM failed: {}", e),
        }

        info!(
            "Compaction finished: {} rows replaced by {}, {} tables failed",
            report.removed(),
            report.inserted(),
            report.failures.len()
        );
        report
    }

    fn compact_table(&self, target: &CompactionTarget, horizon: i64) -> Result<TableCompaction> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute_batch("DROP TABLE IF EXISTS temp.compaction_stage")?;
        tx.execute_batch(&stage_sql(target, horizon))?;
        let removed = tx.execute(&delete_sql(target, horizon), [])?;
        let inserted = tx.execute(&insert_sql(target), [])?;
        tx.execute_batch("DROP TABLE temp.compaction_stage")?;

        tx.commit()?;

        Ok(TableCompaction {
            table: target.table.to_string(),
            removed,
            inserted,
        })
    }

    /// Run `PRAGMA wal_checkpoint(FULL)`.
    pub fn checkpoint(&self) -> Result<CheckpointStats> {
        let stats = self
            .conn
            .query_row("PRAGMA wal_checkpoint(FULL)", [], |row| {
                Ok(CheckpointStats {
                    busy: row.get(0)?,
                    log_frames: row.get(1)?,
                    checkpointed_frames: row.get(2)?,
                })
            })?;
        debug!("WAL checkpoint: {:?}", stats);
        Ok(stats)
    }
}
