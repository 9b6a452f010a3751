//! Single-file snapshots of a WAL-mode database.
//!
//! A WAL database is spread over three files while it is open. To produce a
//! snapshot that is one self-contained file, the WAL is checkpointed, the
//! store drops into rollback-journal mode for the duration of the copy and
//! returns to WAL afterwards, whatever happened in between.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::store::Store;

/// First 16 bytes of every SQLite database file.
const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

/// A completed backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupReport {
    /// Where the snapshot was written.
    pub path: PathBuf,
    /// Size of the snapshot in bytes.
    pub bytes: u64,
}

/// A completed restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
    /// The live database that was replaced.
    pub path: PathBuf,
    /// Bytes copied from the snapshot.
    pub bytes: u64,
}

/// Path of a SQLite sidecar file (`-wal`, `-shm`) next to `path`.
pub fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Copy `src` to `dst` and flush the destination to disk.
fn copy_file(src: &Path, dst: &Path) -> Result<u64> {
    let file_error = |action: &'static str, path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| Error::File {
            action,
            path,
            source,
        }
    };

    let mut input = File::open(src).map_err(file_error("open", src))?;
    let mut output = File::create(dst).map_err(file_error("create", dst))?;
    let bytes = io::copy(&mut input, &mut output).map_err(file_error("write", dst))?;
    output.sync_all().map_err(file_error("sync", dst))?;

    Ok(bytes)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::File {
            action: "remove",
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

fn validate_snapshot(snapshot: &Path) -> Result<()> {
    if !snapshot.is_file() {
        return Err(Error::SnapshotNotFound(snapshot.to_path_buf()));
    }

    let mut header = [0u8; 16];
    let mut file = File::open(snapshot).map_err(|e| Error::File {
        action: "open",
        path: snapshot.to_path_buf(),
        source: e,
    })?;
    if file.read_exact(&mut header).is_err() || &header != SQLITE_HEADER {
        return Err(Error::InvalidSnapshot(snapshot.to_path_buf()));
    }

    Ok(())
}

// Backup operations
impl Store {
    /// Write a consistent single-file snapshot of the database to `destination`.
    ///
    /// The store is back in WAL mode when this returns, on success and on
    /// failure. If both the copy and the switch back to WAL fail, the copy
    /// error is returned.
    pub fn backup<P: AsRef<Path>>(&self, destination: P) -> Result<BackupReport> {
        let source = self.path.as_deref().ok_or(Error::NotFileBacked)?;
        let destination = destination.as_ref();

        if same_file(source, destination) {
            return Err(Error::SameFile(destination.to_path_buf()));
        }

        info!(
            "Backing up {} to {}",
            source.display(),
            destination.display()
        );

        let copied = self
            .checkpoint()
            .and_then(|_| self.set_journal_mode("delete"))
            .and_then(|_| copy_file(source, destination));

        let restored = self.set_journal_mode("wal");
        if let Err(ref e) = restored {
            warn!("Failed to re-enable WAL after backup: {}", e);
        }

        let bytes = copied?;
        restored?;

        info!("Backup written: {} ({} bytes)", destination.display(), bytes);
        Ok(BackupReport {
            path: destination.to_path_buf(),
            bytes,
        })
    }
}

/// Replace the database at `live` with the snapshot at `snapshot`.
///
/// The caller must ensure nothing holds the live database open. The snapshot
/// is validated before anything is removed, so a missing or corrupt snapshot
/// leaves the live database as it was. On success the restored database has
/// been reopened once and confirmed to be in WAL mode.
pub fn restore<P: AsRef<Path>, Q: AsRef<Path>>(live: P, snapshot: Q) -> Result<RestoreReport> {
    let live = live.as_ref();
    let snapshot = snapshot.as_ref();

    validate_snapshot(snapshot)?;
    if same_file(live, snapshot) {
        return Err(Error::SameFile(snapshot.to_path_buf()));
    }

    info!("Restoring {} from {}", live.display(), snapshot.display());

    remove_if_exists(&sidecar_path(live, "-wal"))?;
    remove_if_exists(&sidecar_path(live, "-shm"))?;
    remove_if_exists(live)?;

    if let Some(parent) = live.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let bytes = copy_file(snapshot, live)?;

    let store = Store::open(live)?;
    let mode = store.journal_mode()?;
    if mode != "wal" {
        return Err(Error::JournalMode {
            expected: "wal",
            actual: mode,
        });
    }

    info!("Restore complete: {} ({} bytes)", live.display(), bytes);
    Ok(RestoreReport {
        path: live.to_path_buf(),
        bytes,
    })
}
