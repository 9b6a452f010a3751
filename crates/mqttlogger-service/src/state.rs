//! Application state shared by ingestion, schedulers and signal triggers.
//!
//! There is exactly one [`Store`] per process. Every task reaches it through
//! the async mutex in [`AppState`]; maintenance jobs keep the lock for their
//! whole run, so ingestion pauses while a rollup or compaction is in flight.

use std::sync::Arc;

use mqttlogger_store::Store;
use tokio::sync::{Mutex, watch};
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::jobs::MaintenanceJobs;

/// Shared application state.
pub struct AppState {
    /// The data store (wrapped in Mutex for thread-safe access).
    pub store: Mutex<Store>,
    /// Configuration, fixed for the lifetime of the process.
    pub config: Config,
    /// Per-job locks and counters.
    pub jobs: MaintenanceJobs,
    /// Shutdown control.
    pub shutdown: ShutdownState,
    /// Background tasks that must finish before the process exits.
    pub tasks: TaskTracker,
}

impl AppState {
    /// Create new application state.
    pub fn new(store: Store, config: Config) -> Arc<Self> {
        Arc::new(Self {
            store: Mutex::new(store),
            config,
            jobs: MaintenanceJobs::new(),
            shutdown: ShutdownState::new(),
            tasks: TaskTracker::new(),
        })
    }

    /// Stop accepting work and wait for every tracked task to finish.
    pub async fn shutdown(&self) {
        self.shutdown.signal_stop();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

/// Stop flag observed by long-running tasks.
pub struct ShutdownState {
    /// Channel to signal tasks to stop.
    stop_tx: watch::Sender<bool>,
    /// Receiver for stop signal (cloned by tasks).
    stop_rx: watch::Receiver<bool>,
}

impl ShutdownState {
    /// Create a new, not yet stopped state.
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self { stop_tx, stop_rx }
    }

    /// Get a receiver for the stop signal.
    pub fn subscribe_stop(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    /// Signal all tasks to stop.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Whether a stop has been requested.
    pub fn is_stopping(&self) -> bool {
        *self.stop_rx.borrow()
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}
