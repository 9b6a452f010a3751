//! Maintenance job execution.
//!
//! Each job kind has its own advisory lock. Scheduled runs queue behind a run
//! that is already in flight; signal-triggered runs are coalesced into it
//! instead, so a burst of signals never stacks up work.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use mqttlogger_store::{CompactionReport, RollupReport};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::state::AppState;

/// The maintenance jobs run by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Recompute the period summaries.
    Rollup,
    /// Downsample old rows, checkpoint and vacuum.
    Compaction,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Rollup => f.write_str("rollup"),
            JobKind::Compaction => f.write_str("compaction"),
        }
    }
}

/// What started a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The one rollup at process start.
    Startup,
    /// The job's schedule came due.
    Schedule,
    /// An out-of-band request (SIGUSR1/SIGUSR2).
    Signal,
    /// A one-shot CLI command.
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Startup => f.write_str("startup"),
            Trigger::Schedule => f.write_str("schedule"),
            Trigger::Signal => f.write_str("signal"),
            Trigger::Manual => f.write_str("manual"),
        }
    }
}

/// Report of a finished job.
#[derive(Debug, Clone)]
pub enum JobReport {
    Rollup(RollupReport),
    Compaction(CompactionReport),
}

impl JobReport {
    /// Whether every step of the job succeeded.
    pub fn is_success(&self) -> bool {
        match self {
            JobReport::Rollup(report) => report.is_success(),
            JobReport::Compaction(report) => report.is_success(),
        }
    }
}

/// Result of asking for a job run.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// The job ran to completion (possibly with recorded failures).
    Ran(JobReport),
    /// A run of the same kind was already in flight; this request was folded into it.
    Coalesced,
}

/// Run counters for one job kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    /// Completed runs.
    pub runs: u64,
    /// Completed runs that recorded at least one failure.
    pub failures: u64,
    /// Signal requests folded into a running job.
    pub coalesced: u64,
}

#[derive(Default)]
struct JobSlot {
    lock: Mutex<()>,
    runs: AtomicU64,
    failures: AtomicU64,
    coalesced: AtomicU64,
}

impl JobSlot {
    fn stats(&self) -> JobStats {
        JobStats {
            runs: self.runs.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
            coalesced: self.coalesced.load(Ordering::SeqCst),
        }
    }
}

/// Per-job advisory locks and counters.
#[derive(Default)]
pub struct MaintenanceJobs {
    rollup: JobSlot,
    compaction: JobSlot,
}

impl MaintenanceJobs {
    /// Create idle job slots.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, kind: JobKind) -> &JobSlot {
        match kind {
            JobKind::Rollup => &self.rollup,
            JobKind::Compaction => &self.compaction,
        }
    }

    /// Advisory lock held for the duration of a run of `kind`.
    pub fn lock(&self, kind: JobKind) -> &Mutex<()> {
        &self.slot(kind).lock
    }

    /// Counters for `kind`.
    pub fn stats(&self, kind: JobKind) -> JobStats {
        self.slot(kind).stats()
    }
}

/// Run one job of `kind` against the shared store.
///
/// Signal-triggered requests return [`JobOutcome::Coalesced`] when a run of
/// the same kind is already in flight; all other triggers wait for it.
pub async fn run_job(state: &AppState, kind: JobKind, trigger: Trigger) -> JobOutcome {
    let slot = state.jobs.slot(kind);

    let _guard = match trigger {
        Trigger::Signal => match slot.lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                slot.coalesced.fetch_add(1, Ordering::SeqCst);
                info!("{} already running, {} request coalesced", kind, trigger);
                return JobOutcome::Coalesced;
            }
        },
        _ => slot.lock.lock().await,
    };

    info!("Starting {} ({})", kind, trigger);
    let started = Instant::now();

    let report = {
        let store = state.store.lock().await;
        match kind {
            JobKind::Rollup => JobReport::Rollup(store.rollup_all(state.config.cost.per_kwh)),
            JobKind::Compaction => {
                JobReport::Compaction(store.compact(state.config.maintenance.retention()))
            }
        }
    };

    slot.runs.fetch_add(1, Ordering::SeqCst);
    if report.is_success() {
        info!("{} finished in {:.1?}", kind, started.elapsed());
    } else {
        slot.failures.fetch_add(1, Ordering::SeqCst);
        warn!(
            "{} finished with failures in {:.1?}",
            kind,
            started.elapsed()
        );
    }

    JobOutcome::Ran(report)
}

/// Start an out-of-band run of `kind` as a tracked background task.
///
/// Returns `None` once shutdown has begun.
pub fn trigger(state: &Arc<AppState>, kind: JobKind) -> Option<JoinHandle<JobOutcome>> {
    if state.shutdown.is_stopping() || state.tasks.is_closed() {
        warn!("Ignoring {} request during shutdown", kind);
        return None;
    }

    let task_state = Arc::clone(state);
    let handle = state.tasks.spawn(async move {
        let outcome = run_job(&task_state, kind, Trigger::Signal).await;
        if let JobOutcome::Ran(ref report) = outcome
            && !report.is_success()
        {
            error!("Triggered {} reported failures", kind);
        }
        outcome
    });
    Some(handle)
}
