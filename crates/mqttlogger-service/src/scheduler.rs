//! Background maintenance scheduler.
//!
//! One task per job kind sleeps until the job's next due time, runs it to
//! completion and then recomputes the next due time from the wall clock. A
//! long job therefore never causes a burst of catch-up runs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeZone};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{MaintenanceConfig, parse_time_of_day};
use crate::jobs::{self, JobKind, Trigger};
use crate::state::AppState;
use crate::zone::Zone;

/// When a job comes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// A fixed delay after the previous run finished.
    Interval(Duration),
    /// Once a day at a wall-clock time in the configured zone.
    Daily { hour: u32, minute: u32 },
}

impl Schedule {
    /// The next due time strictly after the wall-clock time `now`.
    ///
    /// For `Daily` this is today's target if it has not passed yet, otherwise
    /// tomorrow's.
    pub fn next_run_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        match *self {
            Schedule::Interval(interval) => chrono::Duration::from_std(interval)
                .ok()
                .and_then(|delta| now.checked_add_signed(delta))
                .unwrap_or(NaiveDateTime::MAX),
            Schedule::Daily { hour, minute } => {
                let today = now.date().and_hms_opt(hour, minute, 0);
                match today {
                    Some(target) if target > now => target,
                    Some(target) => target + chrono::Duration::days(1),
                    // Out-of-range times are rejected by config validation
                    None => now + chrono::Duration::days(1),
                }
            }
        }
    }

    /// How long to sleep from `now` until the next due time.
    pub fn delay_from<Tz: TimeZone>(&self, now: DateTime<Tz>) -> Duration {
        match *self {
            Schedule::Interval(interval) => interval,
            Schedule::Daily { .. } => {
                let tz = now.timezone();
                let target = self.next_run_after(now.naive_local());
                // A target inside a DST gap runs an hour later
                let target = tz
                    .from_local_datetime(&target)
                    .earliest()
                    .or_else(|| {
                        tz.from_local_datetime(&(target + chrono::Duration::hours(1)))
                            .earliest()
                    });
                match target {
                    Some(target) => (target - now).to_std().unwrap_or(Duration::ZERO),
                    None => Duration::from_secs(3600),
                }
            }
        }
    }
}

/// Rollup schedule from the maintenance configuration.
pub fn rollup_schedule(config: &MaintenanceConfig) -> Schedule {
    Schedule::Interval(config.rollup_interval())
}

/// Compaction schedule from the maintenance configuration.
///
/// An unparseable time falls back to 03:00.
pub fn compaction_schedule(config: &MaintenanceConfig) -> Schedule {
    let (hour, minute) = parse_time_of_day(&config.compaction_time).unwrap_or_else(|e| {
        warn!("{}, using 03:00", e);
        (3, 0)
    });
    Schedule::Daily { hour, minute }
}

/// Background scheduler for the maintenance jobs.
pub struct Scheduler {
    state: Arc<AppState>,
}

impl Scheduler {
    /// Create a new scheduler.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Start the rollup and compaction schedules.
    ///
    /// Each schedule runs as a tracked task until shutdown. Returns
    /// immediately; jobs run in the background.
    pub fn start(&self) {
        let maintenance = &self.state.config.maintenance;
        let rollup = rollup_schedule(maintenance);
        let compaction = compaction_schedule(maintenance);
        let zone = self.state.config.time.zone();

        info!(
            "Starting scheduler: rollup every {}s, compaction daily at {} {} (retention {} days)",
            maintenance.rollup_interval_secs,
            maintenance.compaction_time,
            zone,
            maintenance.retention_days
        );

        for (kind, schedule, run_at_start) in [
            (JobKind::Rollup, rollup, true),
            (JobKind::Compaction, compaction, false),
        ] {
            let state = Arc::clone(&self.state);
            let stop_rx = self.state.shutdown.subscribe_stop();
            self.state.tasks.spawn(async move {
                run_schedule(state, kind, schedule, zone, run_at_start, stop_rx).await;
            });
        }
    }
}

/// Drive one job kind until shutdown.
async fn run_schedule(
    state: Arc<AppState>,
    kind: JobKind,
    schedule: Schedule,
    zone: Zone,
    run_at_start: bool,
    mut stop_rx: watch::Receiver<bool>,
) {
    if run_at_start && !*stop_rx.borrow() {
        jobs::run_job(&state, kind, Trigger::Startup).await;
    }

    loop {
        if *stop_rx.borrow() {
            break;
        }

        let delay = zone.delay_until(&schedule);
        debug!("Next {} in {:?}", kind, delay);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                jobs::run_job(&state, kind, Trigger::Schedule).await;
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }

    info!("{} scheduler stopped", kind);
}

/// Listen for SIGUSR1 (compaction) and SIGUSR2 (rollup) until shutdown.
#[cfg(unix)]
pub async fn listen_for_triggers(state: Arc<AppState>) -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;
    let mut stop_rx = state.shutdown.subscribe_stop();

    info!("Send SIGUSR1 to compact now, SIGUSR2 to roll up now");

    loop {
        tokio::select! {
            Some(()) = usr1.recv() => {
                info!("SIGUSR1 received, triggering compaction");
                jobs::trigger(&state, JobKind::Compaction);
            }
            Some(()) = usr2.recv() => {
                info!("SIGUSR2 received, triggering rollup");
                jobs::trigger(&state, JobKind::Rollup);
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Signal triggers are only available on Unix.
#[cfg(not(unix))]
pub async fn listen_for_triggers(_state: Arc<AppState>) -> std::io::Result<()> {
    warn!("Signal triggers are not supported on this platform");
    Ok(())
}
