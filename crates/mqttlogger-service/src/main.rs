//! mqttlogger - MQTT energy logger with scheduled database maintenance.
//!
//! Run with: `cargo run -p mqttlogger-service -- run`

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use owo_colors::OwoColorize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mqttlogger_service::config::default_config_path;
use mqttlogger_service::{
    AppState, Config, Ingestor, JobKind, JobOutcome, JobReport, Scheduler, Trigger,
    listen_for_triggers, run_job,
};
use mqttlogger_store::{RawQuery, Store};

/// MQTT energy logger with scheduled rollups, compaction and backups.
#[derive(Parser, Debug)]
#[command(name = "mqttlogger")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides config).
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run ingestion and the maintenance schedules in the foreground (default).
    Run,

    /// Write a consistent snapshot of the database to FILE.
    Backup {
        /// Snapshot destination.
        file: PathBuf,
    },

    /// Replace the database with the snapshot in FILE.
    ///
    /// The service must not be running.
    Restore {
        /// Snapshot to restore.
        file: PathBuf,
    },

    /// Recompute all period summaries now.
    Rollup,

    /// Downsample raw rows older than the retention window now.
    Compact,

    /// Show database size and row counts.
    Stats,

    /// Print the newest raw rows of a table, oldest first.
    Tail {
        /// Table to read.
        #[arg(value_enum)]
        table: RawTable,

        /// Only rows of this device (plug and solar).
        #[arg(long)]
        device: Option<String>,

        /// Number of rows to show.
        #[arg(short = 'n', long, default_value = "20")]
        lines: u32,
    },

    /// Print the database path.
    Path,

    /// Manage the configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Raw measurement tables.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum RawTable {
    /// Energy meter readings.
    Energy,
    /// Smart plug readings.
    Plug,
    /// Solar gateway values.
    Solar,
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write the default configuration to the config path.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration.
    Show,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(args: &Args) {
    let level = if args.verbose {
        "debug"
    } else if args.quiet {
        "warn"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "mqttlogger={level},mqttlogger_service={level},mqttlogger_store={level}"
        ))
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    if let Some(db_path) = &args.database {
        config.database.path = db_path.clone();
    }

    config.validate()?;
    Ok(config)
}

fn open_store(config: &Config) -> anyhow::Result<Store> {
    info!("Opening database at {:?}", config.database.path);
    Store::open(&config.database.path)
        .with_context(|| format!("Failed to open {}", config.database.path.display()))
}

async fn run(args: Args) -> anyhow::Result<()> {
    if let Some(Command::Config {
        action: ConfigAction::Init { force },
    }) = &args.command
    {
        return init_config(args.config.clone(), *force);
    }

    let config = load_config(&args)?;

    match args.command {
        Some(Command::Run) | None => run_service(config).await,
        Some(Command::Backup { file }) => {
            let store = open_store(&config)?;
            let report = store.backup(&file).context("Backup failed")?;
            println!(
                "{} Backup written to {} ({} bytes)",
                "OK".green().bold(),
                report.path.display(),
                report.bytes
            );
            Ok(())
        }
        Some(Command::Restore { file }) => {
            let report =
                mqttlogger_store::restore(&config.database.path, &file).context("Restore failed")?;
            println!(
                "{} Restored {} from {} ({} bytes)",
                "OK".green().bold(),
                report.path.display(),
                file.display(),
                report.bytes
            );
            Ok(())
        }
        Some(Command::Rollup) => run_once(config, JobKind::Rollup).await,
        Some(Command::Compact) => run_once(config, JobKind::Compaction).await,
        Some(Command::Stats) => {
            let store = open_store(&config)?;
            print_stats(&store)
        }
        Some(Command::Tail {
            table,
            device,
            lines,
        }) => {
            let store = open_store(&config)?;
            let mut query = RawQuery::new().limit(lines);
            if let Some(device) = &device {
                query = query.device(device);
            }
            print_tail(&store, table, &query)
        }
        Some(Command::Path) => {
            println!("{}", config.database.path.display());
            Ok(())
        }
        Some(Command::Config { action }) => match action {
            ConfigAction::Show => {
                print!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
            ConfigAction::Init { force } => init_config(args.config, force),
        },
    }
}

fn init_config(path: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = path.unwrap_or_else(default_config_path);
    Config::init(&path, force)?;
    println!("{} Wrote {}", "OK".green().bold(), path.display());
    Ok(())
}

async fn run_service(config: Config) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let state = AppState::new(store, config);

    Scheduler::new(Arc::clone(&state)).start();

    let trigger_state = Arc::clone(&state);
    state.tasks.spawn(async move {
        if let Err(e) = listen_for_triggers(trigger_state).await {
            warn!("Signal triggers unavailable: {}", e);
        }
    });

    Ingestor::new(Arc::clone(&state)).start();

    wait_for_shutdown().await?;
    info!("Shutting down, waiting for running jobs to finish");
    state.shutdown().await;
    info!("Stopped");

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

async fn run_once(config: Config, kind: JobKind) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let state = AppState::new(store, config);

    let report = match run_job(&state, kind, Trigger::Manual).await {
        JobOutcome::Ran(report) => report,
        JobOutcome::Coalesced => anyhow::bail!("{} is already running", kind),
    };

    match &report {
        JobReport::Rollup(rollup) => {
            for (granularity, rows) in &rollup.written {
                println!("{:>6}  {} periods", granularity.as_str(), rows);
            }
            for (granularity, error) in &rollup.failed {
                println!("{:>6}  {}", granularity.as_str(), error.red());
            }
        }
        JobReport::Compaction(compaction) => {
            println!("{:<14} {}", "horizon", compaction.horizon);
            for table in &compaction.tables {
                println!("{:<14} -{} +{}", table.table, table.removed, table.inserted);
            }
            for (table, error) in &compaction.failures {
                println!("{:<14} {}", table, error.red());
            }
            if let Some(checkpoint) = &compaction.checkpoint {
                println!(
                    "checkpoint     {}/{} frames",
                    checkpoint.checkpointed_frames, checkpoint.log_frames
                );
            }
            println!("vacuumed       {}", compaction.vacuumed);
        }
    }

    if report.is_success() {
        println!("{} {} finished", "OK".green().bold(), kind);
        Ok(())
    } else {
        anyhow::bail!("{} finished with failures", kind)
    }
}

fn value_or_dash(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn print_tail(store: &Store, table: RawTable, query: &RawQuery) -> anyhow::Result<()> {
    match table {
        RawTable::Energy => {
            for row in store.query_energy(query)?.iter().rev() {
                println!(
                    "{:<26} e_in={} e_out={} power={}",
                    row.timestamp_rfc3339,
                    value_or_dash(row.e_in),
                    value_or_dash(row.e_out),
                    value_or_dash(row.power)
                );
            }
        }
        RawTable::Plug => {
            for row in store.query_plug(query)?.iter().rev() {
                println!(
                    "{:<26} {:<16} power={}",
                    row.timestamp_rfc3339,
                    row.device_id.as_deref().unwrap_or("-"),
                    value_or_dash(row.power)
                );
            }
        }
        RawTable::Solar => {
            for row in store.query_solar(query)?.iter().rev() {
                println!(
                    "{:<26} {:<16} {:>3} {:<12} {}",
                    row.timestamp_rfc3339,
                    row.device_id.as_deref().unwrap_or("-"),
                    row.channel.map_or_else(|| "-".to_string(), |c| c.to_string()),
                    row.metric.as_deref().unwrap_or("-"),
                    value_or_dash(row.value)
                );
            }
        }
    }

    Ok(())
}

fn print_stats(store: &Store) -> anyhow::Result<()> {
    if let Some(path) = store.path() {
        println!("{:<14} {}", "path".bold(), path.display());
    }
    if let Some(size) = store.file_size()? {
        println!("{:<14} {} bytes", "size".bold(), size);
    }
    println!("{:<14} {}", "journal".bold(), store.journal_mode()?);

    for stats in store.table_stats()? {
        println!("{:<14} {}", stats.table, stats.rows);
    }

    Ok(())
}
