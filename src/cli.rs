//! Command-line interface definitions using clap.

use crate::logging::LogFormat;
use crate::pool::{SupervisorConfig, WorkerCommand, WorkerConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Supervised worker pool sharing a critical section through an N-process
/// shared-memory mutex.
#[derive(Parser, Debug)]
#[command(name = "palin")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all logging except errors.
    #[arg(long, conflicts_with = "verbose", global = true)]
    pub quiet: bool,

    /// Log output format.
    #[arg(long, env = "PALIN_LOG_FORMAT", global = true)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load records and run the supervised worker pool.
    Run(RunArgs),

    /// Run a single worker (spawned by `palin run`).
    #[command(hide = true)]
    Worker(WorkerArgs),
}

/// Arguments for the run command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Input file with one record per line (`-` for stdin).
    #[arg(short, long, default_value = "-")]
    pub file: PathBuf,

    /// Time budget in seconds before the pool is torn down.
    #[arg(short, long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub time: u64,

    /// Workers alive at once.
    #[arg(short, long, default_value_t = 20, value_parser = clap::value_parser!(u64).range(1..=20))]
    pub pool_size: u64,

    /// Critical-section rounds per worker.
    #[arg(short, long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    pub rounds: u64,

    /// Total workers spawned over the run (at least the pool size, at most 50).
    #[arg(short, long, default_value_t = 50, value_parser = clap::value_parser!(u64).range(1..=50))]
    pub quota: u64,

    /// Upper bound for each random pause inside the critical section.
    #[arg(long, default_value_t = 2000)]
    pub max_sleep_ms: u64,

    /// How long signalled workers get to exit before being killed.
    #[arg(long, default_value_t = 2000)]
    pub grace_ms: u64,

    /// Directory for palin.out and nopalin.out.
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,
}

impl RunArgs {
    /// Supervisor configuration for these arguments.
    pub fn to_config(&self, worker: WorkerCommand) -> SupervisorConfig {
        SupervisorConfig {
            pool_size: self.pool_size as usize,
            rounds: self.rounds as usize,
            quota: self.quota as usize,
            time_budget: Duration::from_secs(self.time),
            max_sleep: Duration::from_millis(self.max_sleep_ms),
            grace: Duration::from_millis(self.grace_ms),
            input: self.file.clone(),
            output_dir: self.output_dir.clone(),
            worker,
        }
    }
}

/// Arguments for the hidden worker command.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Pool slot, 1-based.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub id: u64,

    /// Record index to classify.
    #[arg(long)]
    pub record: usize,

    /// Name of the record table segment.
    #[arg(long)]
    pub records_segment: String,

    /// Name of the lock segment.
    #[arg(long)]
    pub lock_segment: String,

    /// Critical-section rounds.
    #[arg(long)]
    pub rounds: usize,

    /// Upper bound for each critical-section pause.
    #[arg(long)]
    pub max_sleep_ms: u64,

    /// Directory for the outcome logs.
    #[arg(long)]
    pub output_dir: PathBuf,
}

impl From<&WorkerArgs> for WorkerConfig {
    fn from(args: &WorkerArgs) -> Self {
        WorkerConfig {
            id: args.id as usize,
            record: args.record,
            records_segment: args.records_segment.clone(),
            lock_segment: args.lock_segment.clone(),
            rounds: args.rounds,
            max_sleep: Duration::from_millis(args.max_sleep_ms),
            output_dir: args.output_dir.clone(),
        }
    }
}

/// Verbosity level for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// --quiet: errors only.
    Quiet,
    /// Default: the environment decides, otherwise info.
    Normal,
    /// -v: debug.
    Debug,
    /// -vv: trace.
    Trace,
}

impl From<u8> for Verbosity {
    fn from(count: u8) -> Self {
        match count {
            0 => Verbosity::Normal,
            1 => Verbosity::Debug,
            _ => Verbosity::Trace,
        }
    }
}

impl Verbosity {
    /// Filter directive forced by the flags, if any.
    pub fn filter(self) -> Option<&'static str> {
        match self {
            Verbosity::Quiet => Some("error"),
            Verbosity::Normal => None,
            Verbosity::Debug => Some("debug"),
            Verbosity::Trace => Some("trace"),
        }
    }
}

impl Cli {
    /// Get the verbosity level based on -v and --quiet.
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            Verbosity::from(self.verbose)
        }
    }
}
