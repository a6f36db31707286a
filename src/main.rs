//! palin - supervised worker pool around a shared-memory N-process mutex.

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};

use palin::cancel::CancelToken;
use palin::cli::{Cli, Commands, RunArgs, WorkerArgs};
use palin::logging::{self, LogConfig};
use palin::pool::{Supervisor, WorkerCommand, WorkerConfig, run_worker_main};

/// Program entry point: parses CLI arguments, dispatches the selected command, and handles top-level errors.
///
/// On error, prints a colored error header followed by each cause in the
/// error chain and exits with status code 1.
fn main() {
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Run(args) => cmd_run(&cli, args),
        Commands::Worker(args) => cmd_worker(&cli, args),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!(
                "{}: {}",
                "error"
                    .if_supports_color(Stderr, |text| text.red())
                    .if_supports_color(Stderr, |text| text.bold()),
                e
            );
            for cause in e.chain().skip(1) {
                eprintln!(
                    "  {}: {}",
                    "caused by".if_supports_color(Stderr, |text| text.yellow()),
                    cause
                );
            }
            std::process::exit(1);
        }
    }
}

/// Resolve logging from the flags, then the environment.
fn log_config(cli: &Cli, base: LogConfig) -> LogConfig {
    let mut config = base;
    if let Some(filter) = cli.verbosity().filter() {
        config = config.with_filter(filter.to_string());
    }
    if let Some(format) = cli.log_format {
        config = config.with_format(format);
    }
    config.with_env_overrides()
}

/// Run the supervisor and return its exit code.
fn cmd_run(cli: &Cli, args: &RunArgs) -> Result<i32> {
    let log = log_config(cli, LogConfig::for_supervisor());
    logging::init(log.clone());

    let cancel = CancelToken::install().context("Failed to install signal handlers")?;

    let mut worker = WorkerCommand::current_exe()?;
    for (key, value) in log.child_env() {
        worker = worker.env(key, value);
    }

    let config = args.to_config(worker);
    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            config.output_dir.display()
        )
    })?;

    let supervisor = Supervisor::new(config, cancel).context("Failed to initialize supervisor")?;
    let exit = supervisor.run()?;
    tracing::info!(spawned = exit.spawned(), code = exit.exit_code(), "Supervisor exiting");
    Ok(exit.exit_code())
}

/// Run one worker. Never returns.
fn cmd_worker(cli: &Cli, args: &WorkerArgs) -> Result<i32> {
    logging::init(log_config(cli, LogConfig::for_worker()));
    run_worker_main(&WorkerConfig::from(args))
}
