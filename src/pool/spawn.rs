//! Worker subprocess spawning.
//!
//! Workers are the same executable re-invoked with the hidden `worker`
//! subcommand. Everything a worker needs crosses the boundary as
//! command-line arguments; shared state is reached through the segment names.

use super::proc::WorkerProc;
use crate::error::{PalinError, Result};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

/// Everything one worker process is told at spawn time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Pool slot, 1-based; the lock participant index is `id - 1`.
    pub id: usize,
    /// Index into the shared record table.
    pub record: usize,
    /// Name of the record table segment.
    pub records_segment: String,
    /// Name of the lock segment.
    pub lock_segment: String,
    /// Critical-section rounds before exiting.
    pub rounds: usize,
    /// Upper bound for each simulated-work pause inside the critical section.
    pub max_sleep: Duration,
    /// Directory holding the outcome logs.
    pub output_dir: PathBuf,
}

impl WorkerConfig {
    /// 0-based index used by the lock protocol.
    pub fn participant_index(&self) -> Result<usize> {
        self.id
            .checked_sub(1)
            .ok_or_else(|| PalinError::Config("worker id must be at least 1".to_string()))
    }

    /// Arguments following the worker subcommand.
    pub fn to_args(&self) -> Vec<OsString> {
        vec![
            "--id".into(),
            self.id.to_string().into(),
            "--record".into(),
            self.record.to_string().into(),
            "--records-segment".into(),
            self.records_segment.clone().into(),
            "--lock-segment".into(),
            self.lock_segment.clone().into(),
            "--rounds".into(),
            self.rounds.to_string().into(),
            "--max-sleep-ms".into(),
            self.max_sleep.as_millis().to_string().into(),
            "--output-dir".into(),
            self.output_dir.clone().into_os_string(),
        ]
    }
}

/// How to start a worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments placed before the per-worker arguments.
    pub leading_args: Vec<OsString>,
    /// Extra environment, used to hand the supervisor's log settings down.
    pub envs: Vec<(OsString, OsString)>,
}

impl WorkerCommand {
    /// Run `program worker ...`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: vec!["worker".into()],
            envs: Vec::new(),
        }
    }

    /// Re-invoke the running executable in worker mode.
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe().map_err(|e| {
            PalinError::Config(format!("Failed to get current executable: {}", e))
        })?;
        Ok(Self::new(program))
    }

    /// Replace the arguments placed before the per-worker arguments.
    #[cfg(test)]
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set an environment variable for every spawned worker.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn command(&self, config: &WorkerConfig) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args);
        cmd.args(config.to_args());

        // Workers share the supervisor's stderr for diagnostics.
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());

        cmd.envs(self.envs.iter().map(|(k, v)| (k, v)));
        cmd
    }
}

/// Spawn one worker subprocess.
pub fn spawn_worker(command: &WorkerCommand, config: &WorkerConfig) -> Result<WorkerProc> {
    let child = command
        .command(config)
        .spawn()
        .map_err(|e| PalinError::Spawn {
            slot: config.id,
            message: e.to_string(),
        })?;
    Ok(WorkerProc::from_child(child, config.record))
}
