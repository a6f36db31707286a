//! Worker subprocess main entry point.
//!
//! This module runs when `palin worker` is invoked by the supervisor. The
//! worker attaches to both shared segments, runs its critical-section rounds
//! and exits with a status the supervisor can interpret.

use super::monotonic_ns;
use super::spawn::WorkerConfig;
use crate::cancel::{self, CancelToken};
use crate::classify::classify;
use crate::error::Result;
use crate::lock::{LockState, Participant};
use crate::outcome::{OutcomeLine, OutcomeLogs};
use crate::records::RecordTable;
use crate::shm::{Access, SharedSegment};
use nix::sys::signal::Signal;
use rand::Rng;
use std::time::{Duration, Instant};

/// Granularity at which critical-section pauses notice cancellation.
const PAUSE_SLICE: Duration = Duration::from_millis(10);

/// How a worker's run ended, short of a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// All rounds finished.
    Completed { rounds: usize },
    /// A termination signal arrived first.
    Cancelled(Signal),
}

impl WorkerExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed { .. } => 0,
            Self::Cancelled(sig) => cancel::exit_code(*sig),
        }
    }
}

/// Attach, run every round, then detach and close the logs.
///
/// Segments and logs are released on every path, including cancellation and
/// errors raised mid-round.
pub fn run_worker(config: &WorkerConfig, cancel: &CancelToken) -> Result<WorkerExit> {
    let mut records =
        SharedSegment::<RecordTable>::attach(&config.records_segment, Access::ReadOnly)?;
    let mut lock = SharedSegment::<LockState>::attach(&config.lock_segment, Access::ReadWrite)?;
    let mut logs = OutcomeLogs::open(&config.output_dir)?;

    let outcome = match (records.get(), lock.get()) {
        (Ok(table), Ok(state)) => run_rounds(config, table, state, &mut logs, cancel),
        (Err(e), _) | (_, Err(e)) => Err(e),
    };

    let closed = logs.close();
    let records_detached = records.detach();
    let lock_detached = lock.detach();

    let exit = outcome?;
    closed?;
    records_detached?;
    lock_detached?;
    Ok(exit)
}

/// State one worker carries from round to round.
struct Rounds<'a, R> {
    config: &'a WorkerConfig,
    table: &'a RecordTable,
    logs: &'a mut OutcomeLogs,
    rng: R,
    pid: u32,
}

fn run_rounds(
    config: &WorkerConfig,
    table: &RecordTable,
    state: &LockState,
    logs: &mut OutcomeLogs,
    cancel: &CancelToken,
) -> Result<WorkerExit> {
    let participant = state.participant(config.participant_index()?)?;
    let mut rounds = Rounds {
        config,
        table,
        logs,
        rng: rand::thread_rng(),
        pid: std::process::id(),
    };

    for round in 1..=config.rounds {
        if let Some(sig) = cancel.signal() {
            return Ok(WorkerExit::Cancelled(sig));
        }
        if let Some(sig) = rounds.critical_round(&participant, cancel, round)? {
            return Ok(WorkerExit::Cancelled(sig));
        }
    }

    tracing::debug!(
        pid = rounds.pid,
        participant = participant.id(),
        rounds = config.rounds,
        "Worker finished"
    );
    Ok(WorkerExit::Completed {
        rounds: config.rounds,
    })
}

impl<R: Rng> Rounds<'_, R> {
    /// One acquire → classify → log → release cycle.
    ///
    /// Returns the cancelling signal if the round was abandoned.
    fn critical_round(
        &mut self,
        participant: &Participant<'_>,
        cancel: &CancelToken,
        round: usize,
    ) -> Result<Option<Signal>> {
        let (pid, id, record) = (self.pid, participant.id(), self.config.record);
        tracing::info!(pid, participant = id, round, at_ns = monotonic_ns(), "REQUESTING critical section");

        let Some(guard) = participant.acquire(cancel) else {
            return Ok(cancel.signal());
        };
        tracing::info!(pid, participant = id, round, at_ns = monotonic_ns(), "ENTERS critical section");

        if pause(&mut self.rng, self.config.max_sleep, cancel) {
            guard.release();
            return Ok(cancel.signal());
        }

        let text = self.table.record(record)?;
        let outcome = classify(&text);
        self.logs.record(outcome, &OutcomeLine::new(pid, record, &*text))?;
        tracing::debug!(pid, record, ?outcome, "Recorded outcome");

        // The write already happened; a cancellation here only cuts the pause short.
        pause(&mut self.rng, self.config.max_sleep, cancel);

        // Stamped while still holding the lock.
        let left_at = monotonic_ns();
        guard.release();
        tracing::info!(pid, participant = id, round, at_ns = left_at, "LEAVES critical section");
        Ok(None)
    }
}

/// Sleep a random duration in `[0, max]`, waking early on cancellation.
///
/// Returns whether the token was cancelled.
fn pause(rng: &mut impl Rng, max: Duration, cancel: &CancelToken) -> bool {
    let max_ms = max.as_millis() as u64;
    let deadline = Instant::now() + Duration::from_millis(rng.gen_range(0..=max_ms));

    loop {
        if cancel.is_cancelled() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep(PAUSE_SLICE.min(deadline - now));
    }
}

/// Run the worker subprocess main function.
///
/// This function never returns: it exits 0 after all rounds, `128 + signo`
/// after a termination signal, and 1 on any error.
pub fn run_worker_main(config: &WorkerConfig) -> ! {
    let code = match CancelToken::install().and_then(|cancel| run_worker(config, &cancel)) {
        Ok(exit) => {
            if let WorkerExit::Cancelled(sig) = exit {
                tracing::info!(pid = std::process::id(), ?sig, "Worker cancelled");
            }
            exit.exit_code()
        }
        Err(e) => {
            tracing::error!(pid = std::process::id(), error = %e, "Worker failed");
            eprintln!("Worker error: {}", e);
            1
        }
    };
    std::process::exit(code)
}
