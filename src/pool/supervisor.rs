//! Supervisor: owns the shared segments and keeps the worker pool filled.
//!
//! ```text
//!   INIT ──▶ SPAWNING ──▶ STEADY ──quota reached──▶ DRAINING ──▶ TERMINATED
//!     │          │           │                          │            ▲
//!     └──────────┴───────────┴── SIGINT / time budget ──┴── teardown ┘
//! ```
//!
//! The only place the supervisor waits is the reap loop, which polls
//! `waitpid` without blocking so the cancellation token and the time budget
//! are checked at least every [`REAP_POLL`].

use super::monotonic_ns;
use super::proc::WorkerProc;
use super::signals::analyze_wait_status;
use super::slots::WorkerSlots;
use super::spawn::{WorkerCommand, WorkerConfig, spawn_worker};
use crate::cancel::{self, CancelToken};
use crate::error::{PalinError, Result};
use crate::lock::{LockState, MAX_PARTICIPANTS};
use crate::records::{LIST_SIZE, RecordTable, open_input};
use crate::shm::{SharedSegment, segment_name};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// Sleep between non-blocking reap attempts.
pub const REAP_POLL: Duration = Duration::from_millis(10);

/// Configuration for one supervisor run.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Workers alive at once; also the lock's participant count.
    pub pool_size: usize,
    /// Critical-section rounds per worker.
    pub rounds: usize,
    /// Total workers spawned over the whole run.
    pub quota: usize,
    /// Wall-clock budget before the run is torn down as if by SIGALRM.
    pub time_budget: Duration,
    /// Bound for each random pause inside the critical section.
    pub max_sleep: Duration,
    /// How long signalled workers get to exit before SIGKILL.
    pub grace: Duration,
    /// Record source; `-` reads stdin.
    pub input: PathBuf,
    /// Directory receiving the outcome logs.
    pub output_dir: PathBuf,
    /// How workers are started.
    pub worker: WorkerCommand,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        let worker = WorkerCommand::current_exe().unwrap_or_else(|_| WorkerCommand::new("palin"));
        Self {
            pool_size: MAX_PARTICIPANTS,
            rounds: 5,
            quota: LIST_SIZE,
            time_budget: Duration::from_secs(60),
            max_sleep: Duration::from_secs(2),
            grace: Duration::from_secs(2),
            input: PathBuf::from("-"),
            output_dir: PathBuf::from("."),
            worker,
        }
    }
}

impl SupervisorConfig {
    /// Check the limits the shared segments impose.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 || self.pool_size > MAX_PARTICIPANTS {
            return Err(PalinError::Config(format!(
                "pool size must be between 1 and {}, got {}",
                MAX_PARTICIPANTS, self.pool_size
            )));
        }
        if self.quota < self.pool_size || self.quota > LIST_SIZE {
            return Err(PalinError::Config(format!(
                "quota must be between the pool size ({}) and {}, got {}",
                self.pool_size, LIST_SIZE, self.quota
            )));
        }
        if self.rounds == 0 {
            return Err(PalinError::Config("rounds must be at least 1".to_string()));
        }
        if self.time_budget.is_zero() {
            return Err(PalinError::Config("time budget must be positive".to_string()));
        }
        Ok(())
    }
}

/// Supervisor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Spawning,
    Steady,
    Draining,
    Terminated,
}

/// How a supervisor run ended, short of a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// Quota reached and every worker reaped.
    Drained { spawned: usize },
    /// Torn down after SIGINT or the time budget.
    Cancelled { signal: Signal, spawned: usize },
}

impl SupervisorExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Drained { .. } => 0,
            Self::Cancelled { signal, .. } => cancel::exit_code(*signal),
        }
    }

    /// Workers spawned over the run.
    pub fn spawned(&self) -> usize {
        match self {
            Self::Drained { spawned } | Self::Cancelled { spawned, .. } => *spawned,
        }
    }
}

/// Result of one reap wait.
enum Reaped {
    Exited(Pid, WaitStatus),
    Cancelled(Signal),
    NoChildren,
}

/// The supervising process: shared segments, pool slots and spawn count.
#[derive(Debug)]
pub struct Supervisor {
    config: SupervisorConfig,
    cancel: CancelToken,
    phase: Phase,
    records: SharedSegment<RecordTable>,
    lock: SharedSegment<LockState>,
    slots: WorkerSlots,
    spawned: usize,
    deadline: Instant,
}

impl Supervisor {
    /// Create and fill both shared segments.
    ///
    /// `cancel` is normally the process-wide token from
    /// [`CancelToken::install`]. The time budget starts counting here, before
    /// the input is read. A cancellation while loading stops the load and
    /// leaves a partial table; the following [`run`](Self::run) then tears
    /// down without spawning. If anything fails, segments created so far are
    /// removed again.
    pub fn new(config: SupervisorConfig, cancel: CancelToken) -> Result<Self> {
        config.validate()?;
        let deadline = Instant::now() + config.time_budget;
        let owner = std::process::id();

        let mut records = SharedSegment::<RecordTable>::create(&segment_name(owner, "records")?)?;
        let input = open_input(&config.input)?;
        match load_records(input, &cancel, deadline, config.time_budget) {
            Ok(Some(table)) => *records.get_mut()? = *table,
            Ok(None) => tracing::warn!("Record loading interrupted"),
            Err(e) => {
                return Err(PalinError::Config(format!(
                    "Failed to read input '{}': {}",
                    config.input.display(),
                    e
                )));
            }
        }

        let table = records.get()?;
        if table.is_empty() {
            tracing::warn!("No records loaded; every worker gets an empty record");
        } else if table.len() < config.quota {
            tracing::warn!(
                loaded = table.len(),
                quota = config.quota,
                "Fewer records than spawn quota; later workers get empty records"
            );
        }

        let lock = SharedSegment::<LockState>::create(&segment_name(owner, "lock")?)?;
        lock.get()?.initialize(config.pool_size)?;

        tracing::info!(
            records = records.get()?.len(),
            pool_size = config.pool_size,
            quota = config.quota,
            rounds = config.rounds,
            time_budget_secs = config.time_budget.as_secs(),
            "Supervisor initialized"
        );

        Ok(Self {
            slots: WorkerSlots::new(config.pool_size),
            deadline,
            config,
            cancel,
            phase: Phase::Init,
            records,
            lock,
            spawned: 0,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Workers spawned so far.
    pub fn spawned(&self) -> usize {
        self.spawned
    }

    /// Workers currently occupying a slot.
    pub fn live(&self) -> usize {
        self.slots.live()
    }

    pub fn records_segment(&self) -> &str {
        self.records.name()
    }

    pub fn lock_segment(&self) -> &str {
        self.lock.name()
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Run until the quota drains or a termination signal arrives.
    ///
    /// On signal, every live worker receives the same signal and the
    /// segments are released before returning. On error (for example a
    /// failed spawn) workers are torn down with SIGINT and the error is
    /// returned.
    pub fn run(mut self) -> Result<SupervisorExit> {
        match self.supervise() {
            Ok(None) => {
                self.release_segments()?;
                self.set_phase(Phase::Terminated);
                tracing::info!(spawned = self.spawned, "All workers drained");
                Ok(SupervisorExit::Drained {
                    spawned: self.spawned,
                })
            }
            Ok(Some(signal)) => {
                self.teardown(signal)?;
                Ok(SupervisorExit::Cancelled {
                    signal,
                    spawned: self.spawned,
                })
            }
            Err(e) => {
                tracing::error!(error = %e, "Supervisor failed, tearing down");
                if let Err(teardown) = self.teardown(Signal::SIGINT) {
                    tracing::warn!(error = %teardown, "Teardown after failure was incomplete");
                }
                Err(e)
            }
        }
    }

    /// SPAWNING, STEADY and DRAINING. Returns the cancelling signal, if any.
    fn supervise(&mut self) -> Result<Option<Signal>> {
        self.set_phase(Phase::Spawning);
        for slot in 1..=self.config.pool_size {
            if let Some(signal) = self.check_cancel() {
                return Ok(Some(signal));
            }
            self.spawn_into(slot, slot - 1)?;
        }

        self.set_phase(Phase::Steady);
        while self.spawned < self.config.quota {
            let (pid, status) = match self.wait_for_exit()? {
                Reaped::Exited(pid, status) => (pid, status),
                Reaped::Cancelled(signal) => return Ok(Some(signal)),
                Reaped::NoChildren => return Err(self.lost_children()),
            };
            // An unknown pid gets no replacement.
            if let Some(slot) = self.retire(pid, status) {
                self.spawn_into(slot, self.spawned)?;
            }
        }

        self.set_phase(Phase::Draining);
        while self.slots.live() > 0 {
            match self.wait_for_exit()? {
                Reaped::Exited(pid, status) => {
                    self.retire(pid, status);
                }
                Reaped::Cancelled(signal) => return Ok(Some(signal)),
                Reaped::NoChildren => return Err(self.lost_children()),
            }
        }
        Ok(None)
    }

    fn set_phase(&mut self, phase: Phase) {
        tracing::debug!(from = ?self.phase, to = ?phase, "Supervisor phase change");
        self.phase = phase;
    }

    fn check_cancel(&self) -> Option<Signal> {
        poll_cancel(&self.cancel, self.deadline, self.config.time_budget)
    }

    fn worker_config(&self, slot: usize, record: usize) -> WorkerConfig {
        WorkerConfig {
            id: slot,
            record,
            records_segment: self.records.name().to_string(),
            lock_segment: self.lock.name().to_string(),
            rounds: self.config.rounds,
            max_sleep: self.config.max_sleep,
            output_dir: self.config.output_dir.clone(),
        }
    }

    fn spawn_into(&mut self, slot: usize, record: usize) -> Result<()> {
        let proc = spawn_worker(&self.config.worker, &self.worker_config(slot, record))?;
        self.spawned += 1;
        tracing::info!(
            slot,
            record,
            pid = proc.pid().as_raw(),
            spawned = self.spawned,
            "Spawned worker"
        );
        self.slots.occupy(slot, proc);
        Ok(())
    }

    /// Poll for any child exit until one is reaped or the run is cancelled.
    fn wait_for_exit(&self) -> Result<Reaped> {
        loop {
            if let Some(signal) = self.check_cancel() {
                return Ok(Reaped::Cancelled(signal));
            }
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => std::thread::sleep(REAP_POLL),
                Ok(status) => match status.pid() {
                    Some(pid) => return Ok(Reaped::Exited(pid, status)),
                    None => std::thread::sleep(REAP_POLL),
                },
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => return Ok(Reaped::NoChildren),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Vacate the slot held by a reaped pid and log why it died.
    ///
    /// Returns the slot, or `None` for a pid the pool doesn't know.
    fn retire(&mut self, pid: Pid, status: WaitStatus) -> Option<usize> {
        let reason = analyze_wait_status(status);
        let Some(slot) = self.slots.find(pid) else {
            tracing::warn!(pid = pid.as_raw(), reason = %reason, "Reaped unknown process");
            return None;
        };
        let proc = self.slots.vacate(slot);
        let record = proc.as_ref().map(WorkerProc::record);
        let uptime_ms = proc.as_ref().map(|p| p.uptime().as_millis() as u64);

        if reason.is_success() {
            tracing::info!(slot, pid = pid.as_raw(), ?record, ?uptime_ms, "Worker finished");
        } else {
            tracing::warn!(
                slot,
                pid = pid.as_raw(),
                ?record,
                reason = %reason,
                "Worker exited abnormally"
            );
        }
        Some(slot)
    }

    fn lost_children(&mut self) -> PalinError {
        let live = self.slots.live();
        let orphaned: Vec<usize> = self.slots.occupied().map(|(slot, _)| slot).collect();
        for slot in orphaned {
            self.slots.vacate(slot);
        }
        PalinError::Worker(format!(
            "no children left to reap while {} slots were occupied",
            live
        ))
    }

    /// Forward `signal` to every live worker, wait out the grace period,
    /// SIGKILL whoever is left and release the segments.
    fn teardown(&mut self, signal: Signal) -> Result<()> {
        tracing::info!(?signal, live = self.slots.live(), "Tearing down worker pool");

        for (slot, proc) in self.slots.occupied() {
            tracing::info!(
                slot,
                pid = proc.pid().as_raw(),
                ?signal,
                at_ns = monotonic_ns(),
                "Signalling worker"
            );
            if let Err(e) = proc.signal(signal) {
                tracing::warn!(slot, error = %e, "Failed to signal worker");
            }
        }

        let grace_end = Instant::now() + self.config.grace;
        while self.slots.live() > 0 && Instant::now() < grace_end {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => std::thread::sleep(REAP_POLL),
                Ok(status) => {
                    if let Some(pid) = status.pid() {
                        self.retire(pid, status);
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "waitpid failed during teardown");
                    break;
                }
            }
        }

        let stragglers: Vec<usize> = self.slots.occupied().map(|(slot, _)| slot).collect();
        for slot in stragglers {
            let Some(proc) = self.slots.vacate(slot) else {
                continue;
            };
            tracing::warn!(
                slot,
                pid = proc.pid().as_raw(),
                at_ns = monotonic_ns(),
                "Worker outlived grace period, sending SIGKILL"
            );
            match proc.kill() {
                Ok(status) => {
                    tracing::info!(slot, reason = %analyze_wait_status(status), "Worker killed")
                }
                Err(e) => tracing::warn!(slot, error = %e, "Failed to kill worker"),
            }
        }

        let released = self.release_segments();
        self.set_phase(Phase::Terminated);
        released
    }

    /// Destroy both segments. Safe to call more than once.
    fn release_segments(&mut self) -> Result<()> {
        let lock = self.lock.destroy();
        let records = self.records.destroy();
        lock?;
        records?;
        tracing::debug!("Released shared segments");
        Ok(())
    }
}

/// Current cancellation, turning an expired time budget into SIGALRM.
fn poll_cancel(cancel: &CancelToken, deadline: Instant, budget: Duration) -> Option<Signal> {
    if !cancel.is_cancelled() && Instant::now() >= deadline {
        tracing::info!(time_budget_secs = budget.as_secs(), "Time budget exhausted");
        cancel.cancel(Signal::SIGALRM);
    }
    cancel.signal()
}

/// Read the record table on a helper thread while watching for cancellation.
///
/// Reads from stdin restart after a signal, so the supervisor itself never
/// blocks on input. Returns `None` if cancelled first; the helper thread is
/// left blocked on its read and goes away with the process.
fn load_records(
    input: Box<dyn BufRead + Send>,
    cancel: &CancelToken,
    deadline: Instant,
    budget: Duration,
) -> io::Result<Option<Box<RecordTable>>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("palin-input".to_string())
        .spawn(move || {
            let mut table = RecordTable::boxed();
            let loaded = table.populate(input).map(|_| table);
            let _ = tx.send(loaded);
        })?;

    loop {
        if poll_cancel(cancel, deadline, budget).is_some() {
            return Ok(None);
        }
        match rx.recv_timeout(REAP_POLL) {
            Ok(loaded) => return loaded.map(Some),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(io::Error::other("input reader thread exited"));
            }
        }
    }
}
