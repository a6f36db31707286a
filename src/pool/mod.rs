//! Supervised pool of worker processes sharing one lock.
//!
//! The supervisor owns both shared segments, keeps `pool_size` workers alive
//! until the spawn quota is used up, then drains. Workers are the same
//! executable started with the hidden `worker` subcommand.
//!
//! # Architecture
//!
//! ```text
//!                     ┌──────────────────┐
//!                     │    Supervisor    │
//!                     │ records + lock   │
//!                     └────────┬─────────┘
//!                              │ spawn / waitpid / signal
//!               ┌──────────────┼──────────────┐
//!               │              │              │
//!         ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐
//!         │ Worker 1  │  │ Worker 2  │  │ Worker N  │
//!         │ (process) │  │ (process) │  │ (process) │
//!         └─────┬─────┘  └─────┬─────┘  └─────┬─────┘
//!               └──────────────┼──────────────┘
//!                              ▼
//!                 /palin-<pid>-records  (read-only)
//!                 /palin-<pid>-lock     (read-write)
//! ```
//!
//! # Features
//!
//! - **Replenishment**: every reaped worker is replaced in its slot until the
//!   quota is reached
//! - **Teardown**: SIGINT or the time budget signals every child, waits a
//!   grace period, then force-kills stragglers
//! - **Death reasons**: each reaped worker is logged with its exit code or
//!   terminating signal

mod proc;
mod signals;
mod slots;
mod spawn;
mod supervisor;
pub mod worker_main;

pub use proc::WorkerProc;
pub use signals::{TerminationReason, analyze_wait_status};
pub use slots::WorkerSlots;
pub use spawn::{WorkerCommand, WorkerConfig, spawn_worker};
pub use supervisor::{Phase, Supervisor, SupervisorConfig, SupervisorExit};
pub use worker_main::{WorkerExit, run_worker, run_worker_main};

use nix::time::{ClockId, clock_gettime};

/// Monotonic clock reading in nanoseconds, comparable across processes.
pub(crate) fn monotonic_ns() -> u64 {
    match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(ts) => ts.tv_sec() as u64 * 1_000_000_000 + ts.tv_nsec() as u64,
        Err(_) => 0,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    /// Held by every test that spawns and reaps children.
    ///
    /// The supervisor reaps with `waitpid(-1)`, which would otherwise steal
    /// children belonging to a concurrently running test.
    pub(crate) static CHILDREN: Mutex<()> = Mutex::new(());

    #[test]
    fn test_monotonic_ns_advances() {
        let a = super::monotonic_ns();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let b = super::monotonic_ns();
        assert!(b > a);
    }
}
