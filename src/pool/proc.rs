//! Handle for a spawned worker process.

use crate::error::{PalinError, Result};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;
use std::time::{Duration, Instant};

/// A live worker as tracked by the supervisor.
///
/// Reaping normally happens through the supervisor's wait loop; the handle
/// only carries identity plus the signalling needed for teardown.
#[derive(Debug, Clone)]
pub struct WorkerProc {
    pid: Pid,
    record: usize,
    started: Instant,
}

impl WorkerProc {
    pub fn new(pid: Pid, record: usize) -> Self {
        Self {
            pid,
            record,
            started: Instant::now(),
        }
    }

    /// Take the identity of a freshly spawned child.
    ///
    /// The `Child` is dropped without waiting; the supervisor reaps by pid.
    pub fn from_child(child: std::process::Child, record: usize) -> Self {
        Self::new(Pid::from_raw(child.id() as i32), record)
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Record index this worker was assigned.
    pub fn record(&self) -> usize {
        self.record
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Deliver `sig` without waiting for acknowledgement.
    pub fn signal(&self, sig: Signal) -> Result<()> {
        signal::kill(self.pid, sig)
            .map_err(|e| PalinError::Worker(format!("Failed to send {:?} to {}: {}", sig, self.pid, e)))
    }

    /// Send SIGKILL and wait for the process to exit.
    pub fn kill(&self) -> Result<WaitStatus> {
        // ESRCH just means it already died; the wait below still reaps it.
        let _ = signal::kill(self.pid, Signal::SIGKILL);
        waitpid(self.pid, None).map_err(|e| PalinError::Worker(format!("waitpid failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::tests::CHILDREN;
    use nix::sys::wait::WaitPidFlag;
    use std::process::{Command, Stdio};

    fn spawn_sleeper() -> WorkerProc {
        let child = Command::new("sleep")
            .arg("60")
            .stdin(Stdio::null())
            .spawn()
            .expect("Failed to spawn sleep");
        WorkerProc::from_child(child, 4)
    }

    #[test]
    fn test_from_child_keeps_identity() {
        let _guard = CHILDREN.lock().unwrap_or_else(|e| e.into_inner());
        let proc = spawn_sleeper();
        assert!(proc.pid().as_raw() > 0);
        assert_eq!(proc.record(), 4);
        let status = waitpid(proc.pid(), Some(WaitPidFlag::WNOHANG)).unwrap();
        assert_eq!(status, WaitStatus::StillAlive);
        proc.kill().unwrap();
    }

    #[test]
    fn test_signal_then_reap() {
        let _guard = CHILDREN.lock().unwrap_or_else(|e| e.into_inner());
        let proc = spawn_sleeper();
        proc.signal(Signal::SIGINT).unwrap();

        let status = waitpid(proc.pid(), None).unwrap();
        assert_eq!(status, WaitStatus::Signaled(proc.pid(), Signal::SIGINT, false));
    }

    #[test]
    fn test_kill_reaps() {
        let _guard = CHILDREN.lock().unwrap_or_else(|e| e.into_inner());
        let proc = spawn_sleeper();
        let status = proc.kill().unwrap();
        assert!(matches!(status, WaitStatus::Signaled(_, Signal::SIGKILL, _)));
    }
}
