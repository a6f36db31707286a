//! Exit analysis for reaped worker processes.
//!
//! Distinguishes a worker that finished its rounds from one that honoured a
//! forwarded termination signal and one that died some other way.

use crate::cancel::{TERMINATION_SIGNALS, exit_code};
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// Reason why a worker process terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Exited through its own teardown after receiving a termination signal.
    Cancelled(Signal),
    /// Killed by signal.
    Signaled(Signal),
    /// Process is still running.
    StillAlive,
    /// Unknown termination reason.
    Unknown,
}

impl TerminationReason {
    /// Check if this is a successful exit.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Get a human-readable description.
    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Cancelled(sig) => format!("shut down after {:?}", sig),
            Self::Signaled(sig) => format!("killed by signal {:?}", sig),
            Self::StillAlive => "still running".to_string(),
            Self::Unknown => "unknown reason".to_string(),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Analyze a `WaitStatus` to determine the termination reason.
pub fn analyze_wait_status(status: WaitStatus) -> TerminationReason {
    match status {
        WaitStatus::Exited(_, code) => TERMINATION_SIGNALS
            .into_iter()
            .find(|&sig| exit_code(sig) == code)
            .map(TerminationReason::Cancelled)
            .unwrap_or(TerminationReason::Exited(code)),

        WaitStatus::Signaled(_, signal, _) => TerminationReason::Signaled(signal),

        WaitStatus::StillAlive => TerminationReason::StillAlive,

        _ => TerminationReason::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn test_termination_reason_success() {
        assert!(TerminationReason::Exited(0).is_success());
        assert!(!TerminationReason::Exited(1).is_success());
        assert!(!TerminationReason::Cancelled(Signal::SIGINT).is_success());
        assert!(!TerminationReason::Signaled(Signal::SIGKILL).is_success());
    }

    #[test]
    fn test_analyze_wait_status() {
        let status = WaitStatus::Exited(Pid::from_raw(1), 0);
        assert_eq!(analyze_wait_status(status), TerminationReason::Exited(0));

        let status = WaitStatus::Exited(Pid::from_raw(1), 1);
        assert_eq!(analyze_wait_status(status), TerminationReason::Exited(1));

        let status = WaitStatus::StillAlive;
        assert_eq!(analyze_wait_status(status), TerminationReason::StillAlive);
    }

    #[test]
    fn test_signal_derived_exit_is_cancellation() {
        let status = WaitStatus::Exited(Pid::from_raw(1), 130);
        assert_eq!(
            analyze_wait_status(status),
            TerminationReason::Cancelled(Signal::SIGINT)
        );

        let status = WaitStatus::Exited(Pid::from_raw(1), 142);
        assert_eq!(
            analyze_wait_status(status),
            TerminationReason::Cancelled(Signal::SIGALRM)
        );
    }

    #[test]
    fn test_killed_by_signal() {
        let status = WaitStatus::Signaled(Pid::from_raw(1), Signal::SIGKILL, false);
        assert_eq!(
            analyze_wait_status(status),
            TerminationReason::Signaled(Signal::SIGKILL)
        );
    }

    #[test]
    fn test_description() {
        assert!(
            TerminationReason::Cancelled(Signal::SIGALRM)
                .to_string()
                .contains("SIGALRM")
        );
        assert!(TerminationReason::Exited(3).to_string().contains('3'));
    }
}
