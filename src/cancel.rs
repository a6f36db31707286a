//! Cancellation driven by termination signals.
//!
//! Signal handlers only record which signal arrived. The actual teardown runs
//! later, when the spin loop or the round loop polls the [`CancelToken`], so
//! cleanup always happens at a well-defined point instead of wherever the
//! signal happened to interrupt.

use crate::error::Result;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};

/// Signals that trigger teardown in both supervisor and worker.
pub const TERMINATION_SIGNALS: [Signal; 2] = [Signal::SIGINT, Signal::SIGALRM];

/// Token shared with the process-wide signal handler.
static INSTALLED: OnceLock<Arc<AtomicI32>> = OnceLock::new();

extern "C" fn record_signal(signo: libc::c_int) {
    if let Some(flag) = INSTALLED.get() {
        let _ = flag.compare_exchange(0, signo, Ordering::SeqCst, Ordering::SeqCst);
    }
}

/// Cooperative cancellation flag carrying the signal that caused it.
///
/// The first cancellation wins; later ones are ignored.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    signal: Arc<AtomicI32>,
}

impl CancelToken {
    /// A token not connected to any signal handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route [`TERMINATION_SIGNALS`] into the process-wide token and return it.
    ///
    /// Installing more than once returns the same token.
    pub fn install() -> Result<Self> {
        let signal = INSTALLED
            .get_or_init(|| Arc::new(AtomicI32::new(0)))
            .clone();

        let action = SigAction::new(
            SigHandler::Handler(record_signal),
            SaFlags::empty(),
            SigSet::empty(),
        );
        for sig in TERMINATION_SIGNALS {
            // Safety: the handler only performs an atomic store.
            unsafe { sigaction(sig, &action) }?;
        }
        Ok(Self { signal })
    }

    /// Mark the token cancelled by `signal`.
    pub fn cancel(&self, signal: Signal) {
        let _ = self.signal.compare_exchange(
            0,
            signal as i32,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.load(Ordering::SeqCst) != 0
    }

    /// The signal that cancelled this token, if any.
    pub fn signal(&self) -> Option<Signal> {
        match self.signal.load(Ordering::SeqCst) {
            0 => None,
            signo => Signal::try_from(signo).ok(),
        }
    }
}

/// Process exit status used after a signal-driven teardown.
pub fn exit_code(signal: Signal) -> i32 {
    128 + signal as i32
}
