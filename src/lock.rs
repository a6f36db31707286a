//! N-process mutual exclusion over shared memory.
//!
//! A generalization of Peterson's two-process algorithm: a round-robin
//! `turn` token picks the favored participant, and every entrant re-checks
//! that nobody else made it into the critical section before proceeding.
//! No read-modify-write instructions are used; every access is a plain
//! sequentially-consistent load or store on the shared mapping.
//!
//! ```text
//!   IDLE ──acquire──▶ WANT_IN ──token reaches id──▶ IN_CS ──release──▶ IDLE
//!                        ▲                             │
//!                        └────── re-check failed ──────┘
//! ```
//!
//! # Limitations
//!
//! Waiting is bounded only while every holder eventually releases. A
//! participant killed inside the critical section leaves its flag set and
//! everyone else spins forever; there is no timeout or recovery. Entry order
//! is not FIFO: the release scan hands the token to the next non-idle index,
//! not to the earliest requester.

use crate::cancel::CancelToken;
use crate::error::{PalinError, Result};
use crate::shm::Shareable;
use std::hint;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// Most participants a lock can hold.
pub const MAX_PARTICIPANTS: usize = 20;

/// Spins between yields while waiting for the token.
const SPINS_BEFORE_YIELD: u32 = 1024;

/// Per-participant protocol state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagState {
    Idle = 0,
    WantIn = 1,
    InCriticalSection = 2,
}

impl FlagState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            2 => Self::InCriticalSection,
            _ => Self::WantIn,
        }
    }
}

/// Lock state living in a shared segment.
#[repr(C)]
#[derive(Debug)]
pub struct LockState {
    /// Highest participant index (pool size − 1).
    participants: AtomicUsize,
    turn: AtomicUsize,
    flags: [AtomicU8; MAX_PARTICIPANTS],
}

unsafe impl Shareable for LockState {}

impl LockState {
    /// A zeroed lock on the heap, for use outside shared memory.
    pub fn boxed() -> Box<Self> {
        Box::new(Self {
            participants: AtomicUsize::new(0),
            turn: AtomicUsize::new(0),
            flags: std::array::from_fn(|_| AtomicU8::new(FlagState::Idle as u8)),
        })
    }

    /// Reset the lock for `pool_size` participants: turn 0, every flag idle.
    ///
    /// Must run before any participant attaches.
    pub fn initialize(&self, pool_size: usize) -> Result<()> {
        if pool_size == 0 || pool_size > MAX_PARTICIPANTS {
            return Err(PalinError::Config(format!(
                "lock supports 1 to {} participants, got {}",
                MAX_PARTICIPANTS, pool_size
            )));
        }
        for flag in &self.flags {
            flag.store(FlagState::Idle as u8, Ordering::SeqCst);
        }
        self.turn.store(0, Ordering::SeqCst);
        self.participants.store(pool_size - 1, Ordering::SeqCst);
        Ok(())
    }

    /// Stored participant count, i.e. the highest valid index.
    pub fn participant_count(&self) -> usize {
        self.participants.load(Ordering::SeqCst)
    }

    /// Number of indices the token cycles through.
    fn ring_len(&self) -> usize {
        self.participant_count() + 1
    }

    pub fn turn(&self) -> usize {
        self.turn.load(Ordering::SeqCst)
    }

    pub fn flag(&self, index: usize) -> FlagState {
        FlagState::from_raw(self.flags[index].load(Ordering::SeqCst))
    }

    /// How many flags currently read IN_CS.
    ///
    /// A contender briefly sets its flag before re-checking, so this can
    /// exceed one while the protocol is still correct.
    #[cfg(test)]
    pub fn holders(&self) -> usize {
        (0..self.ring_len())
            .filter(|&i| self.flag(i) == FlagState::InCriticalSection)
            .count()
    }

    /// Handle for participant `id` (0-based).
    pub fn participant(&self, id: usize) -> Result<Participant<'_>> {
        let count = self.ring_len();
        if id >= count {
            return Err(PalinError::Participant { id, count });
        }
        Ok(Participant { state: self, id })
    }

    fn set_flag(&self, index: usize, state: FlagState) {
        self.flags[index].store(state as u8, Ordering::SeqCst);
    }

    fn another_holder(&self, id: usize) -> bool {
        (0..self.ring_len()).any(|j| j != id && self.flag(j) == FlagState::InCriticalSection)
    }
}

/// One participant's view of a [`LockState`].
#[derive(Debug, Clone, Copy)]
pub struct Participant<'a> {
    state: &'a LockState,
    id: usize,
}

impl<'a> Participant<'a> {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Busy-wait for the critical section.
    ///
    /// Returns `None`, with this participant's flag back at idle, if `cancel`
    /// fires while waiting. The token is polled once per spin iteration.
    pub fn acquire(&self, cancel: &CancelToken) -> Option<CriticalSection<'a>> {
        let state = self.state;
        let n = state.ring_len();
        let mut spins = 0u32;

        loop {
            if cancel.is_cancelled() {
                state.set_flag(self.id, FlagState::Idle);
                return None;
            }
            state.set_flag(self.id, FlagState::WantIn);

            let mut j = state.turn();
            while j != self.id {
                if cancel.is_cancelled() {
                    state.set_flag(self.id, FlagState::Idle);
                    return None;
                }
                j = if state.flag(j) != FlagState::Idle {
                    state.turn()
                } else {
                    (j + 1) % n
                };
                backoff(&mut spins);
            }

            state.set_flag(self.id, FlagState::InCriticalSection);

            if !state.another_holder(self.id) {
                let turn = state.turn();
                if turn == self.id || state.flag(turn) == FlagState::Idle {
                    break;
                }
            }
            backoff(&mut spins);
        }

        state.turn.store(self.id, Ordering::SeqCst);
        Some(CriticalSection {
            state,
            id: self.id,
        })
    }
}

fn backoff(spins: &mut u32) {
    *spins += 1;
    if *spins >= SPINS_BEFORE_YIELD {
        *spins = 0;
        std::thread::yield_now();
    } else {
        hint::spin_loop();
    }
}

/// Proof of holding the critical section; releases on drop.
#[must_use = "dropping the guard releases the critical section immediately"]
#[derive(Debug)]
pub struct CriticalSection<'a> {
    state: &'a LockState,
    id: usize,
}

impl CriticalSection<'_> {
    /// Hand the token to the next waiting participant and go idle.
    pub fn release(self) {
        // Drop does the work.
    }
}

impl Drop for CriticalSection<'_> {
    fn drop(&mut self) {
        let state = self.state;
        let n = state.ring_len();

        // Our own flag is still set, so the scan always terminates.
        let mut j = (state.turn() + 1) % n;
        while state.flag(j) == FlagState::Idle {
            j = (j + 1) % n;
        }
        state.turn.store(j, Ordering::SeqCst);
        state.set_flag(self.id, FlagState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::SharedSegment;
    use crate::shm::tests::unique_name;
    use nix::sys::signal::Signal;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    fn lock_for(pool_size: usize) -> Box<LockState> {
        let lock = LockState::boxed();
        lock.initialize(pool_size).unwrap();
        lock
    }

    #[test]
    fn test_initialize_sets_count_and_idles_flags() {
        let lock = LockState::boxed();
        lock.set_flag(3, FlagState::WantIn);
        lock.turn.store(3, Ordering::SeqCst);

        lock.initialize(5).unwrap();
        assert_eq!(lock.participant_count(), 4);
        assert_eq!(lock.turn(), 0);
        assert!((0..MAX_PARTICIPANTS).all(|i| lock.flag(i) == FlagState::Idle));
    }

    #[test]
    fn test_initialize_rejects_bad_sizes() {
        let lock = LockState::boxed();
        assert!(lock.initialize(0).is_err());
        assert!(lock.initialize(MAX_PARTICIPANTS + 1).is_err());
        assert!(lock.initialize(MAX_PARTICIPANTS).is_ok());
    }

    #[test]
    fn test_participant_out_of_range() {
        let lock = lock_for(3);
        assert!(lock.participant(2).is_ok());
        assert!(matches!(
            lock.participant(3),
            Err(PalinError::Participant { id: 3, count: 3 })
        ));
    }

    #[test]
    fn test_uncontended_acquire_and_release() {
        let lock = lock_for(3);
        let p = lock.participant(1).unwrap();
        let cancel = CancelToken::new();

        let guard = p.acquire(&cancel).expect("uncontended acquire");
        assert_eq!(lock.flag(1), FlagState::InCriticalSection);
        assert_eq!(lock.turn(), 1);
        assert_eq!(lock.holders(), 1);

        guard.release();
        assert_eq!(lock.flag(1), FlagState::Idle);
        assert_eq!(lock.holders(), 0);
        // Nobody else waiting: the token stays on the last active participant.
        assert_eq!(lock.turn(), 1);
    }

    #[test]
    fn test_release_hands_turn_to_next_waiter() {
        let lock = lock_for(4);
        let cancel = CancelToken::new();
        // Participant 2 announces interest but hasn't been scheduled yet.
        lock.set_flag(2, FlagState::WantIn);

        let guard = lock.participant(0).unwrap().acquire(&cancel).unwrap();
        drop(guard);
        assert_eq!(lock.turn(), 2);
        assert_eq!(lock.flag(0), FlagState::Idle);
    }

    #[test]
    fn test_release_scan_wraps_around() {
        let lock = lock_for(4);
        let cancel = CancelToken::new();
        lock.set_flag(0, FlagState::WantIn);
        lock.turn.store(3, Ordering::SeqCst);

        // Participant 3 holds the token, so it enters immediately.
        let guard = lock.participant(3).unwrap().acquire(&cancel).unwrap();
        drop(guard);
        assert_eq!(lock.turn(), 0);
    }

    #[test]
    fn test_cancelled_token_never_enters() {
        let lock = lock_for(2);
        let cancel = CancelToken::new();
        cancel.cancel(Signal::SIGINT);

        assert!(lock.participant(0).unwrap().acquire(&cancel).is_none());
        assert_eq!(lock.flag(0), FlagState::Idle);
    }

    #[test]
    fn test_cancel_while_waiting_resets_flag() {
        let lock = Arc::new(lock_for(2));
        let free = CancelToken::new();
        let guard = lock.participant(0).unwrap().acquire(&free).unwrap();

        let cancel = CancelToken::new();
        let waiter = {
            let lock = Arc::clone(&lock);
            let cancel = cancel.clone();
            thread::spawn(move || lock.participant(1).unwrap().acquire(&cancel).is_some())
        };

        // Let the waiter start spinning, then cancel it.
        while lock.flag(1) == FlagState::Idle {
            thread::yield_now();
        }
        cancel.cancel(Signal::SIGALRM);
        assert!(!waiter.join().unwrap());
        assert_eq!(lock.flag(1), FlagState::Idle);
        drop(guard);
    }

    #[test]
    fn test_waiter_enters_after_holder_releases() {
        let lock = Arc::new(lock_for(2));
        let cancel = CancelToken::new();
        let guard = lock.participant(0).unwrap().acquire(&cancel).unwrap();

        let entered = Arc::new(AtomicBool::new(false));
        let waiter = {
            let lock = Arc::clone(&lock);
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                let cancel = CancelToken::new();
                let _guard = lock.participant(1).unwrap().acquire(&cancel).unwrap();
                entered.store(true, Ordering::SeqCst);
            })
        };

        while lock.flag(1) == FlagState::Idle {
            thread::yield_now();
        }
        assert!(!entered.load(Ordering::SeqCst));
        drop(guard);
        waiter.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
        assert_eq!(lock.holders(), 0);
    }

    #[test]
    fn test_mutual_exclusion_under_contention() {
        const PARTICIPANTS: usize = 6;
        const ROUNDS: usize = 300;

        let lock = Arc::new(lock_for(PARTICIPANTS));
        let inside = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..PARTICIPANTS)
            .map(|id| {
                let lock = Arc::clone(&lock);
                let inside = Arc::clone(&inside);
                let total = Arc::clone(&total);
                thread::spawn(move || {
                    let cancel = CancelToken::new();
                    let p = lock.participant(id).unwrap();
                    for _ in 0..ROUNDS {
                        let guard = p.acquire(&cancel).unwrap();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        total.fetch_add(1, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        guard.release();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(total.load(Ordering::SeqCst), PARTICIPANTS * ROUNDS);
        assert_eq!(lock.holders(), 0);
    }

    #[test]
    fn test_lock_in_shared_segment() {
        let name = unique_name("lock");
        let owner = SharedSegment::<LockState>::create(&name).unwrap();
        owner.get().unwrap().initialize(3).unwrap();

        let other =
            SharedSegment::<LockState>::attach(&name, crate::shm::Access::ReadWrite).unwrap();
        let cancel = CancelToken::new();
        let guard = other.get().unwrap().participant(2).unwrap().acquire(&cancel).unwrap();

        // The owner's mapping observes the holder through shared memory.
        assert_eq!(owner.get().unwrap().flag(2), FlagState::InCriticalSection);
        assert_eq!(owner.get().unwrap().turn(), 2);
        drop(guard);
        assert_eq!(owner.get().unwrap().holders(), 0);
    }
}
