//! palin - supervised worker pool around a shared-memory N-process mutex.
//!
//! A supervisor loads text records into a shared segment, then keeps a pool
//! of worker processes running. Each worker takes turns in a critical section
//! guarded by a generalized Peterson lock living in a second shared segment,
//! classifies its record as a palindrome or not, and appends the result to
//! `palin.out` or `nopalin.out`.

pub mod cancel;
pub mod classify;
pub mod cli;
pub mod error;
pub mod lock;
pub mod logging;
pub mod outcome;
pub mod pool;
pub mod records;
pub mod shm;

pub use error::{PalinError, Result};
