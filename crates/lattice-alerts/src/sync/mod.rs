//! Synchronization primitives for the dispatch core.
//!
//! - [`CachePadded`] — 64-byte-aligned wrapper preventing false sharing of
//!   the ring-buffer counters
//! - [`Latch`] — shared/exclusive latch biased toward many concurrent
//!   shared holders (producers), with a mutex fallback for the rare
//!   exclusive (drain) phase

mod latch;
mod padded;

pub use latch::{ExclusiveGuard, Latch, SharedGuard};
pub use padded::CachePadded;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering from poisoning.
///
/// Nothing guarded by these mutexes is left in an inconsistent state by a
/// panicking holder, so the poison flag is ignored.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
