//! Producer/consumer latch — shared for posting, exclusive for drain.
//!
//! Producers vastly outnumber the consumer and must not serialize against
//! each other: acquiring the latch in shared mode is one atomic add plus one
//! atomic load. The fallback mutex is touched only while an exclusive holder
//! is pending or active, so in the steady state no producer ever blocks on a
//! mutex.
//!
//! # States
//!
//! ```text
//! Idle ──shared──► Shared(k) ──last release──► Idle
//! Idle ──exclusive──► ExclusivePending ──shared drained──► Exclusive ──► Idle
//! ```
//!
//! Writer starvation is bounded: once `exclusive` is observed, new shared
//! acquirers queue on the fallback mutex instead of racing the writer.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::lock;

/// Shared/exclusive latch biased toward concurrent shared holders.
///
/// Shared mode is held by producers for the duration of a single post;
/// exclusive mode is held by the consumer while it performs structural
/// maintenance (batch release, resize, arena rotation).
#[derive(Debug, Default)]
pub struct Latch {
    /// Number of active shared holders.
    shared: AtomicU32,
    /// Set while an exclusive holder is pending or active.
    exclusive: AtomicBool,
    /// Fallback: shared acquirers queue here while `exclusive` is set; the
    /// exclusive holder owns it for its whole critical section.
    fallback: Mutex<()>,
}

impl Latch {
    /// Creates an idle latch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the latch in shared mode.
    ///
    /// Fast path: one `fetch_add` plus one load. If an exclusive holder is
    /// pending, the increment is undone and the caller queues on the
    /// fallback mutex so the writer can make progress.
    ///
    /// All latch atomics are `SeqCst`: the shared increment must be globally
    /// ordered against the exclusive flag store (Dekker pairing), otherwise
    /// a producer and the drain thread could each miss the other's entry.
    pub fn acquire_shared(&self) -> SharedGuard<'_> {
        self.shared.fetch_add(1, Ordering::SeqCst);

        if self.exclusive.load(Ordering::SeqCst) {
            // Back off and queue behind the exclusive holder.
            self.shared.fetch_sub(1, Ordering::SeqCst);
            let _queued = lock(&self.fallback);
            self.shared.fetch_add(1, Ordering::SeqCst);
        }

        SharedGuard { latch: self }
    }

    /// Acquires the latch in exclusive mode, waiting for all shared holders
    /// to release.
    ///
    /// Holds the fallback mutex for the whole exclusive section, which
    /// diverts new shared acquirers into the queue.
    pub fn acquire_exclusive(&self) -> ExclusiveGuard<'_> {
        let permit = lock(&self.fallback);
        self.exclusive.store(true, Ordering::SeqCst);

        while self.shared.load(Ordering::SeqCst) > 0 {
            std::thread::yield_now();
        }

        ExclusiveGuard {
            latch: self,
            _permit: permit,
        }
    }

    /// Returns the number of active shared holders (test/debug aid).
    #[must_use]
    pub fn shared_holders(&self) -> u32 {
        self.shared.load(Ordering::SeqCst)
    }
}

/// RAII guard for a shared hold; releases on drop.
#[must_use]
pub struct SharedGuard<'a> {
    latch: &'a Latch,
}

impl Drop for SharedGuard<'_> {
    fn drop(&mut self) {
        self.latch.shared.fetch_sub(1, Ordering::SeqCst);
    }
}

/// RAII guard for the exclusive hold; releases on drop.
#[must_use]
pub struct ExclusiveGuard<'a> {
    latch: &'a Latch,
    _permit: MutexGuard<'a, ()>,
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        // Clear the flag before `_permit` unlocks the fallback mutex, so a
        // queued shared acquirer that wins the mutex re-checks a clean flag.
        self.latch.exclusive.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_shared_holders_counted() {
        let latch = Latch::new();
        let a = latch.acquire_shared();
        let b = latch.acquire_shared();
        assert_eq!(latch.shared_holders(), 2);
        drop(a);
        drop(b);
        assert_eq!(latch.shared_holders(), 0);
    }

    #[test]
    fn test_exclusive_waits_for_shared() {
        let latch = Arc::new(Latch::new());
        let latch2 = Arc::clone(&latch);
        let released = Arc::new(AtomicBool::new(false));
        let released2 = Arc::clone(&released);

        let shared = latch.acquire_shared();

        let writer = thread::spawn(move || {
            let _excl = latch2.acquire_exclusive();
            // Must not run until the shared guard is gone.
            assert!(released2.load(Ordering::SeqCst));
        });

        thread::sleep(Duration::from_millis(20));
        released.store(true, Ordering::SeqCst);
        drop(shared);
        writer.join().unwrap();
    }

    #[test]
    fn test_no_shared_during_exclusive() {
        // Property 8: no producer is in its critical section while the
        // exclusive holder is active.
        let latch = Arc::new(Latch::new());
        let in_critical = Arc::new(AtomicUsize::new(0));
        let iterations = 200;

        let mut handles = Vec::new();
        for _ in 0..4 {
            let latch = Arc::clone(&latch);
            let in_critical = Arc::clone(&in_critical);
            handles.push(thread::spawn(move || {
                for _ in 0..iterations {
                    let _shared = latch.acquire_shared();
                    in_critical.fetch_add(1, Ordering::SeqCst);
                    std::hint::spin_loop();
                    in_critical.fetch_sub(1, Ordering::SeqCst);
                }
            }));
        }

        for _ in 0..iterations {
            let _excl = latch.acquire_exclusive();
            assert_eq!(in_critical.load(Ordering::SeqCst), 0);
        }

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_shared_queues_behind_pending_exclusive() {
        let latch = Arc::new(Latch::new());
        let excl = latch.acquire_exclusive();

        let latch2 = Arc::clone(&latch);
        let entered = Arc::new(AtomicBool::new(false));
        let entered2 = Arc::clone(&entered);
        let reader = thread::spawn(move || {
            let _shared = latch2.acquire_shared();
            entered2.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(20));
        assert!(!entered.load(Ordering::SeqCst));
        drop(excl);
        reader.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
    }
}
