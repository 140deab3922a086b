//! Bounded MPSC ring buffer with priority-aware admission.
//!
//! The ring holds `2·L` slots for a configured limit of `L`: normal-priority
//! alerts are admitted while fewer than `L` slots are in use, critical
//! alerts while fewer than `2·L` are. Under overload the normal tier fills
//! and drops first while critical alerts keep their reserved headroom.
//!
//! ## Slot protocol
//!
//! Each slot cycles `Empty → Reserved → Published → Empty`:
//!
//! 1. A producer reserves the next slot index with a CAS on `write_slot`.
//! 2. It publishes its alert with a CAS of the slot from null to the alert
//!    pointer (acquire/release, so the consumer sees a fully constructed
//!    alert behind a non-null slot).
//! 3. It increments `size`, which is what makes the alert visible to drain.
//! 4. The consumer later exchanges the slot back to null.
//!
//! Step 2 can find the slot still occupied when the ring is near-full and
//! the consumer has reserved-but-not-yet-cleared it; the producer spins a
//! bounded number of times and then yields. Under normal load it succeeds on
//! the first attempt.
//!
//! ## Size estimation
//!
//! Admission computes `real_size` from `write_slot` and `read_slot`, which
//! also counts alerts whose producers have reserved a slot but not yet
//! incremented `size`. `write_slot` is deliberately loaded *before*
//! `read_slot`: a stale pair then over-estimates the queue depth and can
//! only over-reject, never admit an alert that would overflow the ring.
//! Keep that load order.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::alert::{AlertHeader, Priority};
use crate::sync::CachePadded;

/// Spin attempts while publishing into a not-yet-cleared slot before the
/// producer yields the CPU.
pub const SPIN_LIMIT: u32 = 20;

/// Outcome of a successful enqueue.
#[derive(Debug, Clone, Copy)]
pub struct Admitted {
    /// `true` if this alert took the queue from empty to non-empty; the
    /// dispatch core fires the notify callback on that transition.
    pub was_empty: bool,
}

/// Bounded MPSC slot array carrying type-erased alert pointers.
///
/// Producers call [`try_enqueue`](Self::try_enqueue) concurrently; the
/// consumer calls [`drain_into`](Self::drain_into) while producers are
/// excluded by the dispatch core's latch.
pub struct AlertRing {
    /// `2·L` slots, each null or one published alert.
    slots: Box<[AtomicPtr<AlertHeader>]>,
    /// Index of the most recently reserved slot.
    write_slot: CachePadded<AtomicUsize>,
    /// Index of the next slot to drain.
    read_slot: CachePadded<AtomicUsize>,
    /// Published-and-undrained alert count; `0` means drained empty.
    size: CachePadded<AtomicUsize>,
    /// Configured queue limit `L`.
    limit: usize,
}

impl AlertRing {
    /// Creates a ring for queue limit `limit` (capacity `2·limit` slots).
    ///
    /// # Panics
    ///
    /// Panics if `limit` is zero.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        assert!(limit > 0, "queue limit must be > 0");
        let capacity = limit * 2;
        let slots: Vec<AtomicPtr<AlertHeader>> = (0..capacity)
            .map(|_| AtomicPtr::new(std::ptr::null_mut()))
            .collect();
        Self {
            slots: slots.into_boxed_slice(),
            // `write_slot` holds the *last reserved* index, so an empty ring
            // starts one slot behind `read_slot`.
            write_slot: CachePadded::new(AtomicUsize::new(capacity - 1)),
            read_slot: CachePadded::new(AtomicUsize::new(0)),
            size: CachePadded::new(AtomicUsize::new(0)),
            limit,
        }
    }

    /// The configured queue limit `L`.
    #[inline]
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of published, undrained alerts.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Returns `true` if every published alert has been drained.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attempts to admit `alert` at `priority`.
    ///
    /// Returns `None` if the priority's tier is full (backpressure, not an
    /// error). On success the alert pointer is owned by the ring until
    /// drained.
    ///
    /// Bounded: the only waiting is the bounded spin-then-yield on slot
    /// publication.
    pub fn try_enqueue(&self, alert: NonNull<AlertHeader>, priority: Priority) -> Option<Admitted> {
        let capacity = self.slots.len();
        let allowed = self.limit * (1 + priority.tier());

        // Reserve a slot.
        let mut current = self.write_slot.load(Ordering::Acquire);
        let reserved = loop {
            let next = (current + 1) % capacity;

            // `read_slot` loaded after `write_slot`; see the module docs for
            // why this order must be preserved.
            let read = self.read_slot.load(Ordering::Acquire);
            let real_size = if next > read {
                next - read
            } else if next < read {
                capacity - (read - next)
            } else {
                // Reservation caught up with the read cursor: the ring is
                // either completely empty or completely full.
                self.size.load(Ordering::Acquire)
            };

            if real_size >= allowed {
                return None;
            }

            match self
                .write_slot
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break next,
                Err(observed) => current = observed,
            }
        };

        // Publish. The slot may still hold the previous lap's pointer if the
        // consumer reserved it for draining but has not cleared it yet; that
        // window is tiny, so spin briefly, then yield.
        let mut spins = 0u32;
        loop {
            match self.slots[reserved].compare_exchange(
                std::ptr::null_mut(),
                alert.as_ptr(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(_) => {
                    spins += 1;
                    if spins >= SPIN_LIMIT {
                        std::thread::yield_now();
                    } else {
                        std::hint::spin_loop();
                    }
                }
            }
        }

        // Make the alert visible to drain.
        let previous = self.size.fetch_add(1, Ordering::AcqRel);
        Some(Admitted {
            was_empty: previous == 0,
        })
    }

    /// Drains every published alert, in slot order, into `out`.
    ///
    /// Must only run while producers are excluded (the dispatch core holds
    /// its exclusive latch), which guarantees the `size` snapshot covers a
    /// contiguous run of published slots. Returns the number drained.
    pub fn drain_into(&self, out: &mut Vec<NonNull<AlertHeader>>) -> usize {
        let count = self.size.load(Ordering::Acquire);
        let capacity = self.slots.len();
        let mut read = self.read_slot.load(Ordering::Acquire);

        out.reserve(count);
        for _ in 0..count {
            let alert = self.slots[read].swap(std::ptr::null_mut(), Ordering::AcqRel);
            debug_assert!(!alert.is_null(), "drained a published slot twice");
            if let Some(alert) = NonNull::new(alert) {
                out.push(alert);
            }
            read = (read + 1) % capacity;
        }

        self.read_slot.store(read, Ordering::Release);
        self.size.fetch_sub(count, Ordering::AcqRel);
        count
    }

    /// Peeks the next alert to be drained, if one is published.
    ///
    /// Racy by design: a concurrent producer may be mid-publish, in which
    /// case this returns `None` even though `len() > 0`. Callers treat it
    /// as a hint and re-check.
    #[must_use]
    pub fn peek(&self) -> Option<NonNull<AlertHeader>> {
        if self.is_empty() {
            return None;
        }
        let read = self.read_slot.load(Ordering::Acquire);
        NonNull::new(self.slots[read].load(Ordering::Acquire))
    }

    /// Replaces the slot array for a new queue limit.
    ///
    /// Consumer-only, with producers excluded and the ring fully drained —
    /// resizing never migrates alerts.
    pub fn resize(&mut self, limit: usize) {
        assert!(limit > 0, "queue limit must be > 0");
        debug_assert!(self.is_empty(), "resize with undrained alerts");

        let capacity = limit * 2;
        let slots: Vec<AtomicPtr<AlertHeader>> = (0..capacity)
            .map(|_| AtomicPtr::new(std::ptr::null_mut()))
            .collect();
        self.slots = slots.into_boxed_slice();
        self.write_slot.store(capacity - 1, Ordering::Release);
        self.read_slot.store(0, Ordering::Release);
        self.size.store(0, Ordering::Release);
        self.limit = limit;
    }
}

impl std::fmt::Debug for AlertRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertRing")
            .field("limit", &self.limit)
            .field("capacity", &self.slots.len())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertHeader;

    // The ring only moves pointers; tests use dangling-but-distinct header
    // pointers and never dereference them.
    fn fake_alert(token: usize) -> NonNull<AlertHeader> {
        let addr = std::mem::align_of::<AlertHeader>() * (token + 1);
        NonNull::new(addr as *mut AlertHeader).unwrap()
    }

    #[test]
    fn test_empty_ring() {
        let ring = AlertRing::new(4);
        assert_eq!(ring.limit(), 4);
        assert!(ring.is_empty());
        assert!(ring.peek().is_none());
    }

    #[test]
    fn test_normal_tier_caps_at_limit() {
        let ring = AlertRing::new(2);
        assert!(ring.try_enqueue(fake_alert(0), Priority::Normal).is_some());
        assert!(ring.try_enqueue(fake_alert(1), Priority::Normal).is_some());
        // Tier full: the third normal alert is rejected.
        assert!(ring.try_enqueue(fake_alert(2), Priority::Normal).is_none());
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_critical_tier_extends_to_double() {
        let ring = AlertRing::new(2);
        for i in 0..2 {
            assert!(ring.try_enqueue(fake_alert(i), Priority::Normal).is_some());
        }
        for i in 2..4 {
            assert!(ring
                .try_enqueue(fake_alert(i), Priority::Critical)
                .is_some());
        }
        // Both tiers exhausted.
        assert!(ring
            .try_enqueue(fake_alert(4), Priority::Critical)
            .is_none());
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn test_was_empty_reported_once_per_transition() {
        let ring = AlertRing::new(4);
        let first = ring.try_enqueue(fake_alert(0), Priority::Normal).unwrap();
        assert!(first.was_empty);
        let second = ring.try_enqueue(fake_alert(1), Priority::Normal).unwrap();
        assert!(!second.was_empty);

        let mut batch = Vec::new();
        assert_eq!(ring.drain_into(&mut batch), 2);

        let again = ring.try_enqueue(fake_alert(2), Priority::Normal).unwrap();
        assert!(again.was_empty);
    }

    #[test]
    fn test_drain_preserves_slot_order() {
        let ring = AlertRing::new(4);
        let alerts: Vec<_> = (0..3).map(fake_alert).collect();
        for &alert in &alerts {
            ring.try_enqueue(alert, Priority::Normal).unwrap();
        }

        let mut batch = Vec::new();
        ring.drain_into(&mut batch);
        assert_eq!(batch, alerts);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_admission_reopens_after_drain() {
        let ring = AlertRing::new(2);
        for i in 0..2 {
            ring.try_enqueue(fake_alert(i), Priority::Normal).unwrap();
        }
        assert!(ring.try_enqueue(fake_alert(9), Priority::Normal).is_none());

        let mut batch = Vec::new();
        ring.drain_into(&mut batch);

        assert!(ring.try_enqueue(fake_alert(3), Priority::Normal).is_some());
    }

    #[test]
    fn test_wraparound_many_laps() {
        let ring = AlertRing::new(2);
        let mut batch = Vec::new();
        for lap in 0..25 {
            for i in 0..2 {
                ring.try_enqueue(fake_alert(lap * 2 + i), Priority::Normal)
                    .unwrap();
            }
            batch.clear();
            assert_eq!(ring.drain_into(&mut batch), 2);
            assert_eq!(batch[0], fake_alert(lap * 2));
            assert_eq!(batch[1], fake_alert(lap * 2 + 1));
        }
    }

    #[test]
    fn test_peek_returns_front() {
        let ring = AlertRing::new(4);
        ring.try_enqueue(fake_alert(7), Priority::Normal).unwrap();
        ring.try_enqueue(fake_alert(8), Priority::Normal).unwrap();
        assert_eq!(ring.peek(), Some(fake_alert(7)));
        // Peek does not consume.
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_resize_resets_cursors() {
        let mut ring = AlertRing::new(2);
        ring.try_enqueue(fake_alert(0), Priority::Normal).unwrap();
        let mut batch = Vec::new();
        ring.drain_into(&mut batch);

        ring.resize(8);
        assert_eq!(ring.limit(), 8);
        for i in 0..8 {
            assert!(ring.try_enqueue(fake_alert(i), Priority::Normal).is_some());
        }
        assert!(ring.try_enqueue(fake_alert(8), Priority::Normal).is_none());
    }

    #[test]
    fn test_concurrent_producers_bounded_admission() {
        use std::sync::atomic::AtomicUsize;
        use std::sync::Arc;
        use std::thread;

        // Property 1: with no consumer, admitted normal-priority count never
        // exceeds L for any interleaving.
        const LIMIT: usize = 16;
        const PRODUCERS: usize = 8;
        const PER_THREAD: usize = 200;

        let ring = Arc::new(AlertRing::new(LIMIT));
        let admitted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let ring = Arc::clone(&ring);
                let admitted = Arc::clone(&admitted);
                thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        let alert = fake_alert(p * PER_THREAD + i);
                        if ring.try_enqueue(alert, Priority::Normal).is_some() {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(admitted.load(Ordering::SeqCst) <= LIMIT);
        assert_eq!(ring.len(), admitted.load(Ordering::SeqCst));
    }

    #[test]
    fn test_concurrent_no_lost_no_duplicate() {
        use std::collections::HashSet;
        use std::sync::Arc;
        use std::thread;

        // Properties 3 & 4: the drained multiset equals the admitted
        // multiset, with no duplicates. Producers stop while we drain, which
        // matches the latch exclusion the dispatch core provides.
        const PRODUCERS: usize = 4;
        const PER_THREAD: usize = 500;
        const ROUNDS: usize = 4;

        let ring = Arc::new(AlertRing::new(8));

        for round in 0..ROUNDS {
            let handles: Vec<_> = (0..PRODUCERS)
                .map(|p| {
                    let ring = Arc::clone(&ring);
                    thread::spawn(move || {
                        let mut mine = Vec::new();
                        for i in 0..PER_THREAD {
                            let token = (round * PRODUCERS + p) * PER_THREAD + i;
                            let alert = fake_alert(token);
                            if ring.try_enqueue(alert, Priority::Normal).is_some() {
                                mine.push(alert.as_ptr() as usize);
                            }
                        }
                        mine
                    })
                })
                .collect();

            let mut admitted: Vec<usize> = Vec::new();
            for handle in handles {
                admitted.extend(handle.join().unwrap());
            }

            let mut drained = Vec::new();
            ring.drain_into(&mut drained);
            assert!(ring.is_empty());

            let drained_set: HashSet<usize> =
                drained.iter().map(|p| p.as_ptr() as usize).collect();
            assert_eq!(drained_set.len(), drained.len(), "duplicate delivery");
            let admitted: HashSet<usize> = admitted.into_iter().collect();
            assert_eq!(drained_set, admitted, "lost or phantom alert");
        }
    }
}
