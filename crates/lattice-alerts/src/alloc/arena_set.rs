//! Triple-buffered scratch arenas, one set per producer thread.
//!
//! A producer always writes into `arena[g]` where `g` is the set's current
//! generation. At each drain the consumer rotates every dirty set: it resets
//! `arena[(g + 1) % 3]` and then publishes `g + 1` as the new generation.
//!
//! The two-generation gap this creates is the whole point of using three
//! arenas: alerts still sitting in the ring (or in the batch the client is
//! reading) reference the previous generation, and that arena is not reset
//! until the rotation *after* those alerts have been drained and released.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::ScratchArena;
use crate::sync::lock;

/// Number of arenas per producer thread. Exactly three: one being written,
/// one holding payloads of in-flight alerts, one holding payloads of the
/// batch the client is still reading.
pub const GENERATIONS: usize = 3;

/// Identifies the arena an alert's payload handles resolve against:
/// the owning thread's registry slot plus the generation that was current
/// when the alert was constructed.
///
/// This is a back-reference, not ownership — alerts never keep arenas
/// alive, which keeps teardown cycle-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaId {
    pub(crate) slot: u32,
    pub(crate) generation: u8,
}

/// Three scratch arenas and an atomic generation index.
///
/// # Thread Safety
///
/// - [`Self::current`] is called only by the owning producer thread, under
///   the dispatch core's shared latch.
/// - [`Self::rotate`] is called only by the consumer. It may run while the
///   owner is mid-write: the owner keeps using the arena it loaded before
///   the rotation, and the arena being reset is the one *after* it, which
///   holds no live payloads.
/// - [`Self::arena`] read-only views are taken by the consumer for
///   generations that are at least one rotation old.
pub struct ThreadArenaSet {
    arenas: [UnsafeCell<ScratchArena>; GENERATIONS],
    generation: AtomicUsize,
    slot: u32,
}

// SAFETY: concurrent access follows the generation protocol documented
// above — the owner writes only arena[g], the consumer resets only
// arena[g + 1] before publishing it, and reads only generations that no
// longer receive writes.
unsafe impl Send for ThreadArenaSet {}
unsafe impl Sync for ThreadArenaSet {}

impl ThreadArenaSet {
    fn new(slot: u32) -> Self {
        Self {
            arenas: [
                UnsafeCell::new(ScratchArena::new()),
                UnsafeCell::new(ScratchArena::new()),
                UnsafeCell::new(ScratchArena::new()),
            ],
            generation: AtomicUsize::new(0),
            slot,
        }
    }

    /// Registry slot of this set, stable for the set's lifetime.
    #[inline]
    #[must_use]
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// The generation producers are currently writing into.
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u8 {
        #[allow(clippy::cast_possible_truncation)] // always < GENERATIONS
        {
            self.generation.load(Ordering::Acquire) as u8
        }
    }

    /// Returns the current arena for writing.
    ///
    /// # Safety
    ///
    /// Only the owning thread may call this, with the shared latch held,
    /// and the returned reference must not outlive the latch hold. At most
    /// one live reference at a time.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn current(&self) -> &mut ScratchArena {
        let g = self.generation.load(Ordering::Acquire);
        &mut *self.arenas[g].get()
    }

    /// Returns a read-only view of the arena at `generation`.
    ///
    /// # Safety
    ///
    /// `generation` must be at least one rotation old, so the owner is not
    /// writing into it, and the reference must be dropped before the arena
    /// can come up for reset (two rotations after the alert referencing it
    /// was drained).
    pub(crate) unsafe fn arena(&self, generation: u8) -> &ScratchArena {
        debug_assert!((generation as usize) < GENERATIONS);
        &*self.arenas[generation as usize % GENERATIONS].get()
    }

    /// Advances the generation if the current arena has been written to.
    ///
    /// Consumer-only. Resets the *next* arena before publishing it, so the
    /// owner observes either the old generation (and keeps writing the old
    /// arena) or the new generation with a clean arena — never a torn state.
    pub(crate) fn rotate(&self) {
        let g = self.generation.load(Ordering::Acquire);

        // SAFETY: only the dirty flag (a relaxed atomic) of the arena the
        // owner may be writing is read here; a stale answer merely skips or
        // performs one extra rotation, both of which preserve the
        // generation gap.
        let dirty = unsafe { (*self.arenas[g].get()).is_dirty() };
        if !dirty {
            return;
        }

        let next = (g + 1) % GENERATIONS;
        // SAFETY: arena[next] holds payloads drained two rotations ago;
        // nothing references them any more and the owner does not write it
        // until the store below is visible.
        unsafe { (*self.arenas[next].get()).reset() };

        self.generation.store(next, Ordering::Release);
    }
}

/// Registry of every producer thread's arena set, owned by the dispatch
/// core.
///
/// Sets are registered lazily the first time a thread posts and live until
/// the core is torn down; slots are never reused, so an [`ArenaId`] stays
/// resolvable for the core's lifetime.
#[derive(Default)]
pub struct ArenaRegistry {
    sets: Mutex<Vec<Arc<ThreadArenaSet>>>,
}

impl ArenaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new arena set and returns it.
    ///
    /// Called from producer threads (under the shared latch); the mutex only
    /// serializes first-post registration, never steady-state posting.
    #[must_use]
    pub fn register(&self) -> Arc<ThreadArenaSet> {
        let mut sets = lock(&self.sets);
        let slot = u32::try_from(sets.len()).expect("arena registry overflow");
        let set = Arc::new(ThreadArenaSet::new(slot));
        sets.push(Arc::clone(&set));
        set
    }

    /// Rotates every registered set. Consumer-only, under the exclusive
    /// latch.
    pub fn rotate_all(&self) {
        for set in lock(&self.sets).iter() {
            set.rotate();
        }
    }

    /// Number of registered producer threads.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.sets).len()
    }

    /// Returns `true` if no producer has registered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves the bytes behind an [`ArenaId`] + offset handle.
    ///
    /// # Safety
    ///
    /// Consumer-only. The alert carrying the handle must have been drained
    /// in the current batch, so the generation invariant guarantees the
    /// arena is neither written nor reset while the returned slice is live.
    pub(crate) unsafe fn resolve_bytes<'a>(
        &'a self,
        id: ArenaId,
        slice: super::ArenaSlice,
    ) -> &'a [u8] {
        let sets = lock(&self.sets);
        let set = &sets[id.slot as usize];
        let arena = set.arena(id.generation);
        let bytes = arena.bytes(slice);
        // SAFETY: the arena's buffer is stable for the caller-guaranteed
        // window (no writes target an old generation, reset is two
        // rotations away) and is owned by an Arc the registry never drops,
        // so detaching the borrow from the mutex guard is sound.
        std::slice::from_raw_parts(bytes.as_ptr(), bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dirty_current(set: &ThreadArenaSet) -> ArenaId {
        let generation = set.generation();
        // SAFETY: single-threaded test, one live reference.
        unsafe { set.current() }.stash_bytes(b"payload");
        ArenaId {
            slot: set.slot(),
            generation,
        }
    }

    #[test]
    fn test_rotate_skips_clean_arena() {
        let registry = ArenaRegistry::new();
        let set = registry.register();
        assert_eq!(set.generation(), 0);
        set.rotate();
        assert_eq!(set.generation(), 0);
    }

    #[test]
    fn test_rotate_advances_dirty_arena() {
        let registry = ArenaRegistry::new();
        let set = registry.register();
        dirty_current(&set);
        set.rotate();
        assert_eq!(set.generation(), 1);
        // New current arena is clean.
        // SAFETY: single-threaded test.
        assert!(!unsafe { set.current() }.is_dirty());
    }

    #[test]
    fn test_generation_wraps_after_three() {
        let registry = ArenaRegistry::new();
        let set = registry.register();
        for expected in [1, 2, 0, 1] {
            dirty_current(&set);
            set.rotate();
            assert_eq!(usize::from(set.generation()), expected);
        }
    }

    #[test]
    fn test_two_generation_gap() {
        let registry = ArenaRegistry::new();
        let set = registry.register();

        let generation = set.generation();
        // SAFETY: single-threaded test.
        let handle = unsafe { set.current() }.stash_bytes(b"survivor");
        let id = ArenaId {
            slot: set.slot(),
            generation,
        };

        // One rotation: the payload's arena must still be intact.
        set.rotate();
        dirty_current(&set);
        // SAFETY: generation `id.generation` is one rotation old.
        assert_eq!(unsafe { registry.resolve_bytes(id, handle) }, b"survivor");

        // Two more rotations bring the original arena up for reset.
        set.rotate();
        dirty_current(&set);
        set.rotate();
        // SAFETY: single-threaded test.
        assert!(unsafe { set.arena(id.generation) }.is_empty());
    }

    #[test]
    fn test_registry_assigns_dense_slots() {
        let registry = ArenaRegistry::new();
        let a = registry.register();
        let b = registry.register();
        assert_eq!(a.slot(), 0);
        assert_eq!(b.slot(), 1);
        assert_eq!(registry.len(), 2);
    }
}
