//! Scratch arena for variable-length alert payloads.
//!
//! Alerts carry fixed-size payloads through the ring buffer; anything
//! variable-length (peer endpoints, error text, piece data) is bump-allocated
//! into the posting thread's current [`ScratchArena`] and referenced by
//! offset. Offsets survive arena growth (the backing buffer may reallocate),
//! which is why alerts never store pointers into the arena.

use std::sync::atomic::{AtomicBool, Ordering};

/// Handle to a byte range stashed in a [`ScratchArena`].
///
/// Resolved against the owning arena via [`ScratchArena::bytes`]. The handle
/// stays valid until the arena is reset, which the dispatch core defers
/// until the referencing alerts have been drained and released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaSlice {
    offset: u32,
    len: u32,
}

impl ArenaSlice {
    /// Length of the referenced range in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Returns `true` if the referenced range is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Handle to a UTF-8 string stashed in a [`ScratchArena`].
///
/// Created only by [`ScratchArena::stash_str`], so the referenced bytes are
/// always valid UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStr(pub(crate) ArenaSlice);

impl ArenaStr {
    /// Length of the string in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the string is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Append-only bump allocator handing out offsets into a growable region.
///
/// Not thread-safe: each producer thread owns its arenas through a
/// [`ThreadArenaSet`](super::ThreadArenaSet) and writes only under the
/// dispatch core's shared latch. The one exception is the `dirty` flag,
/// which the consumer may read concurrently while deciding whether to
/// rotate — hence the relaxed atomic.
#[derive(Debug, Default)]
pub struct ScratchArena {
    buf: Vec<u8>,
    dirty: AtomicBool,
}

impl ScratchArena {
    /// Creates an empty arena. The backing buffer grows on demand.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            dirty: AtomicBool::new(false),
        }
    }

    /// Reserves `bytes` bytes at an offset rounded up to `align`, growing
    /// the backing buffer geometrically if needed. Returns the offset.
    ///
    /// Alignment applies to offsets within the region, which is what matters
    /// for the offset arithmetic alerts perform; the region base itself has
    /// byte alignment.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two or the arena would exceed
    /// `u32::MAX` bytes.
    pub fn alloc(&mut self, bytes: usize, align: usize) -> u32 {
        assert!(align.is_power_of_two(), "alignment must be a power of two");

        let offset = (self.buf.len() + align - 1) & !(align - 1);
        let end = offset + bytes;
        assert!(
            u32::try_from(end).is_ok(),
            "scratch arena exceeds addressable range"
        );

        self.buf.resize(end, 0);
        self.dirty.store(true, Ordering::Relaxed);

        #[allow(clippy::cast_possible_truncation)] // bounded by the assert above
        {
            offset as u32
        }
    }

    /// Copies `data` into the arena and returns a handle to it.
    pub fn stash_bytes(&mut self, data: &[u8]) -> ArenaSlice {
        let offset = self.alloc(data.len(), 1);
        self.buf[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        #[allow(clippy::cast_possible_truncation)] // alloc() bounds the arena to u32
        ArenaSlice {
            offset,
            len: data.len() as u32,
        }
    }

    /// Copies `text` into the arena and returns a string handle to it.
    pub fn stash_str(&mut self, text: &str) -> ArenaStr {
        ArenaStr(self.stash_bytes(text.as_bytes()))
    }

    /// Resolves a handle to the stashed bytes.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not lie within this arena (a handle from a
    /// different arena or generation).
    #[must_use]
    pub fn bytes(&self, slice: ArenaSlice) -> &[u8] {
        &self.buf[slice.offset as usize..slice.offset as usize + slice.len()]
    }

    /// Resolves a string handle to the stashed text.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not lie within this arena.
    #[must_use]
    pub fn text(&self, text: ArenaStr) -> &str {
        let raw = self.bytes(text.0);
        // SAFETY: `ArenaStr` handles are only produced by `stash_str`, which
        // copies valid UTF-8, and arena contents are stable until `reset`.
        unsafe { std::str::from_utf8_unchecked(raw) }
    }

    /// Discards all allocations and clears the dirty flag.
    ///
    /// Capacity is retained so the next cycle does not reallocate.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.dirty.store(false, Ordering::Relaxed);
    }

    /// Returns `true` if anything has been allocated since the last reset.
    ///
    /// Relaxed: the rotation protocol tolerates a stale answer (it skips or
    /// performs one extra rotation, both of which keep the generation gap).
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    /// Number of bytes currently allocated.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing is allocated.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
