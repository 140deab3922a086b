//! Alert model — kind contract, priorities, categories and the type-erased
//! storage header.
//!
//! Concrete alert kinds are defined by the host (session, peer and transfer
//! code); this module specifies only the contract they implement and the
//! runtime representation the dispatch core moves through its ring buffer.
//!
//! ## Representation
//!
//! Every posted alert lives in one pooled storage block:
//!
//! ```text
//! ┌─────────────────┬─────────────────────────┐
//! │   AlertHeader   │   payload (kind type)   │
//! └─────────────────┴─────────────────────────┘
//!  type-erased: tag, priority, category, name,
//!  TypeId, payload offset, drop fn, arena id
//! ```
//!
//! The header makes the block self-describing behind a thin pointer, which
//! is what the ring buffer's atomic slots require. Drained batches hand the
//! host [`AlertRef`] values; the host pattern-matches with
//! [`AlertRef::downcast_ref`].

use std::alloc::Layout;
use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::alloc::ArenaId;

/// Compile-time bound on the number of distinct alert kinds; kind tags are
/// dense in `1..=MAX_KINDS` and index the storage pool.
pub const MAX_KINDS: usize = 64;

/// Admission priority of an alert kind.
///
/// Normal alerts use at most the configured queue limit `L`; critical
/// alerts may use the overflow tier up to `2·L`, so under overload the
/// normal tier is dropped first.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Droppable first under overload (progress, statistics).
    Normal = 0,
    /// Reserved tier (errors, state transitions).
    Critical = 1,
}

impl Priority {
    /// Tier multiplier for the admission bound `L · (1 + tier)`.
    #[inline]
    #[must_use]
    pub const fn tier(self) -> usize {
        self as usize
    }
}

/// Category bits used to filter alert kinds before construction.
///
/// A kind's static category mask is AND-ed with the hub's runtime mask by
/// [`should_post`](crate::AlertHub::should_post); hosts combine bits with
/// `|`.
pub mod category {
    /// Errors: peer failures, protocol violations, I/O faults.
    pub const ERROR: u32 = 1;
    /// Peer lifecycle: connect, disconnect, ban.
    pub const PEER: u32 = 1 << 1;
    /// Connection attempts and listen sockets.
    pub const CONNECT: u32 = 1 << 2;
    /// Payload transfer events.
    pub const TRANSFER: u32 = 1 << 3;
    /// Periodic progress notifications.
    pub const PROGRESS: u32 = 1 << 4;
    /// Session and transfer state transitions.
    pub const STATE: u32 = 1 << 5;
    /// Counter and statistics snapshots.
    pub const STATS: u32 = 1 << 6;
    /// Disk and storage events.
    pub const STORAGE: u32 = 1 << 7;
    /// Every category.
    pub const ALL: u32 = u32::MAX;
}

/// Static contract implemented by each concrete alert kind.
///
/// The metadata is associated consts so it is known at construction time
/// with no per-instance cost. `Send + Sync` because alerts cross from
/// producer threads to the client thread and may additionally be observed
/// by extension hooks.
///
/// # Example
///
/// ```rust
/// use lattice_alerts::{category, AlertKind, Priority};
///
/// struct TrackerUnreachable {
///     attempts: u32,
/// }
///
/// impl AlertKind for TrackerUnreachable {
///     const TAG: u16 = 7;
///     const PRIORITY: Priority = Priority::Critical;
///     const CATEGORY: u32 = category::ERROR | category::CONNECT;
///     const NAME: &'static str = "tracker_unreachable";
/// }
/// ```
pub trait AlertKind: Send + Sync + Sized + 'static {
    /// Dense kind tag in `1..=MAX_KINDS`; also the storage pool index.
    const TAG: u16;
    /// Admission priority; defaults to the droppable tier.
    const PRIORITY: Priority = Priority::Normal;
    /// Static category bits for mask filtering.
    const CATEGORY: u32;
    /// Stable human-readable kind name for logging and diagnostics.
    const NAME: &'static str;
}

/// Compile-time tag range check, evaluated per kind on first use.
pub(crate) struct TagInRange<K>(PhantomData<K>);

impl<K: AlertKind> TagInRange<K> {
    pub(crate) const OK: () = assert!(
        K::TAG >= 1 && K::TAG as usize <= MAX_KINDS,
        "alert kind tag out of range"
    );
}

/// Type-erased prefix of every alert storage block.
#[repr(C)]
pub(crate) struct AlertHeader {
    /// Fn that drops the payload in place; receives the payload address.
    pub(crate) drop_payload: unsafe fn(*mut u8),
    /// Payload type, for checked downcasts.
    pub(crate) type_id: TypeId,
    /// Kind name, for diagnostics.
    pub(crate) name: &'static str,
    /// Arena the payload's offset handles resolve against.
    pub(crate) arena: ArenaId,
    /// Static category bits of the kind.
    pub(crate) category: u32,
    /// Kind tag (pool index).
    pub(crate) tag: u16,
    /// Byte offset from the block base to the payload.
    pub(crate) payload_offset: u16,
    /// Admission priority of the kind.
    pub(crate) priority: Priority,
}

/// Block layout of a kind: header followed by the aligned payload.
#[derive(Debug, Clone, Copy)]
pub(crate) struct KindLayout {
    pub(crate) block: Layout,
    pub(crate) payload_offset: usize,
}

/// Computes the storage block layout for kind `K`.
pub(crate) fn kind_layout<K: AlertKind>() -> KindLayout {
    let () = TagInRange::<K>::OK;
    let (block, payload_offset) = Layout::new::<AlertHeader>()
        .extend(Layout::new::<K>())
        .expect("alert block layout overflow");
    assert!(
        payload_offset <= usize::from(u16::MAX),
        "alert payload offset exceeds header field"
    );
    KindLayout {
        block: block.pad_to_align(),
        payload_offset,
    }
}

/// Drops a payload of type `K` in place.
///
/// # Safety
///
/// `payload` must point to a live, properly aligned `K`.
pub(crate) unsafe fn drop_payload_in_place<K: AlertKind>(payload: *mut u8) {
    std::ptr::drop_in_place(payload.cast::<K>());
}

/// Borrowed view of one alert in a drained batch (or peeked from the
/// queue).
///
/// Valid for the lifetime of the batch that produced it; the next drain
/// recycles the underlying storage. Copyable so hooks and iterators can
/// hand it around freely.
#[derive(Clone, Copy)]
pub struct AlertRef<'a> {
    header: NonNull<AlertHeader>,
    _borrow: PhantomData<&'a AlertHeader>,
}

// SAFETY: an AlertRef only ever yields shared references to the header and
// to payloads, and AlertKind requires payloads to be Send + Sync.
unsafe impl Send for AlertRef<'_> {}
unsafe impl Sync for AlertRef<'_> {}

impl<'a> AlertRef<'a> {
    /// Wraps a raw header pointer.
    ///
    /// # Safety
    ///
    /// `header` must point to a fully constructed alert block that stays
    /// alive and unmodified for `'a`.
    pub(crate) unsafe fn from_raw(header: NonNull<AlertHeader>) -> Self {
        Self {
            header,
            _borrow: PhantomData,
        }
    }

    #[inline]
    fn header(&self) -> &'a AlertHeader {
        // SAFETY: guaranteed by the `from_raw` contract.
        unsafe { self.header.as_ref() }
    }

    /// Kind tag of this alert.
    #[inline]
    #[must_use]
    pub fn tag(&self) -> u16 {
        self.header().tag
    }

    /// Admission priority of this alert's kind.
    #[inline]
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.header().priority
    }

    /// Static category bits of this alert's kind.
    #[inline]
    #[must_use]
    pub fn category(&self) -> u32 {
        self.header().category
    }

    /// Kind name, for logging.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.header().name
    }

    /// Arena identifier the payload's handles resolve against.
    #[inline]
    #[must_use]
    pub fn arena(&self) -> ArenaId {
        self.header().arena
    }

    /// Returns `true` if this alert is of kind `K`.
    #[inline]
    #[must_use]
    pub fn is<K: AlertKind>(&self) -> bool {
        self.header().type_id == TypeId::of::<K>()
    }

    /// Downcasts to the concrete payload, or `None` on kind mismatch.
    #[must_use]
    pub fn downcast_ref<K: AlertKind>(&self) -> Option<&'a K> {
        if !self.is::<K>() {
            return None;
        }
        let base = self.header.as_ptr().cast::<u8>();
        // SAFETY: the TypeId matched, so the payload at the recorded offset
        // is a live `K` for `'a` per the `from_raw` contract.
        unsafe {
            let payload = base.add(usize::from(self.header().payload_offset)).cast::<K>();
            Some(&*payload)
        }
    }
}

impl fmt::Debug for AlertRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertRef")
            .field("name", &self.name())
            .field("tag", &self.tag())
            .field("priority", &self.priority())
            .finish_non_exhaustive()
    }
}
