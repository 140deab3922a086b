//! The alert hub — glue between arenas, pool, latch and ring.
//!
//! [`AlertHub`] is the producer-facing half: any thread may post alerts,
//! adjust the category mask, or register extension hooks. [`AlertConsumer`]
//! is the unique consumer-facing half: it drains batches and waits for
//! activity. The pair is created together by [`AlertHub::new`].
//!
//! ## Posting path
//!
//! ```text
//! shared latch ─► thread arena ─► pool block ─► construct ─► ring enqueue
//!                                                  │
//!                        admitted ─► hooks ─► notify on 0→1 ─► true
//!                        rejected ─► reliable hooks ─► recycle ─► false
//! ```
//!
//! The only mutexes a producer can touch are the per-kind pool shelf (its
//! own kind only), first-post arena registration, and the wake handshake on
//! an empty→non-empty transition — none of them in the steady state of a
//! busy queue.
//!
//! ## Drain path
//!
//! Under the exclusive latch, the consumer releases the previous batch back
//! to the pool, drains the ring into the pending list, applies any deferred
//! queue resize, and rotates every producer's arenas. The new batch is
//! handed back as a [`Batch`] view; its alerts and arena payloads stay
//! readable until the next `drain` call, which the borrow checker enforces.

use std::cell::{RefCell, UnsafeCell};
use std::panic::AssertUnwindSafe;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Duration;

use fxhash::FxHashMap;
use smallvec::SmallVec;

use crate::alert::{
    drop_payload_in_place, kind_layout, AlertHeader, AlertKind, AlertRef,
};
use crate::alloc::{AlertPool, ArenaId, ArenaRegistry, ArenaSlice, ArenaStr, ThreadArenaSet};
use crate::config::{ConfigError, HubConfig, MAX_QUEUE_LIMIT};
use crate::queue::AlertRing;
use crate::sync::{lock, Latch};

// ---------------------------------------------------------------------------
// DispatchHook
// ---------------------------------------------------------------------------

/// Extension hook observing alerts as they pass through the hub.
///
/// Normal hooks (see [`AlertHub::add_extension`]) run on the posting thread
/// for every admitted alert. Reliable hooks
/// ([`AlertHub::add_reliable_extension`]) run for alerts *rejected* by the
/// queue, before their storage is recycled — the last chance to observe an
/// overload casualty.
///
/// Panics inside [`on_alert`](Self::on_alert) are caught and counted; a
/// misbehaving hook cannot poison the hub. Hooks must not call back into
/// hub reconfiguration (`add_extension`, `drain`) — they run under the
/// posting thread's shared latch.
pub trait DispatchHook: Send + Sync {
    /// Called with the alert. The reference is valid for this call only.
    fn on_alert(&self, alert: AlertRef<'_>);
}

#[derive(Default)]
struct HookSet {
    normal: SmallVec<[Arc<dyn DispatchHook>; 4]>,
    reliable: SmallVec<[Arc<dyn DispatchHook>; 2]>,
}

// ---------------------------------------------------------------------------
// DispatchMetrics
// ---------------------------------------------------------------------------

/// Atomic counters for monitoring the hub.
///
/// All counters are updated with relaxed ordering; snapshots are
/// approximate under concurrency, exact once producers are quiescent.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    posted: AtomicU64,
    dropped: AtomicU64,
    drained: AtomicU64,
    notifications: AtomicU64,
    hook_panics: AtomicU64,
}

impl DispatchMetrics {
    /// Alerts admitted to the queue.
    #[must_use]
    pub fn posted(&self) -> u64 {
        self.posted.load(Ordering::Relaxed)
    }

    /// Alerts rejected by admission (backpressure drops).
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Alerts handed to the consumer across all drains.
    #[must_use]
    pub fn drained(&self) -> u64 {
        self.drained.load(Ordering::Relaxed)
    }

    /// Empty→non-empty transitions (notify callback opportunities).
    #[must_use]
    pub fn notifications(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }

    /// Extension hook invocations that panicked and were swallowed.
    #[must_use]
    pub fn hook_panics(&self) -> u64 {
        self.hook_panics.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// AlertHub
// ---------------------------------------------------------------------------

/// Hub identity counter, used to key the per-thread arena cache.
static NEXT_HUB_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    /// Per-thread cache of this thread's arena set, keyed by hub id so a
    /// process may run several hubs. Weak so a dropped hub's arenas do not
    /// outlive it through the cache.
    static ARENA_CACHE: RefCell<FxHashMap<usize, Weak<ThreadArenaSet>>> =
        RefCell::new(FxHashMap::default());
}

type NotifyFn = Arc<dyn Fn() + Send + Sync>;

/// Multi-producer alert dispatch core.
///
/// Cloned freely via `Arc` across producer threads. The matching
/// [`AlertConsumer`] is the single drain handle; see [`AlertHub::new`].
pub struct AlertHub {
    id: usize,
    /// Enabled alert categories; relaxed loads, see [`Self::should_post`].
    mask: AtomicU32,
    /// Queue limit currently applied to the ring.
    limit_effective: AtomicUsize,
    /// Queue limit to apply at the next drain.
    limit_requested: AtomicUsize,
    latch: Latch,
    /// Structural mutation (resize) only under the exclusive latch; all
    /// producer access is through `&AlertRing`'s atomics.
    ring: UnsafeCell<AlertRing>,
    pool: AlertPool,
    arenas: ArenaRegistry,
    /// Mutated only under the exclusive latch, read under the shared latch.
    hooks: UnsafeCell<HookSet>,
    notify: Mutex<Option<NotifyFn>>,
    /// Previous batch, released at the next drain. Consumer-only.
    pending: UnsafeCell<Vec<NonNull<AlertHeader>>>,
    wait_mutex: Mutex<()>,
    wait_cond: Condvar,
    metrics: DispatchMetrics,
}

// SAFETY: the UnsafeCell interiors follow the latch protocol — `ring`
// resize and `hooks` mutation only under the exclusive latch, `pending`
// only by the unique consumer under the exclusive latch — and everything
// else is atomics, mutexes or immutable state.
unsafe impl Send for AlertHub {}
unsafe impl Sync for AlertHub {}

impl AlertHub {
    /// Creates a hub and its unique consumer handle.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration fails validation.
    pub fn new(config: HubConfig) -> Result<(Arc<Self>, AlertConsumer), ConfigError> {
        config.validate()?;
        let hub = Arc::new(Self {
            id: NEXT_HUB_ID.fetch_add(1, Ordering::Relaxed),
            mask: AtomicU32::new(config.category_mask),
            limit_effective: AtomicUsize::new(config.queue_size_limit),
            limit_requested: AtomicUsize::new(config.queue_size_limit),
            latch: Latch::new(),
            ring: UnsafeCell::new(AlertRing::new(config.queue_size_limit)),
            pool: AlertPool::new(),
            arenas: ArenaRegistry::new(),
            hooks: UnsafeCell::new(HookSet::default()),
            notify: Mutex::new(None),
            pending: UnsafeCell::new(Vec::new()),
            wait_mutex: Mutex::new(()),
            wait_cond: Condvar::new(),
            metrics: DispatchMetrics::default(),
        });
        let consumer = AlertConsumer {
            hub: Arc::clone(&hub),
        };
        Ok((hub, consumer))
    }

    /// Constructs an alert of kind `K` and enqueues it.
    ///
    /// `build` runs on this thread with the thread's current scratch arena;
    /// variable-length payload fields should be stashed there and kept as
    /// offset handles.
    ///
    /// Returns `true` on admission. `false` means the kind's priority tier
    /// was full and the alert was dropped — a backpressure signal, not an
    /// error; reliable hooks have already seen the dropped alert.
    ///
    /// Never blocks unboundedly: the worst case is a short bounded spin
    /// plus queueing behind an in-progress drain.
    ///
    /// `build` must not call back into this hub (the post runs under the
    /// shared latch, and a nested post can deadlock against a pending
    /// drain).
    pub fn post<K: AlertKind>(&self, build: impl FnOnce(&mut crate::ScratchArena) -> K) -> bool {
        let _shared = self.latch.acquire_shared();

        let set = self.thread_arena_set();
        let arena = ArenaId {
            slot: set.slot(),
            generation: set.generation(),
        };
        // SAFETY: this thread owns the set, the shared latch is held, and
        // the reference does not escape the closure call.
        let payload = build(unsafe { set.current() });

        let layout = kind_layout::<K>();
        let block = self.pool.acquire(K::TAG, layout.block);
        let base = block.as_ptr();
        // SAFETY: `block` satisfies the kind layout; the header and payload
        // are fully written before the pointer is published to the ring.
        unsafe {
            #[allow(clippy::cast_possible_truncation)] // checked by kind_layout
            base.cast::<AlertHeader>().write(AlertHeader {
                drop_payload: drop_payload_in_place::<K>,
                type_id: std::any::TypeId::of::<K>(),
                name: K::NAME,
                arena,
                category: K::CATEGORY,
                tag: K::TAG,
                payload_offset: layout.payload_offset as u16,
                priority: K::PRIORITY,
            });
            base.add(layout.payload_offset).cast::<K>().write(payload);
        }
        let header = block.cast::<AlertHeader>();

        // SAFETY: producers access the ring through its atomics; resize is
        // excluded while we hold the shared latch.
        let ring = unsafe { &*self.ring.get() };
        match ring.try_enqueue(header, K::PRIORITY) {
            Some(admitted) => {
                self.metrics.posted.fetch_add(1, Ordering::Relaxed);
                self.run_hooks(false, header);
                if admitted.was_empty {
                    self.notify_client();
                }
                true
            }
            None => {
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                self.run_hooks(true, header);
                // SAFETY: the alert was never published; we are its sole
                // owner and recycle it here.
                unsafe { self.dispose(header) };
                false
            }
        }
    }

    /// Returns `true` if alerts of kind `K` pass the current category mask.
    ///
    /// A relaxed-load hint for skipping expensive alert construction; a
    /// racing [`set_category_mask`](Self::set_category_mask) may be observed
    /// late, which is harmless. Under a steady mask, repeated calls agree.
    #[inline]
    #[must_use]
    pub fn should_post<K: AlertKind>(&self) -> bool {
        self.mask.load(Ordering::Relaxed) & K::CATEGORY != 0
    }

    /// Replaces the category mask.
    pub fn set_category_mask(&self, mask: u32) {
        self.mask.store(mask, Ordering::Relaxed);
    }

    /// The current category mask.
    #[must_use]
    pub fn category_mask(&self) -> u32 {
        self.mask.load(Ordering::Relaxed)
    }

    /// Requests a new queue size limit and returns the currently effective
    /// one.
    ///
    /// The new limit takes effect at the next drain, which is where the
    /// slot array can be rebuilt without blocking producers. Values are
    /// clamped to `1..=MAX_QUEUE_LIMIT`.
    pub fn set_queue_size_limit(&self, limit: usize) -> usize {
        let limit = limit.clamp(1, MAX_QUEUE_LIMIT);
        self.limit_requested.store(limit, Ordering::Release);
        self.limit_effective.load(Ordering::Acquire)
    }

    /// The queue size limit currently applied to the ring.
    #[must_use]
    pub fn queue_size_limit(&self) -> usize {
        self.limit_effective.load(Ordering::Acquire)
    }

    /// Number of alerts currently queued (published and undrained).
    #[must_use]
    pub fn len(&self) -> usize {
        // SAFETY: atomic read-only access; see `post`.
        unsafe { (*self.ring.get()).len() }
    }

    /// Returns `true` if the queue is drained empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sets the callback fired whenever the queue transitions from empty to
    /// non-empty — the client's cue to schedule a drain.
    ///
    /// The callback runs on the posting thread and must be cheap and
    /// non-reentrant (it must not post or drain).
    pub fn set_notify<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *lock(&self.notify) = Some(Arc::new(callback));
    }

    /// Removes the notify callback.
    pub fn clear_notify(&self) {
        *lock(&self.notify) = None;
    }

    /// Registers a hook invoked on the posting thread for every admitted
    /// alert.
    pub fn add_extension(&self, hook: Arc<dyn DispatchHook>) {
        let _excl = self.latch.acquire_exclusive();
        // SAFETY: exclusive latch held.
        unsafe { (*self.hooks.get()).normal.push(hook) };
    }

    /// Registers a hook invoked for alerts dropped by admission, before
    /// their storage is recycled.
    pub fn add_reliable_extension(&self, hook: Arc<dyn DispatchHook>) {
        let _excl = self.latch.acquire_exclusive();
        // SAFETY: exclusive latch held.
        unsafe { (*self.hooks.get()).reliable.push(hook) };
    }

    /// The hub's monitoring counters.
    #[must_use]
    pub fn metrics(&self) -> &DispatchMetrics {
        &self.metrics
    }

    // -- internals ----------------------------------------------------------

    /// This thread's arena set, registering it on first use.
    fn thread_arena_set(&self) -> Arc<ThreadArenaSet> {
        ARENA_CACHE.with(|cache| {
            let mut cache = cache.borrow_mut();
            if let Some(set) = cache.get(&self.id).and_then(Weak::upgrade) {
                return set;
            }
            let set = self.arenas.register();
            cache.insert(self.id, Arc::downgrade(&set));
            set
        })
    }

    /// Runs one hook list over the alert, isolating panics.
    fn run_hooks(&self, reliable: bool, header: NonNull<AlertHeader>) {
        // SAFETY: hook lists are mutated only under the exclusive latch and
        // every caller holds the shared latch.
        let hooks = unsafe { &*self.hooks.get() };
        let list: &[Arc<dyn DispatchHook>] = if reliable {
            hooks.reliable.as_slice()
        } else {
            hooks.normal.as_slice()
        };
        for hook in list {
            // SAFETY: the alert block is fully constructed and owned either
            // by the ring or by this call frame for the duration.
            let alert = unsafe { AlertRef::from_raw(header) };
            if std::panic::catch_unwind(AssertUnwindSafe(|| hook.on_alert(alert))).is_err() {
                self.metrics.hook_panics.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(alert = alert.name(), "alert extension hook panicked");
            }
        }
    }

    /// Fires the notify callback and wakes `wait` on the 0→1 transition.
    fn notify_client(&self) {
        self.metrics.notifications.fetch_add(1, Ordering::Relaxed);
        let callback = lock(&self.notify).clone();
        if let Some(callback) = callback {
            callback();
        }
        // Taking the wait mutex orders this wake against a consumer that is
        // between its emptiness check and its sleep.
        drop(lock(&self.wait_mutex));
        self.wait_cond.notify_all();
    }

    /// Destroys an alert and returns its storage to the pool.
    ///
    /// # Safety
    ///
    /// `header` must point to a fully constructed alert block that nothing
    /// else references.
    unsafe fn dispose(&self, header: NonNull<AlertHeader>) {
        let raw = header.as_ptr();
        let tag = (*raw).tag;
        let offset = usize::from((*raw).payload_offset);
        let drop_payload = (*raw).drop_payload;
        let base = raw.cast::<u8>();
        drop_payload(base.add(offset));
        self.pool.release(tag, NonNull::new_unchecked(base));
    }

    /// Releases every alert of the previous batch.
    ///
    /// # Safety
    ///
    /// Exclusive latch held; unique consumer.
    unsafe fn release_pending(&self) {
        let pending = &mut *self.pending.get();
        for header in pending.drain(..) {
            self.dispose(header);
        }
    }

    /// Applies a deferred queue resize. The ring must be drained.
    ///
    /// # Safety
    ///
    /// Exclusive latch held; unique consumer.
    unsafe fn apply_resize(&self) {
        let requested = self.limit_requested.load(Ordering::Acquire);
        let ring = &mut *self.ring.get();
        if requested != ring.limit() {
            let old = ring.limit();
            ring.resize(requested);
            self.limit_effective.store(requested, Ordering::Release);
            tracing::debug!(old, new = requested, "applied deferred alert queue resize");
        }
    }
}

impl Drop for AlertHub {
    fn drop(&mut self) {
        // Tear down in dependency order: alerts first (their payloads may
        // reference arenas), then the pool frees the raw blocks.
        let pending = std::mem::take(self.pending.get_mut());
        for header in pending {
            // SAFETY: unique access during drop.
            unsafe { self.dispose(header) };
        }
        let mut undrained = Vec::new();
        self.ring.get_mut().drain_into(&mut undrained);
        for header in undrained {
            // SAFETY: unique access during drop.
            unsafe { self.dispose(header) };
        }
    }
}

impl std::fmt::Debug for AlertHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertHub")
            .field("len", &self.len())
            .field("queue_size_limit", &self.queue_size_limit())
            .field("category_mask", &self.category_mask())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// AlertConsumer + Batch
// ---------------------------------------------------------------------------

/// The unique drain handle for a hub.
///
/// Not cloneable: the dispatch model is single-consumer, and the drain
/// contract ("the previous batch becomes invalid") is enforced by borrowing
/// this handle mutably for the lifetime of each [`Batch`].
#[derive(Debug)]
pub struct AlertConsumer {
    hub: Arc<AlertHub>,
}

impl AlertConsumer {
    /// Drains every alert posted since the previous drain.
    ///
    /// The previous batch's alerts are destroyed and recycled by this call
    /// — which is why the previous [`Batch`] cannot outlive it (it borrows
    /// `self`). Also applies any deferred queue resize and rotates the
    /// producer arenas.
    pub fn drain(&mut self) -> Batch<'_> {
        let hub = &*self.hub;
        let drained;
        {
            let _excl = hub.latch.acquire_exclusive();
            // SAFETY: exclusive latch held; this is the unique consumer.
            unsafe {
                hub.release_pending();
                let pending = &mut *hub.pending.get();
                drained = (*hub.ring.get()).drain_into(pending);
                hub.apply_resize();
                hub.arenas.rotate_all();
            }
        }
        hub.metrics
            .drained
            .fetch_add(drained as u64, Ordering::Relaxed);

        Batch { hub, len: drained }
    }

    /// Blocks until an alert is queued or `timeout` elapses; returns a peek
    /// at the front alert, without consuming it.
    ///
    /// Spurious wakeups are possible and handled by re-checking; a `None`
    /// return after the deadline can also race a just-published alert, so
    /// callers should simply call [`drain`](Self::drain) or `wait` again.
    pub fn wait(&mut self, timeout: Duration) -> Option<AlertRef<'_>> {
        let hub = &*self.hub;

        // SAFETY: ring access through atomics; structural mutation happens
        // only on this thread.
        if let Some(front) = unsafe { (*hub.ring.get()).peek() } {
            // SAFETY: the front alert stays alive until this consumer
            // drains, which requires re-borrowing `self` mutably.
            return Some(unsafe { AlertRef::from_raw(front) });
        }

        let guard = lock(&hub.wait_mutex);
        // SAFETY: as above — atomic reads only.
        let waited = hub
            .wait_cond
            .wait_timeout_while(guard, timeout, |_| unsafe {
                (*hub.ring.get()).is_empty()
            });
        drop(match waited {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        });

        // SAFETY: as above.
        let front = unsafe { (*hub.ring.get()).peek() }?;
        // SAFETY: as the fast path above.
        Some(unsafe { AlertRef::from_raw(front) })
    }

    /// The hub this consumer drains.
    #[must_use]
    pub fn hub(&self) -> &Arc<AlertHub> {
        &self.hub
    }
}

/// Read-only view of one drained batch, in admission (slot) order.
///
/// Alerts and their arena payloads stay valid exactly until the next
/// [`AlertConsumer::drain`] call.
#[derive(Debug)]
pub struct Batch<'a> {
    hub: &'a AlertHub,
    len: usize,
}

impl<'a> Batch<'a> {
    /// Number of alerts in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if nothing was drained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The alert at `index`, in admission order.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<AlertRef<'a>> {
        if index >= self.len {
            return None;
        }
        // SAFETY: the pending list is only mutated by `drain`, which cannot
        // run while this batch borrows the consumer.
        let pending = unsafe { &*self.hub.pending.get() };
        // SAFETY: every pending entry is a live alert until the next drain.
        pending
            .get(index)
            .map(|&header| unsafe { AlertRef::from_raw(header) })
    }

    /// Iterates the batch in admission order.
    pub fn iter(&self) -> impl Iterator<Item = AlertRef<'a>> + '_ {
        (0..self.len).filter_map(move |index| self.get(index))
    }

    /// Resolves an arena byte handle carried by `alert`.
    ///
    /// The returned slice is valid for the batch lifetime.
    ///
    /// # Panics
    ///
    /// Panics if `slice` does not belong to `alert`'s arena (mismatched
    /// handle).
    #[must_use]
    pub fn bytes(&self, alert: AlertRef<'_>, slice: ArenaSlice) -> &'a [u8] {
        // SAFETY: `alert` was drained in this batch, so the generation
        // invariant keeps its arena unwritten and unreset while `self`
        // lives.
        unsafe { self.hub.arenas.resolve_bytes(alert.arena(), slice) }
    }

    /// Resolves an arena string handle carried by `alert`.
    ///
    /// # Panics
    ///
    /// Panics if `text` does not belong to `alert`'s arena.
    #[must_use]
    pub fn text(&self, alert: AlertRef<'_>, text: ArenaStr) -> &'a str {
        let raw = self.bytes(alert, text.0);
        // SAFETY: `ArenaStr` handles are only created from valid UTF-8.
        unsafe { std::str::from_utf8_unchecked(raw) }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
