//! Allocation machinery for the dispatch core.
//!
//! Three pieces keep the posting path free of heap allocation in the steady
//! state:
//!
//! - [`ScratchArena`] — bump allocator for an alert's variable-length
//!   payload fields, handing out offsets rather than pointers
//! - [`ThreadArenaSet`] — three arenas per producer thread, rotated by the
//!   consumer so payloads stay readable for a full drain cycle
//! - [`AlertPool`] — per-kind free lists recycling the fixed-size alert
//!   storage blocks

mod arena;
mod arena_set;
mod pool;

pub use arena::{ArenaSlice, ArenaStr, ScratchArena};
pub use arena_set::{ArenaId, ArenaRegistry, ThreadArenaSet, GENERATIONS};
pub(crate) use pool::AlertPool;
