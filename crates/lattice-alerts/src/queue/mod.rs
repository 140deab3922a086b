//! Bounded MPSC alert queue.
//!
//! [`AlertRing`] is the lock-free heart of the dispatch core: a slot array
//! of atomic alert pointers with priority-aware admission, written by many
//! producers and drained by the single consumer.

mod ring;

pub use ring::{Admitted, AlertRing, SPIN_LIMIT};
