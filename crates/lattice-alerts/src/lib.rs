//! # Lattice Alerts
//!
//! Multi-producer / single-consumer alert dispatch for the lattice session
//! engine. Worker threads post asynchronous notifications ("alerts") which a
//! single client thread drains in batches.
//!
//! ## Design Principles
//!
//! 1. **No mutex on the producer fast path** — admission is a shared-latch
//!    acquire plus lock-free ring reservation
//! 2. **Bounded memory under overload** — normal-priority alerts are dropped
//!    first; critical alerts keep a reserved tier
//! 3. **No per-alert allocation in steady state** — alert storage is recycled
//!    through a per-kind pool, variable-length payloads live in per-thread
//!    scratch arenas
//! 4. **Rare reconfiguration never stalls producers for long** — queue resize
//!    and callback changes are applied under a brief exclusive latch at drain
//!    time
//!
//! ## Architecture
//!
//! ```text
//! worker threads                              client thread
//! ┌──────────┐  post()                        ┌────────────┐
//! │ producer │──┐                             │  consumer  │
//! └──────────┘  │   ┌──────────────────┐      └─────┬──────┘
//! ┌──────────┐  ├──►│ AlertRing (2·L)  │──drain()───┘
//! │ producer │──┤   └──────────────────┘
//! └──────────┘  │   scratch arenas ×3 per thread
//! ┌──────────┐  │   per-kind storage pool
//! │ producer │──┘   shared/exclusive latch
//! └──────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use lattice_alerts::{category, AlertHub, AlertKind, HubConfig};
//!
//! struct PeerTimeout;
//!
//! impl AlertKind for PeerTimeout {
//!     const TAG: u16 = 1;
//!     const CATEGORY: u32 = category::PEER | category::ERROR;
//!     const NAME: &'static str = "peer_timeout";
//! }
//!
//! let (hub, mut consumer) = AlertHub::new(HubConfig::default()).unwrap();
//! hub.set_category_mask(category::ALL);
//!
//! if hub.should_post::<PeerTimeout>() {
//!     hub.post(|_arena| PeerTimeout);
//! }
//!
//! let batch = consumer.drain();
//! for alert in batch.iter() {
//!     assert!(alert.is::<PeerTimeout>());
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Unsafe is confined to the latch-guarded interior and the type-erased
// alert storage; every block carries a SAFETY comment.
#![allow(unsafe_code)]

pub mod alert;
pub mod alloc;
pub mod config;
pub mod hub;
pub(crate) mod queue;
pub mod sync;

pub use alert::{category, AlertKind, AlertRef, Priority, MAX_KINDS};
pub use alloc::{ArenaId, ArenaSlice, ArenaStr, ScratchArena};
pub use config::{ConfigError, HubConfig};
pub use hub::{AlertConsumer, AlertHub, Batch, DispatchHook, DispatchMetrics};
pub use queue::SPIN_LIMIT;
