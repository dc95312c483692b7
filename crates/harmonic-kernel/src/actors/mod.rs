//! Acton-reactive actors for the broadcast loop.
//!
//! ```text
//! fast timer ─ FastTick ─▶ BroadcastCoordinator ── FieldHub::run_fast_tick
//!                              └─ SnapshotPublished (broadcast) ─▶ observers
//! slow timer ─ SlowTick ─▶ BroadcastCoordinator ── FieldHub::run_sweep
//!                              └─ SessionsEvicted (broadcast) ─▶ observers
//! ```
//!
//! The timers live in [`crate::scheduler`]; the coordinator's mailbox is what
//! keeps tick work serialized.

mod coordinator;
mod observer;

pub use coordinator::{BroadcastCoordinator, BroadcastCoordinatorState};
pub use observer::{spawn_eviction_observer, spawn_snapshot_observer};
