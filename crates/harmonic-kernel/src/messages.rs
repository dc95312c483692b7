//! Message types for acton-reactive actor communication.
//!
//! Timer tasks send `FastTick` and `SlowTick` to the coordinator; the
//! coordinator broadcasts `SnapshotPublished` and `SessionsEvicted` through
//! the broker for any observer that subscribes.

use std::sync::Arc;

use crate::contribution::ClientId;
use crate::snapshot::FieldSnapshot;

/// Recompute and fan out - sent to the BroadcastCoordinator.
#[derive(Debug, Clone)]
pub struct FastTick {
    /// Sequence number assigned by the timer task
    pub tick: u64,
}

/// Sweep stale sessions - sent to the BroadcastCoordinator.
#[derive(Debug, Clone)]
pub struct SlowTick {
    pub sweep: u64,
}

/// A snapshot went out - broadcast after every fast tick.
#[derive(Debug, Clone)]
pub struct SnapshotPublished {
    pub tick: u64,
    pub snapshot: Arc<FieldSnapshot>,
    /// Sessions whose queue accepted the snapshot
    pub delivered: usize,
    /// Sessions dropped during this fan-out
    pub failed: Vec<ClientId>,
    /// Snapshot is the zeroed stand-in for a failed computation
    pub fell_back: bool,
}

/// Sessions removed by a sweep - broadcast only when the sweep removed any.
#[derive(Debug, Clone)]
pub struct SessionsEvicted {
    pub sweep: u64,
    pub client_ids: Vec<ClientId>,
}
