//! BroadcastCoordinator: serializes tick work against the shared hub.
//!
//! Both tick kinds go through `mutate_on`, so the mailbox guarantees that no
//! two fast ticks overlap and that a sweep never interleaves with a fan-out.

use std::sync::Arc;

use acton_reactive::prelude::*;
use tracing::{debug, info, trace, warn};

use crate::hub::FieldHub;
use crate::messages::{FastTick, SessionsEvicted, SlowTick, SnapshotPublished};

/// Actor state for BroadcastCoordinator.
#[derive(Default, Clone)]
pub struct BroadcastCoordinatorState {
    /// Hub the ticks run against
    hub: Option<Arc<FieldHub>>,
    /// Fast ticks handled
    ticks_run: u64,
    /// Sweeps handled
    sweeps_run: u64,
    /// Highest tick sequence number seen
    last_tick: Option<u64>,
}

impl std::fmt::Debug for BroadcastCoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastCoordinatorState")
            .field("has_hub", &self.hub.is_some())
            .field("ticks_run", &self.ticks_run)
            .field("sweeps_run", &self.sweeps_run)
            .field("last_tick", &self.last_tick)
            .finish()
    }
}

/// Central coordinator for the broadcast loop.
///
/// 1. On FastTick: recompute, publish and fan out via the hub, then
///    broadcast SnapshotPublished
/// 2. On SlowTick: sweep stale sessions, then broadcast SessionsEvicted if
///    any were removed
pub struct BroadcastCoordinator {
    pub hub: Arc<FieldHub>,
}

impl BroadcastCoordinator {
    pub fn new(hub: Arc<FieldHub>) -> Self {
        Self { hub }
    }

    /// Spawn the coordinator. Ticks are driven externally by the scheduler.
    pub async fn spawn(self, runtime: &mut ActorRuntime) -> ActorHandle {
        let mut actor = runtime
            .new_actor_with_name::<BroadcastCoordinatorState>("BroadcastCoordinator".to_string());

        actor.model.hub = Some(self.hub);

        configure_handlers(&mut actor);

        actor.start().await
    }
}

fn configure_handlers(actor: &mut ManagedActor<Idle, BroadcastCoordinatorState>) {
    actor.mutate_on::<FastTick>(|actor, context| {
        let tick = context.message().tick;

        let Some(hub) = actor.model.hub.clone() else {
            warn!(tick, "BroadcastCoordinator: hub not initialized");
            return Reply::ready();
        };

        // A late tick from a restarted timer carries an old sequence number
        if actor.model.last_tick.is_some_and(|last| tick <= last) {
            debug!(tick, last = ?actor.model.last_tick, "Skipping stale fast tick");
            return Reply::ready();
        }
        actor.model.last_tick = Some(tick);

        let report = hub.run_fast_tick();
        actor.model.ticks_run += 1;

        if !report.delivery.failed.is_empty() {
            info!(
                tick,
                dropped = report.delivery.failed.len(),
                "Sessions dropped during fan-out"
            );
        }
        trace!(tick, delivered = report.delivery.delivered, "FastTick complete");

        let broker = actor.broker().clone();
        Reply::pending(async move {
            broker
                .broadcast(SnapshotPublished {
                    tick,
                    snapshot: report.snapshot,
                    delivered: report.delivery.delivered,
                    failed: report.delivery.failed,
                    fell_back: report.fell_back,
                })
                .await;
        })
    });

    actor.mutate_on::<SlowTick>(|actor, context| {
        let sweep = context.message().sweep;

        let Some(hub) = actor.model.hub.clone() else {
            warn!(sweep, "BroadcastCoordinator: hub not initialized");
            return Reply::ready();
        };

        let evicted = hub.run_sweep();
        actor.model.sweeps_run += 1;

        if evicted.is_empty() {
            return Reply::ready();
        }

        let broker = actor.broker().clone();
        Reply::pending(async move {
            broker
                .broadcast(SessionsEvicted {
                    sweep,
                    client_ids: evicted,
                })
                .await;
        })
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::{spawn_eviction_observer, spawn_snapshot_observer};
    use crate::config::HubConfig;
    use acton_reactive::prelude::ActonApp;
    use tokio::time::{timeout, Duration};

    fn hub() -> Arc<FieldHub> {
        Arc::new(FieldHub::new(HubConfig::deterministic()).unwrap())
    }

    #[tokio::test]
    async fn test_fast_tick_publishes_snapshot() {
        let hub = hub();
        let (id, mut session_rx, _) = hub.open_session();
        hub.registry().upsert(&id, 432.0, 0.5, 0.0).unwrap();

        let mut runtime = ActonApp::launch_async().await;
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        spawn_snapshot_observer(&mut runtime, tx).await;
        let handle = BroadcastCoordinator::new(hub.clone()).spawn(&mut runtime).await;

        handle.send(FastTick { tick: 1 }).await;

        let published = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("observer received a snapshot")
            .unwrap();
        assert_eq!(published.tick, 1);
        assert_eq!(published.delivered, 1);
        assert_eq!(published.snapshot.active_count, 1);
        assert!(published.snapshot.global_resonance > 0.0);
        assert!(session_rx.try_recv().is_ok());
        assert_eq!(hub.metrics().ticks(), 1);

        let _ = runtime.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_stale_tick_is_skipped() {
        let hub = hub();
        let mut runtime = ActonApp::launch_async().await;
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        spawn_snapshot_observer(&mut runtime, tx).await;
        let handle = BroadcastCoordinator::new(hub.clone()).spawn(&mut runtime).await;

        handle.send(FastTick { tick: 5 }).await;
        handle.send(FastTick { tick: 3 }).await;
        handle.send(FastTick { tick: 6 }).await;

        let first = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        let second = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!((first.tick, second.tick), (5, 6));
        assert_eq!(hub.metrics().ticks(), 2);

        let _ = runtime.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_slow_tick_broadcasts_evictions() {
        let mut config = HubConfig::deterministic();
        config.ticks.session_timeout_ms = 20;
        let hub = Arc::new(FieldHub::new(config).unwrap());
        let (silent, _rx, _) = hub.open_session();

        let mut runtime = ActonApp::launch_async().await;
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        spawn_eviction_observer(&mut runtime, tx).await;
        let handle = BroadcastCoordinator::new(hub.clone()).spawn(&mut runtime).await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.send(SlowTick { sweep: 1 }).await;

        let evicted = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(evicted.client_ids, vec![silent]);
        assert_eq!(hub.registry().active_count(), 0);

        let _ = runtime.shutdown_all().await;
    }
}
