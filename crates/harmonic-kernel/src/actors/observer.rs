//! Observer actors that forward coordinator broadcasts to mpsc channels.
//!
//! Anything outside the actor runtime (the server's status log, tests) reads
//! tick results through these instead of subscribing directly.

use acton_reactive::prelude::*;
use tokio::sync::mpsc;

use crate::messages::{SessionsEvicted, SnapshotPublished};

/// Spawn an observer that forwards every SnapshotPublished broadcast.
///
/// Uses `try_send` so a slow reader loses observations rather than stalling
/// the broker.
pub async fn spawn_snapshot_observer(runtime: &mut ActorRuntime, tx: mpsc::Sender<SnapshotPublished>) {
    #[derive(Default, Clone, Debug)]
    struct State {
        tx: Option<mpsc::Sender<SnapshotPublished>>,
    }

    let mut actor = runtime.new_actor_with_name::<State>("SnapshotObserver".to_string());
    actor.model.tx = Some(tx);

    actor.handle().subscribe::<SnapshotPublished>().await;

    actor.act_on::<SnapshotPublished>(|actor, context| {
        if let Some(tx) = &actor.model.tx {
            let _ = tx.try_send(context.message().clone());
        }
        Reply::ready()
    });

    actor.start().await;
}

/// Spawn an observer that forwards every SessionsEvicted broadcast.
pub async fn spawn_eviction_observer(runtime: &mut ActorRuntime, tx: mpsc::Sender<SessionsEvicted>) {
    #[derive(Default, Clone, Debug)]
    struct State {
        tx: Option<mpsc::Sender<SessionsEvicted>>,
    }

    let mut actor = runtime.new_actor_with_name::<State>("EvictionObserver".to_string());
    actor.model.tx = Some(tx);

    actor.handle().subscribe::<SessionsEvicted>().await;

    actor.act_on::<SessionsEvicted>(|actor, context| {
        let msg = context.message().clone();
        let tx = actor.model.tx.clone();
        Reply::pending(async move {
            if let Some(tx) = tx {
                let _ = tx.send(msg).await;
            }
        })
    });

    actor.start().await;
}
