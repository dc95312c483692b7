//! BroadcastScheduler: the two timers that drive the coordinator.
//!
//! The fast timer sends `FastTick` every `fast_tick_ms`; the slow timer sends
//! `SlowTick` every `sweep_interval_ms`. Missed ticks are skipped, never
//! bunched, so a stalled coordinator catches up with a single tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use acton_reactive::prelude::*;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::TickConfig;
use crate::messages::{FastTick, SlowTick};

#[derive(Debug, Clone, Copy)]
enum Timer {
    Fast,
    Slow,
}

struct Running {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns the timer tasks; at most one pair runs at a time.
///
/// Sequence numbers survive a stop/start cycle, so the coordinator's stale
/// tick check keeps working across restarts.
#[derive(Default)]
pub struct BroadcastScheduler {
    running: Mutex<Option<Running>>,
    next_tick: Arc<AtomicU64>,
    next_sweep: Arc<AtomicU64>,
}

impl std::fmt::Debug for BroadcastScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastScheduler")
            .field("running", &self.is_running())
            .field("ticks_sent", &self.next_tick.load(Ordering::Relaxed))
            .finish()
    }
}

impl BroadcastScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start both timers against `coordinator`.
    ///
    /// Returns false, and changes nothing, if the timers are already running.
    /// Must be called from within a tokio runtime.
    pub fn start(&self, coordinator: ActorHandle, ticks: &TickConfig) -> bool {
        let Ok(mut running) = self.running.lock() else {
            return false;
        };
        if running.is_some() {
            return false;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let fast = tokio::spawn(drive(
            Timer::Fast,
            coordinator.clone(),
            ticks.fast_tick(),
            self.next_tick.clone(),
            shutdown_rx.clone(),
        ));
        let slow = tokio::spawn(drive(
            Timer::Slow,
            coordinator,
            ticks.sweep_interval(),
            self.next_sweep.clone(),
            shutdown_rx,
        ));

        *running = Some(Running {
            shutdown,
            tasks: vec![fast, slow],
        });
        info!(
            fast_tick_ms = ticks.fast_tick_ms,
            sweep_interval_ms = ticks.sweep_interval_ms,
            "Broadcast scheduler started"
        );
        true
    }

    /// Stop both timers and wait for them to exit.
    ///
    /// Idempotent: returns false when nothing was running.
    pub async fn stop(&self) -> bool {
        let running = match self.running.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        let Some(running) = running else {
            return false;
        };

        let _ = running.shutdown.send(true);
        for task in running.tasks {
            let _ = task.await;
        }
        info!("Broadcast scheduler stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|running| running.is_some())
            .unwrap_or(false)
    }
}

impl Drop for BroadcastScheduler {
    fn drop(&mut self) {
        if let Ok(mut running) = self.running.lock() {
            if let Some(running) = running.take() {
                let _ = running.shutdown.send(true);
            }
        }
    }
}

async fn drive(
    timer: Timer,
    coordinator: ActorHandle,
    period: Duration,
    counter: Arc<AtomicU64>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let seq = counter.fetch_add(1, Ordering::Relaxed) + 1;
                match timer {
                    Timer::Fast => coordinator.send(FastTick { tick: seq }).await,
                    Timer::Slow => coordinator.send(SlowTick { sweep: seq }).await,
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!(?timer, "Timer task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::{spawn_snapshot_observer, BroadcastCoordinator};
    use crate::config::HubConfig;
    use crate::hub::FieldHub;
    use tokio::time::timeout;

    fn fast_config() -> HubConfig {
        let mut config = HubConfig::deterministic();
        config.ticks.fast_tick_ms = 10;
        config.ticks.sweep_interval_ms = 50;
        config
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let config = fast_config();
        let hub = Arc::new(FieldHub::new(config.clone()).unwrap());
        let mut runtime = ActonApp::launch_async().await;
        let handle = BroadcastCoordinator::new(hub).spawn(&mut runtime).await;

        let scheduler = BroadcastScheduler::new();
        assert!(!scheduler.is_running());
        assert!(scheduler.start(handle.clone(), &config.ticks));
        assert!(!scheduler.start(handle.clone(), &config.ticks));
        assert!(scheduler.is_running());

        assert!(scheduler.stop().await);
        assert!(!scheduler.stop().await);
        assert!(!scheduler.is_running());

        let _ = runtime.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_ticks_flow_to_sessions() {
        let config = fast_config();
        let hub = Arc::new(FieldHub::new(config.clone()).unwrap());
        let (id, mut session_rx, _) = hub.open_session();
        hub.registry().upsert(&id, 432.0, 0.5, 0.0).unwrap();

        let mut runtime = ActonApp::launch_async().await;
        let handle = BroadcastCoordinator::new(hub.clone()).spawn(&mut runtime).await;
        let scheduler = BroadcastScheduler::new();
        scheduler.start(handle, &config.ticks);

        for _ in 0..3 {
            let frame = timeout(Duration::from_secs(2), session_rx.recv())
                .await
                .expect("snapshot within two seconds")
                .unwrap();
            assert!(matches!(frame, crate::protocol::ServerMessage::Snapshot(_)));
        }
        assert!(hub.metrics().ticks() >= 3);

        scheduler.stop().await;
        let _ = runtime.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_restart_keeps_sequence_increasing() {
        let config = fast_config();
        let hub = Arc::new(FieldHub::new(config.clone()).unwrap());
        let mut runtime = ActonApp::launch_async().await;
        let (tx, mut rx) = tokio::sync::mpsc::channel(256);
        spawn_snapshot_observer(&mut runtime, tx).await;
        let handle = BroadcastCoordinator::new(hub).spawn(&mut runtime).await;
        let scheduler = BroadcastScheduler::new();

        scheduler.start(handle.clone(), &config.ticks);
        let before = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        scheduler.stop().await;
        while rx.try_recv().is_ok() {}

        assert!(scheduler.start(handle, &config.ticks));
        let after = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert!(after.tick > before.tick);

        scheduler.stop().await;
        let _ = runtime.shutdown_all().await;
    }
}
