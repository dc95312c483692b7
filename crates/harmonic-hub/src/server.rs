//! Server assembly: listeners, actor runtime, scheduler and shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use acton_reactive::prelude::*;
use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use harmonic_kernel::actors::{spawn_snapshot_observer, BroadcastCoordinator};
use harmonic_kernel::messages::SnapshotPublished;
use harmonic_kernel::{BroadcastScheduler, FieldHub, HubConfig};

use crate::connection::handle_connection;
use crate::exposition::handle_scrape;
use crate::rpc::handle_rpc_connection;

/// Fast ticks between status log lines.
const STATUS_EVERY_TICKS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerKind {
    Stream,
    Rpc,
    Metrics,
}

/// A started hub: listeners accepting, scheduler ticking.
pub struct RunningHub {
    hub: Arc<FieldHub>,
    runtime: ActorRuntime,
    scheduler: BroadcastScheduler,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    stream_addr: SocketAddr,
    rpc_addr: SocketAddr,
    metrics_addr: SocketAddr,
}

impl std::fmt::Debug for RunningHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningHub")
            .field("stream_addr", &self.stream_addr)
            .field("rpc_addr", &self.rpc_addr)
            .field("metrics_addr", &self.metrics_addr)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl RunningHub {
    pub fn hub(&self) -> &Arc<FieldHub> {
        &self.hub
    }

    pub fn stream_addr(&self) -> SocketAddr {
        self.stream_addr
    }

    pub fn rpc_addr(&self) -> SocketAddr {
        self.rpc_addr
    }

    pub fn metrics_addr(&self) -> SocketAddr {
        self.metrics_addr
    }

    /// Stop ticking, close every listener and connection, then stop actors.
    pub async fn shutdown(mut self) -> Result<()> {
        self.scheduler.stop().await;
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Listener task ended abnormally");
            }
        }
        let _ = self.runtime.shutdown_all().await;
        info!("Hub stopped");
        Ok(())
    }
}

/// Bind all listeners and start the broadcast loop.
///
/// Addresses with port 0 are resolved to the bound port, readable from the
/// returned handle.
pub async fn start(config: HubConfig) -> Result<RunningHub> {
    let hub = Arc::new(FieldHub::new(config.clone()).context("Failed to build field hub")?);

    let stream = bind(&config.network.stream_addr, "stream").await?;
    let rpc = bind(&config.network.rpc_addr, "rpc").await?;
    let metrics = bind(&config.network.metrics_addr, "metrics").await?;
    let stream_addr = stream.local_addr()?;
    let rpc_addr = rpc.local_addr()?;
    let metrics_addr = metrics.local_addr()?;

    let mut runtime = ActonApp::launch_async().await;

    let (status_tx, status_rx) = mpsc::channel::<SnapshotPublished>(64);
    spawn_snapshot_observer(&mut runtime, status_tx).await;
    let coordinator = BroadcastCoordinator::new(hub.clone()).spawn(&mut runtime).await;

    let scheduler = BroadcastScheduler::new();
    scheduler.start(coordinator, &config.ticks);

    let (shutdown, shutdown_rx) = watch::channel(false);
    let tasks = vec![
        tokio::spawn(accept_loop(ListenerKind::Stream, stream, hub.clone(), shutdown_rx.clone())),
        tokio::spawn(accept_loop(ListenerKind::Rpc, rpc, hub.clone(), shutdown_rx.clone())),
        tokio::spawn(accept_loop(ListenerKind::Metrics, metrics, hub.clone(), shutdown_rx.clone())),
        tokio::spawn(report_status(status_rx, shutdown_rx)),
    ];

    info!(
        stream = %stream_addr,
        rpc = %rpc_addr,
        metrics = %metrics_addr,
        "Harmonic hub listening"
    );

    Ok(RunningHub {
        hub,
        runtime,
        scheduler,
        shutdown,
        tasks,
        stream_addr,
        rpc_addr,
        metrics_addr,
    })
}

/// Run until Ctrl-C.
pub async fn serve(config: HubConfig) -> Result<()> {
    let running = start(config).await?;
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");
    running.shutdown().await
}

async fn bind(addr: &str, name: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {} listener on {}", name, addr))
}

async fn accept_loop(
    kind: ListenerKind,
    listener: TcpListener,
    hub: Arc<FieldHub>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(listener = ?kind, peer = %peer, "Connection accepted");
                    spawn_handler(&mut connections, kind, stream, hub.clone(), shutdown.clone());
                }
                Err(e) => warn!(listener = ?kind, error = %e, "Accept failed"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown.changed() => break,
        }
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
    debug!(listener = ?kind, "Listener closed");
}

fn spawn_handler(
    connections: &mut JoinSet<()>,
    kind: ListenerKind,
    stream: TcpStream,
    hub: Arc<FieldHub>,
    shutdown: watch::Receiver<bool>,
) {
    match kind {
        ListenerKind::Stream => {
            connections.spawn(async move {
                handle_connection(hub, stream, shutdown).await;
            });
        }
        ListenerKind::Rpc => {
            connections.spawn(handle_rpc_connection(hub, stream, shutdown));
        }
        ListenerKind::Metrics => {
            connections.spawn(async move {
                if let Err(e) = handle_scrape(hub, stream).await {
                    debug!(error = %e, "Scrape failed");
                }
            });
        }
    }
}

/// Periodic status line fed by the snapshot observer.
async fn report_status(
    mut published: mpsc::Receiver<SnapshotPublished>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            event = published.recv() => event,
            _ = shutdown.changed() => break,
        };
        let Some(event) = event else { break };

        if event.fell_back {
            warn!(tick = event.tick, "Published zeroed snapshot after compute failure");
        }
        if event.tick % STATUS_EVERY_TICKS == 0 {
            info!(
                tick = event.tick,
                active = event.snapshot.active_count,
                resonance = event.snapshot.global_resonance,
                coherence = event.snapshot.field_coherence,
                phi_relations = event.snapshot.phi_harmonics.len(),
                delivered = event.delivered,
                "Field status"
            );
        }
    }
}
