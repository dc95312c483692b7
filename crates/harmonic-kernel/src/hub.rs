//! FieldHub: the service object shared by connection workers and the scheduler.
//!
//! One hub per process in production, one per test case in tests. Everything
//! a tick needs hangs off the hub, so there is no ambient global state.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, trace, warn};

use crate::aggregator::FieldAggregator;
use crate::config::HubConfig;
use crate::contribution::{validate_signal, ClientId};
use crate::error::{FieldError, FieldResult};
use crate::harmonic::{NoiseSource, SeededNoise, ZeroNoise};
use crate::interference::InterferenceEngine;
use crate::metrics::FieldMetrics;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::registry::{SessionInfo, SessionRegistry};
use crate::snapshot::{FieldSnapshot, FieldStats};

/// Outcome of one fan-out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryReport {
    /// Sessions whose queue accepted the snapshot
    pub delivered: usize,
    /// Sessions dropped because their queue was full or closed
    pub failed: Vec<ClientId>,
}

/// Result of a single fast tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub snapshot: Arc<FieldSnapshot>,
    pub delivery: DeliveryReport,
    /// True if the computed snapshot was replaced by a zeroed one
    pub fell_back: bool,
}

/// Owns the registry, the engine and everything derived per tick.
pub struct FieldHub {
    config: HubConfig,
    registry: SessionRegistry,
    engine: InterferenceEngine,
    noise: Box<dyn NoiseSource>,
    metrics: FieldMetrics,
}

impl std::fmt::Debug for FieldHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldHub")
            .field("active_sessions", &self.registry.active_count())
            .field("metrics", &self.metrics)
            .finish()
    }
}

impl FieldHub {
    /// Build a hub with the noise source described by `config.noise`.
    pub fn new(config: HubConfig) -> FieldResult<Self> {
        let noise: Box<dyn NoiseSource> = match (config.noise.amplitude, config.noise.seed) {
            (amplitude, _) if amplitude == 0.0 => Box::new(ZeroNoise),
            (amplitude, Some(seed)) => Box::new(SeededNoise::new(amplitude, seed)),
            (amplitude, None) => Box::new(SeededNoise::from_entropy(amplitude)),
        };
        Self::with_noise(config, noise)
    }

    /// Build a hub with an explicit noise source.
    pub fn with_noise(config: HubConfig, noise: Box<dyn NoiseSource>) -> FieldResult<Self> {
        config.validate()?;
        Ok(Self {
            registry: SessionRegistry::new(&config),
            engine: InterferenceEngine::new(config.field.clone()),
            noise,
            metrics: FieldMetrics::new()?,
            config,
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &InterferenceEngine {
        &self.engine
    }

    pub fn metrics(&self) -> &FieldMetrics {
        &self.metrics
    }

    /// Open a streaming session and build its greeting frame.
    pub fn open_session(&self) -> (ClientId, mpsc::Receiver<ServerMessage>, ServerMessage) {
        let (client_id, rx) = self.registry.connect();
        let contributions = self.registry.active_contributions();
        let greeting = ServerMessage::Connected {
            client_id: client_id.clone(),
            global_resonance: FieldAggregator::over(&contributions).global_resonance(self.noise.as_ref()),
            active_count: self.registry.active_count(),
        };
        (client_id, rx, greeting)
    }

    /// Apply one inbound session frame.
    ///
    /// Returns the direct reply, if the frame has one. Snapshots are never
    /// direct replies; they arrive with the next fast tick.
    pub fn handle_client_message(
        &self,
        client_id: &str,
        message: ClientMessage,
    ) -> FieldResult<Option<ServerMessage>> {
        match message {
            ClientMessage::Signal {
                frequency,
                amplitude,
                phase,
            } => {
                self.registry.upsert(client_id, frequency, amplitude, phase)?;
                Ok(None)
            }
            ClientMessage::Heartbeat => {
                if self.registry.heartbeat(client_id) {
                    Ok(Some(ServerMessage::HeartbeatAck {
                        timestamp: Utc::now().timestamp_millis(),
                    }))
                } else {
                    Err(FieldError::UnknownSession(client_id.to_string()))
                }
            }
        }
    }

    /// Compute a snapshot of the current registry contents.
    pub fn compute_snapshot(&self) -> FieldResult<FieldSnapshot> {
        let contributions = self.registry.active_contributions();
        let active_count = self.registry.active_count();
        self.engine.snapshot(
            &contributions,
            active_count,
            self.noise.as_ref(),
            Utc::now().timestamp_millis(),
        )
    }

    /// Compute a snapshot, substituting a zeroed one on failure.
    fn compute_or_fallback(&self) -> (FieldSnapshot, bool) {
        match self.compute_snapshot() {
            Ok(snapshot) => (snapshot, false),
            Err(e) => {
                warn!(error = %e, "Snapshot computation failed, publishing zeroed field");
                self.metrics.record_compute_failure();
                let zeroed = FieldSnapshot::zeroed(
                    self.registry.active_count(),
                    self.engine.layout(),
                    Utc::now().timestamp_millis(),
                );
                (zeroed, true)
            }
        }
    }

    /// Recompute the snapshot for this tick and record it in the metrics.
    pub fn publish_snapshot(&self) -> (Arc<FieldSnapshot>, bool) {
        let (snapshot, fell_back) = self.compute_or_fallback();
        let snapshot = Arc::new(snapshot);
        self.metrics.record_snapshot(&snapshot);
        (snapshot, fell_back)
    }

    /// Queue a snapshot on every active streaming session.
    ///
    /// Uses `try_send`, so a slow receiver costs one failed call and never
    /// delays the others. A full or closed queue disconnects that session.
    pub fn fan_out(&self, snapshot: &Arc<FieldSnapshot>) -> DeliveryReport {
        let targets = self.registry.outbound_targets();
        let mut report = DeliveryReport::default();

        for (client_id, tx) in targets {
            let reason = match tx.try_send(ServerMessage::Snapshot(snapshot.clone())) {
                Ok(()) => {
                    report.delivered += 1;
                    continue;
                }
                Err(TrySendError::Full(_)) => "outbound queue full",
                Err(TrySendError::Closed(_)) => "receiver dropped",
            };
            let failure = FieldError::DeliveryFailure {
                client_id: client_id.clone(),
                reason: reason.to_string(),
            };
            warn!(client_id = %client_id, error = %failure, "Dropping session after failed delivery");
            self.registry.disconnect(&client_id);
            report.failed.push(client_id);
        }

        self.metrics
            .record_delivery(report.delivered, report.failed.len());
        report
    }

    /// One fast tick: recompute, publish, fan out.
    pub fn run_fast_tick(&self) -> TickReport {
        let (snapshot, fell_back) = self.publish_snapshot();
        let delivery = self.fan_out(&snapshot);
        trace!(
            active = snapshot.active_count,
            resonance = snapshot.global_resonance,
            delivered = delivery.delivered,
            failed = delivery.failed.len(),
            "Fast tick published"
        );
        TickReport {
            snapshot,
            delivery,
            fell_back,
        }
    }

    /// One slow tick: evict sessions silent past the configured timeout.
    pub fn run_sweep(&self) -> Vec<ClientId> {
        let evicted = self
            .registry
            .evict_stale(self.config.ticks.session_timeout());
        for client_id in &evicted {
            info!(client_id = %client_id, "Session evicted after heartbeat timeout");
        }
        if !evicted.is_empty() {
            self.metrics.record_evictions(evicted.len());
        }
        debug!(
            evicted = evicted.len(),
            remaining = self.registry.active_count(),
            "Stale sweep complete"
        );
        evicted
    }

    /// Scalar stats of the live field, computed on demand.
    pub fn field_stats(&self) -> FieldStats {
        let contributions = self.registry.active_contributions();
        let relations = self.engine.detect_phi_relations(&contributions);
        FieldAggregator::over(&contributions).stats(
            self.registry.active_count(),
            &relations,
            self.noise.as_ref(),
        )
    }

    /// One-shot upsert plus immediate recompute for clients that poll.
    ///
    /// Creates a polling session for `client_id` (or a fresh id) when none
    /// exists. An invalid signal is rejected before any session is created.
    pub fn stream_harmonic(
        &self,
        frequency: f64,
        amplitude: f64,
        phase: f64,
        client_id: Option<ClientId>,
    ) -> FieldResult<(ClientId, FieldSnapshot)> {
        validate_signal(frequency, amplitude, phase, &self.config.signal)?;
        let client_id = self.registry.connect_polling(client_id);
        self.registry.upsert(&client_id, frequency, amplitude, phase)?;
        let (snapshot, _) = self.compute_or_fallback();
        Ok((client_id, snapshot))
    }

    pub fn session_info(&self, client_id: &str) -> FieldResult<SessionInfo> {
        self.registry
            .session_info(client_id)
            .ok_or_else(|| FieldError::UnknownSession(client_id.to_string()))
    }

    /// Remove a session; safe to call more than once.
    pub fn close_session(&self, client_id: &str) -> bool {
        self.registry.disconnect(client_id)
    }
}
