//! SessionRegistry: the only shared mutable state in the hub.
//!
//! Sessions live in a `DashMap`, so every operation locks a single shard for
//! the duration of one map operation. Sweeps and fan-out first copy what they
//! need out of the map and then act on the copy; no lock is ever held across
//! a whole sweep or a broadcast.

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::config::{FieldGeometryConfig, HubConfig, SignalConfig};
use crate::contribution::{new_client_id, validate_signal, ClientId, Contribution, SignalSignature};
use crate::error::{FieldError, FieldResult};
use crate::protocol::ServerMessage;

/// How a session receives field state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Persistent connection fed by the fast tick
    Streaming,
    /// Request/response client; never fanned out to
    Polling,
}

/// Server-side record of one live client.
#[derive(Debug)]
pub struct Session {
    pub client_id: ClientId,
    pub kind: SessionKind,
    pub last_heartbeat: Instant,
    /// Unix milliseconds
    pub connected_at: i64,
    /// False only while the session is being torn down
    pub active: bool,
    pub contribution: Option<Contribution>,
    pub signature: Option<SignalSignature>,
    outbound: Option<mpsc::Sender<ServerMessage>>,
}

impl Session {
    fn new(client_id: ClientId, kind: SessionKind, outbound: Option<mpsc::Sender<ServerMessage>>) -> Self {
        Self {
            client_id,
            kind,
            last_heartbeat: Instant::now(),
            connected_at: Utc::now().timestamp_millis(),
            active: true,
            contribution: None,
            signature: None,
            outbound,
        }
    }

    fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_heartbeat) > timeout
    }
}

/// Read-only view of a session for inspection clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub client_id: ClientId,
    pub kind: SessionKind,
    pub active: bool,
    pub connected_at: i64,
    pub idle_ms: u64,
    pub contribution: Option<Contribution>,
    pub signature: Option<SignalSignature>,
}

/// Registry of live sessions and their latest contributions.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<ClientId, Session>,
    signal: SignalConfig,
    geometry: FieldGeometryConfig,
    outbound_capacity: usize,
}

impl SessionRegistry {
    pub fn new(config: &HubConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            signal: config.signal.clone(),
            geometry: config.field.clone(),
            outbound_capacity: config.delivery.outbound_capacity,
        }
    }

    /// Open a streaming session with a fresh id and a bounded outbound queue.
    pub fn connect(&self) -> (ClientId, mpsc::Receiver<ServerMessage>) {
        let client_id = new_client_id();
        let (tx, rx) = mpsc::channel(self.outbound_capacity);
        self.sessions.insert(
            client_id.clone(),
            Session::new(client_id.clone(), SessionKind::Streaming, Some(tx)),
        );
        debug!(client_id = %client_id, "Session connected");
        (client_id, rx)
    }

    /// Ensure a polling session exists, reusing `requested` when given.
    ///
    /// An existing session under that id is kept and its heartbeat refreshed.
    pub fn connect_polling(&self, requested: Option<ClientId>) -> ClientId {
        let client_id = requested.unwrap_or_else(new_client_id);
        self.sessions
            .entry(client_id.clone())
            .and_modify(|session| session.last_heartbeat = Instant::now())
            .or_insert_with(|| Session::new(client_id.clone(), SessionKind::Polling, None));
        client_id
    }

    /// Replace a client's contribution and refresh its heartbeat.
    ///
    /// Validation happens before the entry is touched, so a rejected sample
    /// leaves the session exactly as it was. Does not trigger a recompute.
    pub fn upsert(
        &self,
        client_id: &str,
        frequency: f64,
        amplitude: f64,
        phase: f64,
    ) -> FieldResult<Contribution> {
        validate_signal(frequency, amplitude, phase, &self.signal)?;

        let Some(mut session) = self.sessions.get_mut(client_id) else {
            return Err(FieldError::UnknownSession(client_id.to_string()));
        };
        if !session.active {
            return Err(FieldError::UnknownSession(client_id.to_string()));
        }

        let contribution = Contribution::new(
            client_id.to_string(),
            frequency,
            amplitude,
            phase,
            &self.geometry,
        );
        let signature = match session.signature {
            Some(mut signature) => {
                signature.update(frequency, amplitude, self.signal.signature_alpha);
                signature
            }
            None => SignalSignature::seed(frequency, amplitude),
        };
        session.signature = Some(signature);
        session.contribution = Some(contribution.clone());
        session.last_heartbeat = Instant::now();

        trace!(client_id = %client_id, frequency, amplitude, "Contribution updated");
        Ok(contribution)
    }

    /// Refresh a session's heartbeat. Returns false for unknown ids.
    pub fn heartbeat(&self, client_id: &str) -> bool {
        match self.sessions.get_mut(client_id) {
            Some(mut session) if session.active => {
                session.last_heartbeat = Instant::now();
                true
            }
            _ => false,
        }
    }

    /// Remove every session silent for longer than `timeout`.
    pub fn evict_stale(&self, timeout: Duration) -> Vec<ClientId> {
        self.evict_stale_at(Instant::now(), timeout)
    }

    /// Eviction against an explicit clock reading.
    ///
    /// Candidates are collected first; each is then removed only if it is
    /// still stale under its entry lock, so an update racing the sweep
    /// either keeps the session alive or finds it gone.
    pub fn evict_stale_at(&self, now: Instant, timeout: Duration) -> Vec<ClientId> {
        let candidates: Vec<ClientId> = self
            .sessions
            .iter()
            .filter(|entry| entry.is_stale(now, timeout))
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = Vec::with_capacity(candidates.len());
        for client_id in candidates {
            let removed = self
                .sessions
                .remove_if(&client_id, |_, session| session.is_stale(now, timeout));
            if let Some((_, mut session)) = removed {
                session.active = false;
                evicted.push(client_id);
            }
        }
        evicted
    }

    /// Remove a session. Idempotent; returns whether anything was removed.
    pub fn disconnect(&self, client_id: &str) -> bool {
        self.mark_inactive(client_id);
        let removed = self.sessions.remove(client_id).is_some();
        if removed {
            debug!(client_id = %client_id, "Session disconnected");
        }
        removed
    }

    /// Flag a session as being torn down so ticks skip it.
    pub fn mark_inactive(&self, client_id: &str) -> bool {
        match self.sessions.get_mut(client_id) {
            Some(mut session) => {
                session.active = false;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.sessions.contains_key(client_id)
    }

    /// Number of sessions with `active == true`.
    pub fn active_count(&self) -> usize {
        self.sessions.iter().filter(|session| session.active).count()
    }

    /// Contributions of active sessions that have submitted at least once.
    pub fn active_contributions(&self) -> Vec<Contribution> {
        self.sessions
            .iter()
            .filter(|session| session.active)
            .filter_map(|session| session.contribution.clone())
            .collect()
    }

    /// Outbound queues of active streaming sessions.
    pub fn outbound_targets(&self) -> Vec<(ClientId, mpsc::Sender<ServerMessage>)> {
        self.sessions
            .iter()
            .filter(|session| session.active)
            .filter_map(|session| {
                session
                    .outbound
                    .as_ref()
                    .map(|tx| (session.client_id.clone(), tx.clone()))
            })
            .collect()
    }

    pub fn session_info(&self, client_id: &str) -> Option<SessionInfo> {
        self.sessions.get(client_id).map(|session| SessionInfo {
            client_id: session.client_id.clone(),
            kind: session.kind,
            active: session.active,
            connected_at: session.connected_at,
            idle_ms: Instant::now()
                .saturating_duration_since(session.last_heartbeat)
                .as_millis() as u64,
            contribution: session.contribution.clone(),
            signature: session.signature,
        })
    }
}
