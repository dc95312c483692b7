//! Wire protocol for persistent sessions.
//!
//! Frames are single JSON objects discriminated by `type`, one per line.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::contribution::ClientId;
use crate::error::FieldError;
use crate::snapshot::FieldSnapshot;

/// Messages a client may send on its session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Replace this client's contribution
    Signal {
        frequency: f64,
        amplitude: f64,
        #[serde(default)]
        phase: f64,
    },
    /// Keep the session alive
    Heartbeat,
}

/// Messages the hub pushes to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame on every new session
    #[serde(rename_all = "camelCase")]
    Connected {
        client_id: ClientId,
        global_resonance: f64,
        active_count: usize,
    },
    /// Reply to a heartbeat
    HeartbeatAck {
        /// Unix milliseconds
        timestamp: i64,
    },
    /// Fast tick broadcast, shared between all receivers of a tick
    Snapshot(Arc<FieldSnapshot>),
    /// Input from this sender was rejected
    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn error(err: &FieldError) -> Self {
        ServerMessage::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn malformed(detail: impl std::fmt::Display) -> Self {
        ServerMessage::Error {
            code: "malformed_message".to_string(),
            message: format!("could not decode frame: {}", detail),
        }
    }
}
