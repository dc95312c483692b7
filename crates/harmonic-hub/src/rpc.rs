//! Request/response listener for polling and monitoring clients.
//!
//! One JSON request per line, one JSON response per line:
//!
//! ```text
//! {"method":"get_field_stats"}
//! {"method":"stream_harmonic","frequency":432,"amplitude":0.5,"clientId":"kiosk-1"}
//! {"method":"get_session","clientId":"kiosk-1"}
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, warn};

use harmonic_kernel::{ClientId, FieldError, FieldHub, FieldSnapshot};

use crate::connection::{encode_line, Frame, FrameReader};

/// Supported RPC calls.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum RpcRequest {
    /// Scalar stats of the live field
    GetFieldStats,
    /// One-shot contribution plus an immediately recomputed snapshot
    #[serde(rename_all = "camelCase")]
    StreamHarmonic {
        frequency: f64,
        amplitude: f64,
        #[serde(default)]
        phase: f64,
        #[serde(default)]
        client_id: Option<ClientId>,
    },
    /// Inspect one session
    #[serde(rename_all = "camelCase")]
    GetSession { client_id: ClientId },
}

/// Error body of a failed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
}

/// Envelope for every RPC reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    fn success(result: impl Serialize) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => Self {
                ok: true,
                result: Some(value),
                error: None,
            },
            Err(e) => Self::failure("internal", e.to_string()),
        }
    }

    fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(RpcError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    fn from_error(err: &FieldError) -> Self {
        Self::failure(err.code(), err.to_string())
    }
}

/// `stream_harmonic` result: the snapshot plus the id to reuse next time.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamHarmonicResult {
    client_id: ClientId,
    #[serde(flatten)]
    snapshot: FieldSnapshot,
}

/// Execute one decoded request.
pub fn dispatch(hub: &FieldHub, request: RpcRequest) -> RpcResponse {
    match request {
        RpcRequest::GetFieldStats => RpcResponse::success(hub.field_stats()),
        RpcRequest::StreamHarmonic {
            frequency,
            amplitude,
            phase,
            client_id,
        } => match hub.stream_harmonic(frequency, amplitude, phase, client_id) {
            Ok((client_id, snapshot)) => {
                RpcResponse::success(StreamHarmonicResult { client_id, snapshot })
            }
            Err(e) => RpcResponse::from_error(&e),
        },
        RpcRequest::GetSession { client_id } => match hub.session_info(&client_id) {
            Ok(info) => RpcResponse::success(info),
            Err(e) => RpcResponse::from_error(&e),
        },
    }
}

/// Decode and execute one raw request line.
pub fn dispatch_line(hub: &FieldHub, line: &str) -> RpcResponse {
    match serde_json::from_str::<RpcRequest>(line) {
        Ok(request) => dispatch(hub, request),
        Err(e) => RpcResponse::failure("malformed_message", e.to_string()),
    }
}

/// Serve requests on one RPC connection until the peer closes it.
pub async fn handle_rpc_connection(
    hub: Arc<FieldHub>,
    stream: TcpStream,
    mut shutdown: watch::Receiver<bool>,
) {
    let peer = stream.peer_addr().ok();
    let (reader_half, mut writer) = stream.into_split();
    let mut reader = FrameReader::new(reader_half);

    loop {
        let frame = tokio::select! {
            frame = reader.next::<RpcRequest>() => frame,
            _ = shutdown.changed() => break,
        };
        let response = match frame {
            Frame::Closed => break,
            Frame::Malformed(detail) => {
                debug!(peer = ?peer, error = %detail, "Malformed RPC request");
                RpcResponse::failure("malformed_message", detail)
            }
            Frame::Message(request) => {
                debug!(peer = ?peer, request = ?request, "RPC request");
                dispatch(&hub, request)
            }
        };

        let line = match encode_line(&response) {
            Ok(line) => line,
            Err(e) => {
                warn!(peer = ?peer, error = %e, "Failed to encode RPC response");
                break;
            }
        };
        if writer.write_all(&line).await.is_err() {
            break;
        }
    }
}
