//! Per-client session worker for the stream listener.
//!
//! Each connection gets one reader loop (this task) and one writer task. The
//! writer drains two queues: direct replies (greeting, heartbeat acks, error
//! frames) and the session's outbound snapshot queue owned by the registry.
//! Replies win ties so the greeting is always the first frame on the wire.
//!
//! The registry holds the only sender of the outbound queue. When a sweep or
//! a failed delivery removes the session, the queue closes, the writer sends
//! a final `unknown_session` error and closes the socket, and the reader
//! stops with it.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Duration;
use tracing::{debug, info, warn};

use harmonic_kernel::protocol::{ClientMessage, ServerMessage};
use harmonic_kernel::{ClientId, FieldError, FieldHub};

/// Direct replies queued per connection; one client cannot have more than a
/// handful in flight.
const REPLY_CAPACITY: usize = 16;

/// Longest frame a client may send, in bytes.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// What the reader loop ended on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Client closed its side or the socket failed
    PeerClosed,
    /// Server is shutting down
    Shutdown,
    /// Session no longer exists in the registry
    UnknownSession,
    /// Session was evicted or dropped by fan-out while connected
    Evicted,
    /// Writer gave up (write timeout or socket error)
    WriterGone,
}

/// Why the writer task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterExit {
    /// Registry released the outbound queue while the connection was live
    SessionRemoved,
    /// The connection is closing itself
    Teardown,
    WriteFailed,
}

/// Serve one stream connection until it closes.
///
/// Teardown order: stop reading, drop the reply sender, remove the session
/// (dropping the registry's sender), then wait for the writer to flush what
/// is left.
pub async fn handle_connection(
    hub: Arc<FieldHub>,
    stream: TcpStream,
    mut shutdown: watch::Receiver<bool>,
) -> CloseReason {
    let peer = stream.peer_addr().ok();
    let (reader_half, writer_half) = stream.into_split();
    let mut reader = FrameReader::new(reader_half);

    let (client_id, outbound, greeting) = hub.open_session();
    info!(client_id = %client_id, peer = ?peer, "Session connected");

    let (replies, reply_rx) = mpsc::channel::<ServerMessage>(REPLY_CAPACITY);
    // Fresh channel with free capacity, cannot fail
    let _ = replies.try_send(greeting);

    let write_timeout = Duration::from_millis(hub.config().delivery.write_timeout_ms);
    let writer_id = client_id.clone();
    let (exit_tx, mut writer_exit) = oneshot::channel();
    let writer_task = tokio::spawn(async move {
        let exit = writer_loop(writer_id, writer_half, reply_rx, outbound, write_timeout).await;
        let _ = exit_tx.send(exit);
    });

    let reason = tokio::select! {
        reason = read_loop(&hub, &client_id, &mut reader, &replies) => reason,
        exit = &mut writer_exit => match exit {
            Ok(WriterExit::SessionRemoved) => CloseReason::Evicted,
            _ => CloseReason::WriterGone,
        },
        _ = shutdown.changed() => CloseReason::Shutdown,
    };

    // Replies close first: the writer reads a closed reply queue as local
    // teardown and skips the unknown_session notice
    drop(replies);
    hub.close_session(&client_id);
    let _ = writer_task.await;

    info!(client_id = %client_id, peer = ?peer, reason = ?reason, "Session closed");
    reason
}

async fn read_loop<R>(
    hub: &FieldHub,
    client_id: &ClientId,
    reader: &mut FrameReader<R>,
    replies: &mpsc::Sender<ServerMessage>,
) -> CloseReason
where
    R: AsyncRead + Unpin,
{
    loop {
        let message = match reader.next::<ClientMessage>().await {
            Frame::Closed => return CloseReason::PeerClosed,
            Frame::Malformed(detail) => {
                warn!(client_id = %client_id, error = %detail, "Malformed frame");
                if replies.send(ServerMessage::malformed(detail)).await.is_err() {
                    return CloseReason::WriterGone;
                }
                continue;
            }
            Frame::Message(message) => message,
        };

        debug!(client_id = %client_id, message = ?message, "Frame received");
        let (reply, close) = match hub.handle_client_message(client_id, message) {
            Ok(reply) => (reply, false),
            Err(e @ FieldError::UnknownSession(_)) => {
                debug!(client_id = %client_id, "Frame for a session that is gone, closing");
                (Some(ServerMessage::error(&e)), true)
            }
            Err(e) => {
                debug!(client_id = %client_id, error = %e, "Signal rejected");
                (Some(ServerMessage::error(&e)), false)
            }
        };

        if let Some(reply) = reply {
            if replies.send(reply).await.is_err() {
                return CloseReason::WriterGone;
            }
        }
        if close {
            return CloseReason::UnknownSession;
        }
    }
}

/// One decoded line from a client.
#[derive(Debug)]
pub(crate) enum Frame<T> {
    Message(T),
    Malformed(String),
    Closed,
}

/// Line-JSON reader that never buffers more than one frame's worth.
///
/// A line longer than [`MAX_FRAME_BYTES`] is reported as malformed as soon
/// as the limit is crossed; the rest of that line is skipped on the next
/// read so the stream resyncs on the following newline.
pub(crate) struct FrameReader<R> {
    inner: BufReader<R>,
    skipping: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            skipping: false,
        }
    }

    /// Read the next non-blank line and decode it as JSON.
    pub(crate) async fn next<T>(&mut self) -> Frame<T>
    where
        T: serde::de::DeserializeOwned,
    {
        loop {
            if self.skipping {
                match skip_line(&mut self.inner).await {
                    Ok(true) => self.skipping = false,
                    Ok(false) => return Frame::Closed,
                    Err(e) => {
                        debug!(error = %e, "Read error");
                        return Frame::Closed;
                    }
                }
            }

            let mut line = Vec::new();
            let limit = MAX_FRAME_BYTES as u64 + 1;
            let n = match (&mut self.inner).take(limit).read_until(b'\n', &mut line).await {
                Ok(n) => n,
                Err(e) => {
                    debug!(error = %e, "Read error");
                    return Frame::Closed;
                }
            };
            if n == 0 {
                return Frame::Closed;
            }
            if line.len() > MAX_FRAME_BYTES {
                self.skipping = line.last() != Some(&b'\n');
                return Frame::Malformed(format!(
                    "frame exceeds {} byte limit",
                    MAX_FRAME_BYTES
                ));
            }
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            return match serde_json::from_slice::<T>(&line) {
                Ok(message) => Frame::Message(message),
                Err(e) => Frame::Malformed(e.to_string()),
            };
        }
    }
}

/// Discard through the next newline, one buffer at a time.
///
/// Returns false if the peer closed before a newline arrived.
async fn skip_line<B: AsyncBufRead + Unpin>(reader: &mut B) -> std::io::Result<bool> {
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(false);
        }
        match buf.iter().position(|&b| b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(true);
            }
            None => {
                let len = buf.len();
                reader.consume(len);
            }
        }
    }
}

/// Encode one frame as a JSON line.
pub(crate) fn encode_line<T: serde::Serialize>(message: &T) -> Result<Vec<u8>> {
    let mut frame = serde_json::to_vec(message).context("Failed to encode frame")?;
    frame.push(b'\n');
    Ok(frame)
}

enum Outgoing {
    Reply(Option<ServerMessage>),
    Queued(Option<ServerMessage>),
}

async fn writer_loop(
    client_id: ClientId,
    mut writer: OwnedWriteHalf,
    mut replies: mpsc::Receiver<ServerMessage>,
    mut outbound: mpsc::Receiver<ServerMessage>,
    write_timeout: Duration,
) -> WriterExit {
    let mut replies_open = true;

    let exit = loop {
        let next = tokio::select! {
            biased;
            reply = replies.recv(), if replies_open => Outgoing::Reply(reply),
            queued = outbound.recv() => Outgoing::Queued(queued),
        };

        let message = match next {
            Outgoing::Reply(Some(message)) | Outgoing::Queued(Some(message)) => message,
            Outgoing::Reply(None) => {
                replies_open = false;
                continue;
            }
            Outgoing::Queued(None) => {
                break finish_removed(&client_id, &mut writer, &mut replies, replies_open, write_timeout)
                    .await;
            }
        };

        if !write_frame(&client_id, &mut writer, &message, write_timeout).await {
            break WriterExit::WriteFailed;
        }
    };

    let _ = writer.shutdown().await;
    exit
}

/// Outbound queue closed: flush pending replies, then tell the client its
/// session is gone unless the connection is already tearing itself down.
async fn finish_removed(
    client_id: &ClientId,
    writer: &mut OwnedWriteHalf,
    replies: &mut mpsc::Receiver<ServerMessage>,
    replies_open: bool,
    write_timeout: Duration,
) -> WriterExit {
    if !replies_open {
        return WriterExit::Teardown;
    }
    loop {
        match replies.try_recv() {
            Ok(message) => {
                if !write_frame(client_id, writer, &message, write_timeout).await {
                    return WriterExit::WriteFailed;
                }
            }
            Err(TryRecvError::Disconnected) => return WriterExit::Teardown,
            Err(TryRecvError::Empty) => {
                debug!(client_id = %client_id, "Session removed by registry, closing");
                let notice = ServerMessage::error(&FieldError::UnknownSession(client_id.clone()));
                if !write_frame(client_id, writer, &notice, write_timeout).await {
                    return WriterExit::WriteFailed;
                }
                return WriterExit::SessionRemoved;
            }
        }
    }
}

/// Write one frame. False once the socket is unusable.
async fn write_frame(
    client_id: &ClientId,
    writer: &mut OwnedWriteHalf,
    message: &ServerMessage,
    write_timeout: Duration,
) -> bool {
    let frame = match encode_line(message) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(client_id = %client_id, error = %e, "Dropping unencodable frame");
            return true;
        }
    };
    let send = async {
        writer.write_all(&frame).await?;
        writer.flush().await
    };
    match tokio::time::timeout(write_timeout, send).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(client_id = %client_id, error = %e, "Write failed");
            false
        }
        Err(_) => {
            warn!(client_id = %client_id, "Write timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harmonic_kernel::HubConfig;
    use serde_json::Value;
    use tokio::io::duplex;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    async fn next_json<R: AsyncBufRead + Unpin>(lines: &mut tokio::io::Lines<R>) -> Option<Value> {
        let line = timeout(Duration::from_secs(2), lines.next_line())
            .await
            .expect("line within timeout")
            .unwrap()?;
        Some(serde_json::from_str(&line).unwrap())
    }

    #[tokio::test]
    async fn test_removed_session_is_told_and_closed() {
        let hub = Arc::new(FieldHub::new(HubConfig::deterministic()).unwrap());
        let (client, server) = socket_pair().await;
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(handle_connection(hub.clone(), server, shutdown_rx));

        let mut lines = BufReader::new(client).lines();
        let greeting = next_json(&mut lines).await.unwrap();
        assert_eq!(greeting["type"], "connected");
        let client_id = greeting["clientId"].as_str().unwrap().to_string();

        // Same path a sweep or a failed delivery takes
        assert!(hub.close_session(&client_id));

        let notice = next_json(&mut lines).await.unwrap();
        assert_eq!(notice["type"], "error");
        assert_eq!(notice["code"], "unknown_session");
        assert!(next_json(&mut lines).await.is_none());

        let reason = timeout(Duration::from_secs(2), worker).await.unwrap().unwrap();
        assert_eq!(reason, CloseReason::Evicted);
    }

    #[tokio::test]
    async fn test_shutdown_closes_without_notice() {
        let hub = Arc::new(FieldHub::new(HubConfig::deterministic()).unwrap());
        let (client, server) = socket_pair().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(handle_connection(hub.clone(), server, shutdown_rx));

        let mut lines = BufReader::new(client).lines();
        assert_eq!(next_json(&mut lines).await.unwrap()["type"], "connected");

        shutdown_tx.send(true).unwrap();
        assert!(next_json(&mut lines).await.is_none());

        let reason = timeout(Duration::from_secs(2), worker).await.unwrap().unwrap();
        assert_eq!(reason, CloseReason::Shutdown);
        assert_eq!(hub.field_stats().active_count, 0);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_before_newline() {
        let (mut client, server) = duplex(4096);
        let mut reader = FrameReader::new(server);
        let (resume_tx, resume_rx) = oneshot::channel::<()>();

        let sender = tokio::spawn(async move {
            client.write_all(&vec![b'x'; MAX_FRAME_BYTES + 100]).await.unwrap();
            resume_rx.await.unwrap();
            client.write_all(b"xxxx\n{\"type\":\"heartbeat\"}\n").await.unwrap();
            client
        });

        let frame = timeout(Duration::from_secs(2), reader.next::<ClientMessage>())
            .await
            .expect("error before any newline");
        match frame {
            Frame::Malformed(detail) => assert!(detail.contains("byte limit")),
            other => panic!("expected oversize error, got {:?}", other),
        }

        resume_tx.send(()).unwrap();
        let frame = timeout(Duration::from_secs(2), reader.next::<ClientMessage>())
            .await
            .unwrap();
        assert!(matches!(frame, Frame::Message(ClientMessage::Heartbeat)));
        drop(sender.await.unwrap());
    }

    #[tokio::test]
    async fn test_blank_lines_skipped_and_eof_closes() {
        let (mut client, server) = duplex(1024);
        let mut reader = FrameReader::new(server);
        client.write_all(b"\n  \n{\"type\":\"heartbeat\"}\n").await.unwrap();
        drop(client);

        assert!(matches!(
            reader.next::<ClientMessage>().await,
            Frame::Message(ClientMessage::Heartbeat)
        ));
        assert!(matches!(reader.next::<ClientMessage>().await, Frame::Closed));
    }
}
