//! Prometheus scrape endpoint.
//!
//! Just enough HTTP/1.1 for a scraper: read the request head, answer any
//! GET with the text exposition, close the connection.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::debug;

use harmonic_kernel::FieldHub;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Upper bound on how long a scraper may take to send its request head.
const HEAD_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the full HTTP response for a request line.
pub fn respond(hub: &FieldHub, request_line: &str) -> String {
    let method = request_line.split_whitespace().next().unwrap_or("");
    if method != "GET" {
        return http_response("405 Method Not Allowed", "text/plain", "only GET is supported\n");
    }
    match hub.metrics().render() {
        Ok(body) => http_response("200 OK", CONTENT_TYPE, &body),
        Err(e) => http_response("500 Internal Server Error", "text/plain", &format!("{}\n", e)),
    }
}

fn http_response(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    )
}

/// Answer one scrape and close.
pub async fn handle_scrape(hub: Arc<FieldHub>, stream: TcpStream) -> Result<()> {
    let (reader_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader_half);

    let request_line = timeout(HEAD_TIMEOUT, async {
        let mut request_line = String::new();
        reader.read_line(&mut request_line).await?;
        // Drain headers up to the blank line
        loop {
            let mut header = String::new();
            let n = reader.read_line(&mut header).await?;
            if n == 0 || header.trim().is_empty() {
                break;
            }
        }
        Ok::<_, std::io::Error>(request_line)
    })
    .await
    .context("Timed out reading scrape request")?
    .context("Failed to read scrape request")?;

    debug!(request = %request_line.trim_end(), "Metrics scrape");
    writer
        .write_all(respond(&hub, &request_line).as_bytes())
        .await
        .context("Failed to write scrape response")?;
    writer.shutdown().await.ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use harmonic_kernel::HubConfig;

    #[tokio::test]
    async fn test_get_returns_exposition() {
        let hub = FieldHub::new(HubConfig::deterministic()).unwrap();
        hub.run_fast_tick();

        let response = respond(&hub, "GET /metrics HTTP/1.1\r\n");
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("harmonic_ticks_total 1"));
        assert!(response.contains("harmonic_active_sessions 0"));
    }

    #[tokio::test]
    async fn test_other_methods_rejected() {
        let hub = FieldHub::new(HubConfig::deterministic()).unwrap();
        let response = respond(&hub, "POST /metrics HTTP/1.1\r\n");
        assert!(response.starts_with("HTTP/1.1 405"));
    }
}
