//! Read-only query endpoint.
//!
//! A small HTTP/1.1 surface over plain TCP. `GET /state` injects a
//! `GetState` event into the reconciler and returns the snapshot as
//! JSON; every other request is a 404. The endpoint never touches
//! engine state directly.

use crate::core::error::{TrellisError, TrellisResult};
use crate::engine::EngineHandle;
use bytes::BytesMut;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Largest request head accepted before the connection is rejected.
const MAX_REQUEST_BYTES: usize = 8 * 1024;

/// Bind and serve the query endpoint until shutdown.
pub async fn serve(
    bind: SocketAddr,
    engine: EngineHandle,
    shutdown: watch::Receiver<bool>,
) -> TrellisResult<()> {
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|e| TrellisError::query(format!("bind {bind}: {e}")))?;
    serve_with(listener, engine, shutdown).await
}

/// Serve on an already-bound listener.
pub async fn serve_with(
    listener: TcpListener,
    engine: EngineHandle,
    mut shutdown: watch::Receiver<bool>,
) -> TrellisResult<()> {
    if let Ok(local) = listener.local_addr() {
        tracing::info!(bind = %local, "query endpoint listening");
    }

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    let engine = engine.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, engine).await {
                            tracing::debug!(remote = %remote, error = %e, "connection error");
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
        }
    }
    tracing::info!("query endpoint stopped");
    Ok(())
}

/// Read one request, answer it, close.
async fn handle_connection(mut stream: TcpStream, engine: EngineHandle) -> std::io::Result<()> {
    let mut buffer = BytesMut::with_capacity(1024);
    while !head_complete(&buffer) {
        if buffer.len() > MAX_REQUEST_BYTES {
            return respond(&mut stream, "400 Bad Request", "text/plain", "Bad request").await;
        }
        if stream.read_buf(&mut buffer).await? == 0 {
            return Ok(());
        }
    }

    match parse_request_line(&buffer) {
        Some((method, path)) if method == "GET" && path == "/state" => {
            match engine.snapshot().await {
                Some(snapshot) => {
                    let body = serde_json::to_string(&snapshot)
                        .unwrap_or_else(|_| "{}".to_string());
                    respond(&mut stream, "200 OK", "application/json", &body).await
                }
                None => {
                    respond(
                        &mut stream,
                        "503 Service Unavailable",
                        "text/plain",
                        "Engine stopped",
                    )
                    .await
                }
            }
        }
        Some(_) => respond(&mut stream, "404 Not Found", "text/plain", "Not found").await,
        None => respond(&mut stream, "400 Bad Request", "text/plain", "Bad request").await,
    }
}

/// Check for the end-of-head marker.
fn head_complete(buffer: &[u8]) -> bool {
    buffer.windows(4).any(|w| w == b"\r\n\r\n") || buffer.windows(2).any(|w| w == b"\n\n")
}

/// Extract (method, path) from the request line.
fn parse_request_line(buffer: &[u8]) -> Option<(String, String)> {
    let text = std::str::from_utf8(buffer).ok()?;
    let line = text.lines().next()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();
    // Request line must carry an HTTP version.
    parts.next()?;
    Some((method, path))
}

async fn respond(
    stream: &mut TcpStream,
    status: &str,
    content_type: &str,
    body: &str,
) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {length}\r\nConnection: close\r\n\r\n{body}",
        length = body.len(),
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_line_parsing() {
        assert_eq!(
            parse_request_line(b"GET /state HTTP/1.1\r\nHost: x\r\n\r\n"),
            Some(("GET".to_string(), "/state".to_string()))
        );
        assert_eq!(
            parse_request_line(b"POST /other HTTP/1.0\r\n\r\n"),
            Some(("POST".to_string(), "/other".to_string()))
        );
        assert_eq!(parse_request_line(b"GET\r\n\r\n"), None);
        assert_eq!(parse_request_line(b"GET /state\r\n\r\n"), None);
    }

    #[test]
    fn head_detection() {
        assert!(head_complete(b"GET / HTTP/1.1\r\n\r\n"));
        assert!(head_complete(b"GET / HTTP/1.1\n\n"));
        assert!(!head_complete(b"GET / HTTP/1.1\r\n"));
    }
}
