//! Tests for the HTTP query endpoint.

mod common;

use common::{document_at, eventually, spawn_engine, TestEngine, NODES, ROLES};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use trellis::engine::state::StateSnapshot;
use trellis::kv::memory::MemoryKv;
use trellis::query;

/// Spawn the query endpoint for a running engine on an ephemeral port.
async fn spawn_query(t: &TestEngine) -> (std::net::SocketAddr, watch::Sender<bool>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = t.handle.clone();
    tokio::spawn(async move {
        query::serve_with(listener, handle, shutdown_rx).await.unwrap();
    });
    (addr, shutdown_tx)
}

/// Issue one raw HTTP request and return (status line, body).
async fn request(addr: std::net::SocketAddr, head: &str) -> (String, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(head.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    let status = response.lines().next().unwrap_or_default().to_string();
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();
    (status, body)
}

#[tokio::test]
async fn get_state_returns_snapshot_json() {
    let kv = MemoryKv::new();
    let t = spawn_engine(kv.clone());

    kv.set(
        format!("{NODES}/alpha"),
        r#"{"ip":"10.0.0.1","tags":{"dc":"eu"}}"#,
    );
    kv.set(
        format!("{ROLES}/web"),
        r#"{:matcher (eq :dc "eu") :services {:app {:image "web:1"}}}"#,
    );
    eventually(
        "service materialized",
        || document_at(&kv, "alpha", "app").is_some(),
    )
    .await;

    let (addr, _query_shutdown) = spawn_query(&t).await;
    let (status, body) = request(addr, "GET /state HTTP/1.1\r\nHost: test\r\n\r\n").await;

    assert_eq!(status, "HTTP/1.1 200 OK");
    let snapshot: StateSnapshot = serde_json::from_str(&body).unwrap();
    assert_eq!(snapshot.nodes.len(), 1);
    assert_eq!(snapshot.nodes[0].roles, vec!["web".to_string()]);
    assert_eq!(snapshot.roles.len(), 1);
    assert_eq!(snapshot.roles[0].nodes, vec!["alpha".to_string()]);
    assert_eq!(snapshot.roles[0].services, vec!["app".to_string()]);
    assert!(snapshot.watchers.is_empty());

    // Tag order must survive the JSON round trip.
    let raw: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(raw["nodes"][0]["tags"]["dc"], "eu");

    t.stop().await.unwrap();
}

#[tokio::test]
async fn unknown_paths_get_404() {
    let kv = MemoryKv::new();
    let t = spawn_engine(kv.clone());
    let (addr, _query_shutdown) = spawn_query(&t).await;

    let (status, body) = request(addr, "GET /other HTTP/1.1\r\nHost: test\r\n\r\n").await;
    assert_eq!(status, "HTTP/1.1 404 Not Found");
    assert_eq!(body, "Not found");

    let (status, _) = request(addr, "POST /state HTTP/1.1\r\nHost: test\r\n\r\n").await;
    assert_eq!(status, "HTTP/1.1 404 Not Found");

    t.stop().await.unwrap();
}

#[tokio::test]
async fn malformed_requests_get_400() {
    let kv = MemoryKv::new();
    let t = spawn_engine(kv.clone());
    let (addr, _query_shutdown) = spawn_query(&t).await;

    let (status, _) = request(addr, "NONSENSE\r\n\r\n").await;
    assert_eq!(status, "HTTP/1.1 400 Bad Request");

    t.stop().await.unwrap();
}
