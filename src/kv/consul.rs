//! Consul HTTP client.
//!
//! Watches are implemented with blocking queries: each poll passes the
//! last seen `X-Consul-Index` and a wait duration, and the agent holds
//! the request until something under the watched path changes or the
//! wait expires. Transport errors never terminate a watch; the poll
//! loop logs and retries after a delay. An index that moves backwards
//! is reset to zero per the Consul API contract.

use super::{KeyWatch, KvClient, PrefixChange, PrefixWatch, WatchHandle};
use crate::core::error::{TrellisError, TrellisResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Delay before re-polling after a transport error.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Consul KV client.
#[derive(Clone)]
pub struct ConsulKv {
    endpoint: String,
    token: Option<String>,
    wait: Duration,
    http: reqwest::Client,
}

/// Raw KV record as returned by `/v1/kv`.
#[derive(Debug, Deserialize)]
struct KvRecord {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: Option<String>,
    #[serde(rename = "ModifyIndex")]
    modify_index: u64,
}

impl KvRecord {
    /// Decode the base64 value payload to text.
    fn decode(&self) -> TrellisResult<String> {
        let raw = match &self.value {
            Some(encoded) => BASE64
                .decode(encoded)
                .map_err(|e| TrellisError::kv(format!("bad base64 for {}: {e}", self.key)))?,
            None => Vec::new(),
        };
        String::from_utf8(raw)
            .map_err(|e| TrellisError::kv(format!("non-UTF-8 value for {}: {e}", self.key)))
    }
}

impl ConsulKv {
    /// Create a client for the given agent endpoint.
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        wait: Duration,
    ) -> TrellisResult<Self> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        // Long polls hold the connection for the full wait; give the
        // transport some slack on top of it.
        let http = reqwest::Client::builder()
            .timeout(wait + Duration::from_secs(15))
            .build()
            .map_err(|e| TrellisError::kv(format!("http client: {e}")))?;
        Ok(Self {
            endpoint,
            token,
            wait,
            http,
        })
    }

    fn kv_url(&self, path: &str) -> String {
        format!("{}/v1/kv/{}", self.endpoint, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.request(method, self.kv_url(path));
        if let Some(token) = &self.token {
            req = req.header("X-Consul-Token", token);
        }
        req
    }

    /// One blocking-query round for a prefix listing.
    async fn list(&self, prefix: &str, index: u64) -> TrellisResult<(Vec<KvRecord>, u64)> {
        let response = self
            .request(reqwest::Method::GET, prefix)
            .query(&[
                ("recurse", "true".to_string()),
                ("index", index.to_string()),
                ("wait", format!("{}s", self.wait.as_secs())),
            ])
            .send()
            .await
            .map_err(|e| TrellisError::kv(format!("list {prefix}: {e}")))?;

        let next_index = consul_index(&response);
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok((Vec::new(), next_index));
        }
        let response = response
            .error_for_status()
            .map_err(|e| TrellisError::kv(format!("list {prefix}: {e}")))?;
        let records: Vec<KvRecord> = response
            .json()
            .await
            .map_err(|e| TrellisError::kv(format!("list {prefix}: {e}")))?;
        Ok((records, next_index))
    }

    /// One blocking-query round for a single key.
    async fn fetch(&self, key: &str, index: u64) -> TrellisResult<(Option<KvRecord>, u64)> {
        let response = self
            .request(reqwest::Method::GET, key)
            .query(&[
                ("index", index.to_string()),
                ("wait", format!("{}s", self.wait.as_secs())),
            ])
            .send()
            .await
            .map_err(|e| TrellisError::kv(format!("get {key}: {e}")))?;

        let next_index = consul_index(&response);
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok((None, next_index));
        }
        let response = response
            .error_for_status()
            .map_err(|e| TrellisError::kv(format!("get {key}: {e}")))?;
        let mut records: Vec<KvRecord> = response
            .json()
            .await
            .map_err(|e| TrellisError::kv(format!("get {key}: {e}")))?;
        Ok((records.pop(), next_index))
    }
}

/// Extract `X-Consul-Index` from a response, defaulting to zero.
fn consul_index(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get("X-Consul-Index")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Sleep for the reconnect delay unless stopped first.
///
/// Returns false when the watch should exit.
async fn reconnect_pause(stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(RECONNECT_DELAY) => true,
        _ = stop.changed() => false,
    }
}

impl KvClient for ConsulKv {
    fn watch_prefix(
        &self,
        prefix: &str,
    ) -> Pin<Box<dyn Future<Output = TrellisResult<PrefixWatch>> + Send + '_>> {
        let client = self.clone();
        let prefix = prefix.to_string();
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            let (stop_tx, mut stop_rx) = watch::channel(false);

            let task = tokio::spawn(async move {
                let mut index = 0u64;
                let mut seen: HashMap<String, (u64, String)> = HashMap::new();
                loop {
                    let poll = tokio::select! {
                        result = client.list(&prefix, index) => result,
                        _ = stop_rx.changed() => break,
                    };
                    let (records, next_index) = match poll {
                        Ok(round) => round,
                        Err(e) => {
                            tracing::warn!(prefix = %prefix, error = %e, "prefix poll failed; retrying");
                            if reconnect_pause(&mut stop_rx).await {
                                continue;
                            }
                            break;
                        }
                    };
                    index = if next_index < index { 0 } else { next_index };

                    let mut next: HashMap<String, (u64, String)> = HashMap::new();
                    for record in records {
                        match record.decode() {
                            Ok(value) => {
                                next.insert(record.key, (record.modify_index, value));
                            }
                            Err(e) => tracing::warn!(error = %e, "skipping undecodable kv entry"),
                        }
                    }

                    let mut closed = false;
                    for (key, (modify_index, value)) in &next {
                        let change = match seen.get(key) {
                            None => Some(PrefixChange::New {
                                key: key.clone(),
                                value: value.clone(),
                            }),
                            Some((old, _)) if old != modify_index => Some(PrefixChange::Updated {
                                key: key.clone(),
                                value: value.clone(),
                            }),
                            Some(_) => None,
                        };
                        if let Some(change) = change {
                            closed |= tx.send(change).is_err();
                        }
                    }
                    for key in seen.keys() {
                        if !next.contains_key(key) {
                            closed |= tx.send(PrefixChange::Removed { key: key.clone() }).is_err();
                        }
                    }
                    if closed {
                        break;
                    }
                    seen = next;
                }
            });

            Ok(PrefixWatch {
                events: rx,
                handle: WatchHandle::new(stop_tx, task),
            })
        })
    }

    fn watch_key(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = TrellisResult<KeyWatch>> + Send + '_>> {
        let client = self.clone();
        let key = key.to_string();
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            let (stop_tx, mut stop_rx) = watch::channel(false);

            let task = tokio::spawn(async move {
                let mut index = 0u64;
                // ModifyIndex of the last sent value; None before the first send.
                let mut last_sent: Option<Option<u64>> = None;
                loop {
                    let poll = tokio::select! {
                        result = client.fetch(&key, index) => result,
                        _ = stop_rx.changed() => break,
                    };
                    let (record, next_index) = match poll {
                        Ok(round) => round,
                        Err(e) => {
                            tracing::warn!(key = %key, error = %e, "key poll failed; retrying");
                            if reconnect_pause(&mut stop_rx).await {
                                continue;
                            }
                            break;
                        }
                    };
                    index = if next_index < index { 0 } else { next_index };

                    let current = record.as_ref().map(|r| r.modify_index);
                    if last_sent != Some(current) {
                        let value = match &record {
                            Some(r) => match r.decode() {
                                Ok(text) => Some(text),
                                Err(e) => {
                                    tracing::warn!(key = %key, error = %e, "undecodable watch value");
                                    None
                                }
                            },
                            None => None,
                        };
                        if tx.send(value).is_err() {
                            break;
                        }
                        last_sent = Some(current);
                    }
                }
            });

            Ok(KeyWatch {
                values: rx,
                handle: WatchHandle::new(stop_tx, task),
            })
        })
    }

    fn put(
        &self,
        path: &str,
        body: &str,
    ) -> Pin<Box<dyn Future<Output = TrellisResult<()>> + Send + '_>> {
        let path = path.to_string();
        let body = body.to_string();
        Box::pin(async move {
            let response = self
                .request(reqwest::Method::PUT, &path)
                .body(body)
                .send()
                .await
                .map_err(|e| TrellisError::kv(format!("put {path}: {e}")))?
                .error_for_status()
                .map_err(|e| TrellisError::kv(format!("put {path}: {e}")))?;
            let accepted = response
                .text()
                .await
                .map_err(|e| TrellisError::kv(format!("put {path}: {e}")))?;
            if accepted.trim() == "true" {
                Ok(())
            } else {
                Err(TrellisError::kv(format!("put {path}: agent rejected write")))
            }
        })
    }

    fn delete(&self, path: &str) -> Pin<Box<dyn Future<Output = TrellisResult<()>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            self.request(reqwest::Method::DELETE, &path)
                .send()
                .await
                .map_err(|e| TrellisError::kv(format!("delete {path}: {e}")))?
                .error_for_status()
                .map_err(|e| TrellisError::kv(format!("delete {path}: {e}")))?;
            Ok(())
        })
    }
}
