//! MCP transport layer.
//!
//! Remote servers speak JSON-RPC 2.0 over HTTP: each request is a POST
//! to the server's endpoint, each response the matching JSON-RPC body.
//! The trait keeps the dispatcher testable — integration tests inject a
//! scripted transport instead of a live server.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::protocol::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait + errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP: {0}")]
    Http(String),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timeout waiting for response")]
    Timeout,

    #[error(transparent)]
    Rpc(#[from] JsonRpcError),

    #[error("server connection is down")]
    Down,
}

/// Trait for MCP server transports.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a JSON-RPC request and wait for the matching result value.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, TransportError>;

    /// Send a JSON-RPC notification (no response expected).
    async fn notify(&self, method: &str) -> Result<(), TransportError>;

    /// Whether the transport believes the server is reachable.
    fn is_alive(&self) -> bool;

    /// Record a connection loss; callers treat the server as down until
    /// the next successful request.
    fn mark_failed(&self);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// HTTP JSON-RPC transport. One per configured server; the underlying
/// `reqwest::Client` maintains a connection pool shared across sessions.
pub struct HttpTransport {
    http: reqwest::Client,
    url: String,
    /// Static bearer key sent with every request (transport-level auth).
    api_key: Option<String>,
    next_id: AtomicU64,
    alive: AtomicBool,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self {
            http,
            url: url.into(),
            api_key,
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        })
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn post(&self, body: &impl serde::Serialize, timeout: Duration) -> Result<reqwest::Response, TransportError> {
        let mut rb = self.http.post(&self.url).json(body).timeout(timeout);
        if let Some(key) = &self.api_key {
            rb = rb.bearer_auth(key);
        }
        match rb.send().await {
            Ok(resp) => {
                self.alive.store(true, Ordering::SeqCst);
                Ok(resp)
            }
            Err(e) if e.is_timeout() => Err(TransportError::Timeout),
            Err(e) => {
                if e.is_connect() {
                    self.alive.store(false, Ordering::SeqCst);
                }
                Err(TransportError::Http(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let id = self.next_request_id();
        let req = JsonRpcRequest::new(id, method, params);
        tracing::debug!(id, method, url = %self.url, "sending MCP request");

        let resp = self.post(&req, timeout).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!("{method} returned {status}: {body}")));
        }

        let parsed: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| TransportError::Http(format!("decoding {method} response: {e}")))?;
        if parsed.id != id {
            tracing::warn!(expected = id, got = parsed.id, "MCP response id mismatch");
        }
        Ok(parsed.into_result()?)
    }

    async fn notify(&self, method: &str) -> Result<(), TransportError> {
        let notif = JsonRpcNotification::new(method);
        tracing::debug!(method, url = %self.url, "sending MCP notification");
        let resp = self.post(&notif, Duration::from_secs(10)).await?;
        // Notifications have no body; a non-2xx still signals trouble.
        if !resp.status().is_success() {
            return Err(TransportError::Http(format!(
                "{method} returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn mark_failed(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
