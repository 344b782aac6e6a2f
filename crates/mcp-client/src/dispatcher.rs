//! MCP dispatcher — holds all server connections and orchestrates tool
//! discovery, routing, auth, result normalization, and plan-status side
//! effects.
//!
//! Degradation is per-server: an unreachable server contributes nothing
//! to discovery and fails only the calls routed to it. When a
//! [`PlanContext`] accompanies a call, the dispatcher owns the action's
//! starting/in_progress/terminal transitions, committing each to the
//! plan store BEFORE notifying the observer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use aris_domain::config::{McpConfig, McpServerConfig};
use aris_domain::plan::ActionStatus;
use aris_domain::tool::ToolDescriptor;
use aris_store::PlanStore;

use crate::protocol::{self, CallToolResult, ToolsListResult};
use crate::transport::{HttpTransport, McpTransport, TransportError};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("MCP transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("MCP server not found: {0}")]
    ServerNotFound(String),

    #[error("no server provides tool: {0}")]
    ToolNotFound(String),

    #[error("MCP server {0} is not connected")]
    ServerDown(String),

    #[error("MCP auth: {0}")]
    Auth(String),
}

impl From<McpError> for aris_domain::Error {
    fn from(e: McpError) -> Self {
        aris_domain::Error::Mcp(e.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Receives a callback after every committed plan change. The gateway's
/// implementation re-reads the plan and publishes one `plan_update`
/// frame, which keeps the store-before-notify ordering by construction.
#[async_trait]
pub trait PlanObserver: Send + Sync {
    async fn plan_updated(&self, plan_id: &str);
}

/// When supplied with a call, the dispatcher drives the action's status
/// transitions so the UI sees them even if the caller forgets to.
pub struct PlanContext {
    pub plan_id: String,
    pub action_id: String,
    pub store: PlanStore,
    pub observer: Arc<dyn PlanObserver>,
}

impl PlanContext {
    /// Commit a transition, then notify. A rejected or failed commit
    /// suppresses the notification — the client must never observe a
    /// status the store does not hold.
    async fn commit(&self, status: ActionStatus, result: Option<Value>, error: Option<String>) {
        match self
            .store
            .update_action_status(&self.plan_id, &self.action_id, status, result, error)
            .await
        {
            Ok(()) => self.observer.plan_updated(&self.plan_id).await,
            Err(e) => {
                tracing::warn!(
                    plan_id = %self.plan_id,
                    action_id = %self.action_id,
                    status = status.as_str(),
                    error = %e,
                    "plan status commit failed, notification suppressed"
                );
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Configured,
    Connecting,
    Connected,
    Failed,
}

struct McpServer {
    config: McpServerConfig,
    transport: Arc<dyn McpTransport>,
    state: parking_lot::RwLock<ServerState>,
    /// Login-derived token; refreshed under this mutex so concurrent
    /// callers never stampede the login tool.
    token: Mutex<Option<String>>,
}

impl McpServer {
    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.effective_timeout_secs())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Discovery cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct DiscoveryCache {
    tool_to_server: HashMap<String, String>,
    server_tools: HashMap<String, Vec<ToolDescriptor>>,
    refreshed_at: Option<Instant>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct McpDispatcher {
    servers: HashMap<String, Arc<McpServer>>,
    cache: Mutex<DiscoveryCache>,
    discovery_ttl: Duration,
}

impl McpDispatcher {
    /// Build from configuration with HTTP transports. The shared static
    /// API key (if any) is read from the configured env var once.
    pub fn from_config(config: &McpConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        let mut servers = HashMap::new();
        for server_config in &config.servers {
            match HttpTransport::new(server_config.url.clone(), api_key.clone()) {
                Ok(transport) => {
                    servers.insert(
                        server_config.name.clone(),
                        Arc::new(McpServer {
                            config: server_config.clone(),
                            transport: Arc::new(transport),
                            state: parking_lot::RwLock::new(ServerState::Configured),
                            token: Mutex::new(None),
                        }),
                    );
                }
                Err(e) => {
                    tracing::warn!(server = %server_config.name, error = %e, "failed to build MCP transport, skipping");
                }
            }
        }
        Self {
            servers,
            cache: Mutex::new(DiscoveryCache::default()),
            discovery_ttl: Duration::from_secs(config.discovery_ttl_secs),
        }
    }

    /// Build with injected transports (used by tests).
    pub fn with_transports(entries: Vec<(McpServerConfig, Arc<dyn McpTransport>)>, discovery_ttl: Duration) -> Self {
        let servers = entries
            .into_iter()
            .map(|(config, transport)| {
                let name = config.name.clone();
                (
                    name,
                    Arc::new(McpServer {
                        config,
                        transport,
                        state: parking_lot::RwLock::new(ServerState::Configured),
                        token: Mutex::new(None),
                    }),
                )
            })
            .collect();
        Self {
            servers,
            cache: Mutex::new(DiscoveryCache::default()),
            discovery_ttl,
        }
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    // ── connection management ────────────────────────────────────────

    /// Open the connection if needed: MCP `initialize` handshake followed
    /// by the `initialized` notification.
    async fn ensure_connected(&self, server: &Arc<McpServer>) -> Result<(), McpError> {
        if *server.state.read() == ServerState::Connected && server.transport.is_alive() {
            return Ok(());
        }
        *server.state.write() = ServerState::Connecting;

        let params = serde_json::to_value(protocol::initialize_params())
            .map_err(|e| McpError::Transport(TransportError::Json(e)))?;
        let handshake = async {
            server
                .transport
                .request("initialize", Some(params), Duration::from_secs(10))
                .await?;
            server.transport.notify("notifications/initialized").await
        }
        .await;

        match handshake {
            Ok(()) => {
                *server.state.write() = ServerState::Connected;
                tracing::info!(server = %server.config.name, "MCP server connected");
                Ok(())
            }
            Err(e) => {
                *server.state.write() = ServerState::Failed;
                server.transport.mark_failed();
                tracing::warn!(server = %server.config.name, error = %e, "MCP server connection failed");
                Err(McpError::Transport(e))
            }
        }
    }

    /// Open all configured connections and warm up auth tokens.
    /// Idempotent; per-server results, never a global failure.
    pub async fn start_all(&self) -> HashMap<String, Result<(), McpError>> {
        let mut results = HashMap::new();
        for (name, server) in &self.servers {
            let mut outcome = self.ensure_connected(server).await;
            if outcome.is_ok() && server.config.requires_auth {
                if let Err(e) = self.ensure_token(server).await {
                    tracing::warn!(server = %name, error = %e, "auth warm-up failed");
                    outcome = Err(e);
                }
            }
            results.insert(name.clone(), outcome);
        }
        results
    }

    // ── discovery ────────────────────────────────────────────────────

    async fn refresh_discovery(&self, force: bool) {
        let mut cache = self.cache.lock().await;
        if !force {
            if let Some(at) = cache.refreshed_at {
                if at.elapsed() < self.discovery_ttl && !cache.tool_to_server.is_empty() {
                    return;
                }
            }
        }

        let mut tool_to_server = HashMap::new();
        let mut server_tools: HashMap<String, Vec<ToolDescriptor>> = HashMap::new();

        for (name, server) in &self.servers {
            if self.ensure_connected(server).await.is_err() {
                continue;
            }
            let listed = server
                .transport
                .request("tools/list", None, Duration::from_secs(10))
                .await;
            let tools = match listed {
                Ok(raw) => match serde_json::from_value::<ToolsListResult>(raw) {
                    Ok(result) => result.tools,
                    Err(e) => {
                        tracing::warn!(server = %name, error = %e, "failed to parse tools/list result");
                        continue;
                    }
                },
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "tools/list failed, skipping server");
                    server.transport.mark_failed();
                    *server.state.write() = ServerState::Failed;
                    continue;
                }
            };

            let descriptors: Vec<ToolDescriptor> = tools
                .into_iter()
                .map(|tool| {
                    tool_to_server.insert(tool.name.clone(), name.clone());
                    ToolDescriptor {
                        name: tool.name,
                        description: tool.description,
                        input_schema: tool.input_schema,
                        server: name.clone(),
                        capability: tool.meta.capability,
                        domain: tool.meta.domain,
                        requires_auth: tool.meta.requires_auth || server.config.requires_auth,
                    }
                })
                .collect();
            tracing::info!(server = %name, tools = descriptors.len(), "discovered tools");
            server_tools.insert(name.clone(), descriptors);
        }

        cache.tool_to_server = tool_to_server;
        cache.server_tools = server_tools;
        cache.refreshed_at = Some(Instant::now());
    }

    /// Union of tools across currently connected servers.
    pub async fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.refresh_discovery(false).await;
        let cache = self.cache.lock().await;
        let mut tools: Vec<ToolDescriptor> = cache.server_tools.values().flatten().cloned().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Cached tool → server lookup.
    pub async fn tool_server(&self, tool_name: &str) -> Option<String> {
        self.refresh_discovery(false).await;
        self.cache.lock().await.tool_to_server.get(tool_name).cloned()
    }

    // ── auth ─────────────────────────────────────────────────────────

    /// Return the server's login token, performing the login call if
    /// none is held. Serialized per server by the token mutex.
    async fn ensure_token(&self, server: &Arc<McpServer>) -> Result<String, McpError> {
        let mut slot = server.token.lock().await;
        if let Some(token) = slot.as_ref() {
            return Ok(token.clone());
        }
        let token = self.login(server).await?;
        *slot = Some(token.clone());
        Ok(token)
    }

    async fn invalidate_token(&self, server: &Arc<McpServer>) {
        *server.token.lock().await = None;
    }

    /// Invoke the server's designated login tool with credentials from
    /// the environment and extract the token field from its result.
    async fn login(&self, server: &Arc<McpServer>) -> Result<String, McpError> {
        let auth = server
            .config
            .auth
            .as_ref()
            .ok_or_else(|| McpError::Auth(format!("server {} has no login configuration", server.config.name)))?;
        let username = std::env::var(&auth.username_env)
            .map_err(|_| McpError::Auth(format!("credential env {} is not set", auth.username_env)))?;
        let password = std::env::var(&auth.password_env)
            .map_err(|_| McpError::Auth(format!("credential env {} is not set", auth.password_env)))?;

        let result = self
            .invoke(server, &auth.login_tool, serde_json::json!({ "username": username, "password": password }))
            .await?;
        if let Some(message) = error_field(&result) {
            return Err(McpError::Auth(format!("login via {} failed: {message}", auth.login_tool)));
        }
        let token = result[&auth.token_field]
            .as_str()
            .ok_or_else(|| McpError::Auth(format!("login result is missing \"{}\"", auth.token_field)))?;
        tracing::info!(server = %server.config.name, "MCP login token obtained");
        Ok(token.to_owned())
    }

    /// Inject the login token into call arguments for auth-requiring
    /// servers (the login tool itself is exempt).
    async fn with_auth(
        &self,
        server: &Arc<McpServer>,
        tool_name: &str,
        mut arguments: Value,
    ) -> Result<Value, McpError> {
        let Some(auth) = server.config.auth.as_ref() else {
            return Ok(arguments);
        };
        if !server.config.requires_auth || tool_name == auth.login_tool {
            return Ok(arguments);
        }
        let token = self.ensure_token(server).await?;
        if let Value::Object(args) = &mut arguments {
            args.insert(auth.token_argument.clone(), Value::String(token));
        }
        Ok(arguments)
    }

    // ── calls ────────────────────────────────────────────────────────

    /// Raw `tools/call` to a server, normalized to a plain JSON value.
    async fn invoke(&self, server: &Arc<McpServer>, tool_name: &str, arguments: Value) -> Result<Value, McpError> {
        self.ensure_connected(server).await?;
        let params = serde_json::json!({ "name": tool_name, "arguments": arguments });
        match server
            .transport
            .request("tools/call", Some(params), server.timeout())
            .await
        {
            Ok(raw) => Ok(normalize_result(raw)),
            Err(e) => {
                if matches!(e, TransportError::Http(_) | TransportError::Down) {
                    // Connection loss: the server's tools are stale too.
                    server.transport.mark_failed();
                    *server.state.write() = ServerState::Failed;
                    self.cache.lock().await.refreshed_at = None;
                }
                Err(McpError::Transport(e))
            }
        }
    }

    /// Locate the owning server, inject auth, execute, and normalize.
    ///
    /// With a [`PlanContext`] the dispatcher also drives the action's
    /// `starting → in_progress → completed|failed` transitions. An
    /// authentication-class failure triggers exactly one silent
    /// re-login + retry; the second failure surfaces.
    pub async fn call(
        &self,
        tool_name: &str,
        arguments: Value,
        plan_context: Option<&PlanContext>,
    ) -> Result<Value, McpError> {
        if let Some(ctx) = plan_context {
            ctx.commit(ActionStatus::Starting, None, None).await;
        }

        let outcome = self.call_inner(tool_name, arguments, plan_context).await;

        if let Some(ctx) = plan_context {
            match &outcome {
                Ok(value) => match error_field(value) {
                    Some(message) => {
                        ctx.commit(ActionStatus::Failed, Some(value.clone()), Some(message))
                            .await
                    }
                    None => ctx.commit(ActionStatus::Completed, Some(value.clone()), None).await,
                },
                Err(e) => {
                    ctx.commit(ActionStatus::Failed, None, Some(e.to_string())).await;
                }
            }
        }

        outcome
    }

    async fn call_inner(
        &self,
        tool_name: &str,
        arguments: Value,
        plan_context: Option<&PlanContext>,
    ) -> Result<Value, McpError> {
        let server_name = match self.tool_server(tool_name).await {
            Some(name) => name,
            None => {
                // The owning server may have come back since the last
                // discovery pass; try once more before giving up.
                self.refresh_discovery(true).await;
                self.tool_server(tool_name)
                    .await
                    .ok_or_else(|| McpError::ToolNotFound(tool_name.to_owned()))?
            }
        };
        let server = self
            .servers
            .get(&server_name)
            .ok_or_else(|| McpError::ServerNotFound(server_name.clone()))?;

        tracing::info!(tool = tool_name, server = %server_name, "dispatching tool call");

        let prepared = self.with_auth(server, tool_name, arguments.clone()).await?;

        if let Some(ctx) = plan_context {
            ctx.commit(ActionStatus::InProgress, None, None).await;
        }

        let first = self.invoke(server, tool_name, prepared).await;
        if !server.config.requires_auth || !is_auth_failure(&first) {
            return self.capture_login_token(server, tool_name, first).await;
        }

        tracing::info!(tool = tool_name, server = %server_name, "auth failure, re-authenticating once");
        self.invalidate_token(server).await;
        let prepared = self.with_auth(server, tool_name, arguments).await?;
        let second = self.invoke(server, tool_name, prepared).await;
        self.capture_login_token(server, tool_name, second).await
    }

    /// A successful explicit call to the login tool refreshes the held
    /// token as a side effect.
    async fn capture_login_token(
        &self,
        server: &Arc<McpServer>,
        tool_name: &str,
        outcome: Result<Value, McpError>,
    ) -> Result<Value, McpError> {
        if let (Some(auth), Ok(value)) = (server.config.auth.as_ref(), &outcome) {
            if tool_name == auth.login_tool && error_field(value).is_none() {
                if let Some(token) = value[&auth.token_field].as_str() {
                    *server.token.lock().await = Some(token.to_owned());
                }
            }
        }
        outcome
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result normalization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Reduce a `tools/call` response to a plain JSON value.
///
/// Preference order: `structuredContent`, then text content parsed as
/// JSON, then the raw text. An `isError` result becomes an error
/// envelope. Content the protocol types cannot represent is wrapped as
/// `{data, error: "serialization failed"}` and treated as success.
pub fn normalize_result(raw: Value) -> Value {
    let result: CallToolResult = match serde_json::from_value(raw.clone()) {
        Ok(parsed) => parsed,
        // Not a standard envelope; the raw value is already plain JSON.
        Err(_) => return raw,
    };

    if result.is_error {
        let text = join_text(&result.content);
        let message = if text.is_empty() { "tool reported an error".to_owned() } else { text };
        return serde_json::json!({ "error": message });
    }

    if let Some(structured) = result.structured_content {
        return structured;
    }

    let texts: Vec<&protocol::ToolCallContent> =
        result.content.iter().filter(|c| c.content_type == "text").collect();
    if texts.len() != result.content.len() {
        // Binary or otherwise unrepresentable content.
        return serde_json::json!({
            "data": join_text(&result.content),
            "error": "serialization failed",
        });
    }

    match texts.as_slice() {
        [] => Value::Null,
        [single] => parse_or_string(&single.text),
        many => Value::Array(many.iter().map(|c| parse_or_string(&c.text)).collect()),
    }
}

fn join_text(content: &[protocol::ToolCallContent]) -> String {
    content
        .iter()
        .map(|c| c.text.as_str())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_or_string(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_owned()))
}

/// Extract a non-empty `error` field from a tool result object.
pub fn error_field(value: &Value) -> Option<String> {
    match value.get("error") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// Authentication-class failures: expired/invalid tokens, 401s.
fn is_auth_failure(outcome: &Result<Value, McpError>) -> bool {
    let message = match outcome {
        Ok(value) => match error_field(value) {
            Some(m) => m,
            None => return false,
        },
        Err(e) => e.to_string(),
    };
    let message = message.to_lowercase();
    ["unauthorized", "expired", "forbidden", "invalid token", "401"]
        .iter()
        .any(|marker| message.contains(marker))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
