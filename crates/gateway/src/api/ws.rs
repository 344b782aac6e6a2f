//! WebSocket client channel.
//!
//! Flow:
//! 1. Client connects to `/ws?token=<bearer>` (or sends an
//!    `Authorization: Bearer` header); the token is verified before any
//!    session state is created.
//! 2. Each inbound text frame is one JSON request; frames are processed
//!    strictly one at a time per connection.
//! 3. Outbound frames flow through the per-session event bus into one
//!    writer task; a ping frame goes out every ~5 seconds.
//! 4. On disconnect the session's cancel token stops new work;
//!    in-flight statuses still reach the plan store.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::runtime::agent::{build_agent, AgentKind};
use crate::runtime::cancel::CancelToken;
use crate::runtime::event_bus::EventBus;
use crate::runtime::orchestrator::InboundRequest;
use crate::state::AppState;

use super::auth;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query params
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Bearer token (alternative to the Authorization header).
    pub token: Option<String>,
    /// Resume an existing session instead of minting a new id.
    pub session_id: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /ws — upgrade to the client channel.
pub async fn client_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let header_token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let provided = query.token.as_deref().or(header_token);

    let claims = match auth::verify_bearer(state.api_token_hash.as_deref(), provided) {
        Ok(claims) => claims,
        Err(()) => {
            return (
                axum::http::StatusCode::UNAUTHORIZED,
                "invalid or missing bearer token",
            )
                .into_response();
        }
    };

    let session_id = query
        .session_id
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id, claims))
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_socket(socket: WebSocket, state: AppState, session_id: String, claims: auth::Claims) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    tracing::info!(
        session_id = %session_id,
        user_id = %claims.user_id,
        "client connected"
    );

    let (bus, mut outbound_rx) = EventBus::new(session_id.clone(), 64);
    let cancel = CancelToken::new();

    // Writer task: the single consumer of the session's event stream.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize outbound frame");
                    continue;
                }
            };
            if ws_sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // Keep-alive pings.
    let ping_bus = bus.clone();
    let ping_interval = state.config.sessions.ping_interval_secs;
    let pinger = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(ping_interval.max(1)));
        loop {
            interval.tick().await;
            ping_bus.ping().await;
        }
    });

    let kind = AgentKind::parse(&state.config.sessions.agent_kind);
    let mut agent = build_agent(
        kind,
        state,
        &session_id,
        &claims.user_id,
        bus.clone(),
        cancel.clone(),
    );

    // Read loop: one request at a time, in order.
    while let Some(Ok(message)) = ws_stream.next().await {
        match message {
            Message::Text(text) => {
                let inbound: InboundRequest = match serde_json::from_str(&text) {
                    Ok(inbound) => inbound,
                    Err(_) => {
                        bus.error("invalid_json").await;
                        continue;
                    }
                };

                agent.set_runtime_options(&inbound);
                if let Err(e) = agent.process_message(&inbound).await {
                    tracing::error!(session_id = %session_id, error = %e, "message processing failed");
                    bus.error(format!("processing_failed: {e}")).await;
                }
            }
            Message::Close(_) => break,
            // axum answers WS-level pings automatically.
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    // The client is gone: stop emitting and stop issuing new work.
    cancel.cancel();
    bus.close();
    pinger.abort();
    writer.abort();
    tracing::info!(session_id = %session_id, "client disconnected");
}
