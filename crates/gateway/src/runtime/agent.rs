//! Agent variants — the small sum type behind the per-connection
//! message handler, plus the factory keyed on the configured kind.

use async_trait::async_trait;

use aris_domain::error::Result;

use crate::state::AppState;

use super::cancel::CancelToken;
use super::conversation::Turn;
use super::event_bus::EventBus;
use super::orchestrator::{InboundRequest, SessionOrchestrator};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent kind
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    /// The full planning/execution pipeline.
    Manufacturing,
    /// Deterministic echo responder, useful for channel testing.
    Generic,
}

impl AgentKind {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "generic" => Self::Generic,
            "manufacturing" => Self::Manufacturing,
            other => {
                tracing::warn!(kind = other, "unknown agent kind, defaulting to manufacturing");
                Self::Manufacturing
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent trait + factory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-connection message handler.
#[async_trait]
pub trait Agent: Send {
    async fn process_message(&mut self, inbound: &InboundRequest) -> Result<()>;

    fn set_runtime_options(&mut self, inbound: &InboundRequest);

    /// A small window of recent turns (for external relevance checks).
    fn recent_messages(&self) -> Vec<Turn>;
}

/// Build the agent for a new connection.
pub fn build_agent(
    kind: AgentKind,
    state: AppState,
    session_id: &str,
    user_id: &str,
    bus: EventBus,
    cancel: CancelToken,
) -> Box<dyn Agent> {
    match kind {
        AgentKind::Manufacturing => Box::new(ManufacturingAgent {
            orchestrator: SessionOrchestrator::new(state, session_id, user_id, bus, cancel),
        }),
        AgentKind::Generic => Box::new(GenericAgent { bus }),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Variants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ManufacturingAgent {
    orchestrator: SessionOrchestrator,
}

#[async_trait]
impl Agent for ManufacturingAgent {
    async fn process_message(&mut self, inbound: &InboundRequest) -> Result<()> {
        self.orchestrator.process_message(inbound).await
    }

    fn set_runtime_options(&mut self, inbound: &InboundRequest) {
        self.orchestrator.set_runtime_options(inbound);
    }

    fn recent_messages(&self) -> Vec<Turn> {
        self.orchestrator.recent_messages(5)
    }
}

struct GenericAgent {
    bus: EventBus,
}

#[async_trait]
impl Agent for GenericAgent {
    async fn process_message(&mut self, inbound: &InboundRequest) -> Result<()> {
        let reply = format!("[generic] You said: {}", inbound.text());
        self.bus
            .final_message(reply, serde_json::Value::Object(Default::default()))
            .await;
        Ok(())
    }

    fn set_runtime_options(&mut self, _inbound: &InboundRequest) {}

    fn recent_messages(&self) -> Vec<Turn> {
        Vec::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
