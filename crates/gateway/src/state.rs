use std::sync::Arc;

use aris_domain::config::Config;
use aris_mcp_client::McpDispatcher;
use aris_providers::LlmClient;
use aris_store::{MemoryStore, PlanStore, SessionStore};

use crate::runtime::ingest::DocumentIngestor;

/// Shared application state handed to every connection.
///
/// Process-wide services (store handles, the MCP dispatcher, the LLM
/// client) are constructed once in `main.rs` and passed explicitly into
/// each session orchestrator — no globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    // ── Persistence ───────────────────────────────────────────────────
    pub sessions: SessionStore,
    pub plans: PlanStore,
    pub memory: MemoryStore,

    // ── Collaborators ─────────────────────────────────────────────────
    pub mcp: Arc<McpDispatcher>,
    pub llm: Arc<dyn LlmClient>,
    pub ingestor: Arc<dyn DocumentIngestor>,

    // ── Security (startup-computed) ──────────────────────────────────
    /// SHA-256 hash of the client bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
}
