use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Agent variant selector ("manufacturing" or "generic").
    #[serde(default = "d_agent_kind")]
    pub agent_kind: String,
    /// Conversation turns kept in the per-session window.
    #[serde(default = "d_recent_window")]
    pub recent_window: usize,
    /// Turns of that window shown to the planner.
    #[serde(default = "d_planner_context_turns")]
    pub planner_context_turns: usize,
    /// Keep-alive ping cadence on the client channel.
    #[serde(default = "d_ping_interval")]
    pub ping_interval_secs: u64,
    /// Cadence of the expired-memory sweeper.
    #[serde(default = "d_sweep_interval")]
    pub memory_sweep_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            agent_kind: d_agent_kind(),
            recent_window: d_recent_window(),
            planner_context_turns: d_planner_context_turns(),
            ping_interval_secs: d_ping_interval(),
            memory_sweep_interval_secs: d_sweep_interval(),
        }
    }
}

fn d_agent_kind() -> String {
    "manufacturing".into()
}

fn d_recent_window() -> usize {
    5
}

fn d_planner_context_turns() -> usize {
    3
}

fn d_ping_interval() -> u64 {
    5
}

fn d_sweep_interval() -> u64 {
    30
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tool-name classes used by template-label heuristics and response
/// summarization. These are hints, not a registry — unknown tools work
/// fine, they just don't get preferential template matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Tools that produce a downloadable document (preferred targets for
    /// `file_url`/`url` template paths).
    #[serde(default = "d_document_tools")]
    pub document_tools: Vec<String>,
    /// Tools known to return structured data payloads.
    #[serde(default = "d_data_tools")]
    pub data_tools: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            document_tools: d_document_tools(),
            data_tools: d_data_tools(),
        }
    }
}

impl ToolsConfig {
    pub fn is_document_tool(&self, tool_name: &str) -> bool {
        self.document_tools.iter().any(|t| t == tool_name)
    }

    pub fn is_data_tool(&self, tool_name: &str) -> bool {
        self.data_tools.iter().any(|t| t == tool_name)
    }
}

fn d_document_tools() -> Vec<String> {
    vec!["create_pdf".into()]
}

fn d_data_tools() -> Vec<String> {
    vec![
        "create_pdf".into(),
        "get_fake_data".into(),
        "get_machine".into(),
        "get_machine_group".into(),
        "get_production_summary".into(),
    ]
}
