//! Built-in LLM tools used by the executioner for analysis and response
//! actions, plus the session-memory tools exposed alongside the remote
//! catalog.
//!
//! Every operation returns a JSON envelope rather than an error: a
//! failure becomes `{"error": "..."}` and the executioner converts that
//! into an action failure.

use std::sync::Arc;

use serde_json::Value;

use aris_domain::config::Config;
use aris_domain::plan::{ActionStatus, ActionType, ExecutionPlan};
use aris_domain::tool::Message;
use aris_providers::LlmClient;
use aris_store::MemoryStore;

const FORMAT_SYSTEM: &str = "You are a data formatting specialist. Format raw \
data into professional, well-structured documents.";

const RESPONSE_SYSTEM: &str = "You are ARIS, a helpful assistant. Generate \
professional responses acknowledging completed actions.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Toolkit
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct LlmToolkit {
    llm: Arc<dyn LlmClient>,
    memory: MemoryStore,
    config: Arc<Config>,
}

impl LlmToolkit {
    pub fn new(llm: Arc<dyn LlmClient>, memory: MemoryStore, config: Arc<Config>) -> Self {
        Self { llm, memory, config }
    }

    /// Tools the executioner serves locally instead of dispatching.
    pub fn is_builtin(tool_name: &str) -> bool {
        matches!(tool_name, "search_memory" | "get_memory_item")
    }

    pub async fn call_builtin(&self, session_id: &str, tool_name: &str, arguments: &Value) -> Value {
        match tool_name {
            "search_memory" => self.search_memory(session_id, arguments).await,
            "get_memory_item" => self.get_memory_item(session_id, arguments).await,
            other => serde_json::json!({ "error": format!("unknown built-in tool: {other}") }),
        }
    }

    // ── format for document ──────────────────────────────────────────

    /// Reformat a stored value into document-ready content.
    pub async fn format_for_document(
        &self,
        session_id: &str,
        data_source_key: &str,
        format_type: &str,
        title: &str,
        model_id: &str,
    ) -> Value {
        let raw = match self.memory.get(session_id, data_source_key).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                return serde_json::json!({ "error": format!("no data found for key: {data_source_key}") })
            }
            Err(e) => return serde_json::json!({ "error": format!("memory read failed: {e}") }),
        };

        let raw_rendered = serde_json::to_string_pretty(&raw).unwrap_or_else(|_| raw.to_string());
        let prompt = format!(
            r#"Format the following raw data into a well-structured document suitable for document creation.

TITLE: {title}
FORMAT TYPE: {format_type}

RAW DATA:
{raw_rendered}

Please format this data into a clear, professional document structure with:
1. Executive Summary
2. Key Metrics and Highlights
3. Detailed Sections (organized by data type)
4. Conclusions and Insights

Return ONLY the formatted content that should go into the document."#
        );

        tracing::info!(session_id, data_source_key, format_type, "formatting data for document");
        match self.complete(model_id, prompt, FORMAT_SYSTEM, self.config.llm.planner_temperature).await {
            Ok(formatted) => {
                let formatted_size = formatted.len();
                serde_json::json!({
                    "success": true,
                    "formatted_content": formatted,
                    "title": title,
                    "format_type": format_type,
                    "original_data_size": raw_rendered.len(),
                    "formatted_size": formatted_size,
                })
            }
            Err(e) => serde_json::json!({ "error": format!("data formatting failed: {e}") }),
        }
    }

    // ── response generation ──────────────────────────────────────────

    /// Compose the user-facing reply from everything the plan
    /// accomplished.
    pub async fn generate_response(
        &self,
        session_id: &str,
        user_query: &str,
        plan: &ExecutionPlan,
        model_id: &str,
    ) -> Value {
        let mut completed_names = Vec::new();
        let mut result_lines = Vec::new();

        for action in &plan.actions {
            if action.status != ActionStatus::Completed {
                continue;
            }
            completed_names.push(action.name.clone());

            if action.action_type != ActionType::ToolCall {
                continue;
            }
            let key = format!("tool_result_{}", action.action_id);
            let Ok(Some(result)) = self.memory.get(session_id, &key).await else {
                continue;
            };
            if let Some(line) = summarize_result(&action.name, action.tool_name.as_deref(), &result, &self.config) {
                result_lines.push(line);
            }
        }

        let actions_summary = if completed_names.is_empty() {
            String::new()
        } else {
            format!(
                "Completed actions:\n{}",
                completed_names
                    .iter()
                    .map(|n| format!("- {n}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            )
        };
        let results_summary = if result_lines.is_empty() {
            String::new()
        } else {
            format!(
                "Results:\n{}",
                result_lines
                    .iter()
                    .map(|r| format!("- {r}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            )
        };

        let prompt = format!(
            r#"Generate a professional response to the user based on the completed actions and results.

USER QUERY: "{user_query}"

{actions_summary}

{results_summary}

Generate a clear, helpful response that:
1. Acknowledges what was accomplished
2. Provides relevant details (like download links)
3. Confirms successful completion
4. Is professional and user-friendly

Return ONLY the response message text."#
        );

        tracing::info!(
            session_id,
            completed = completed_names.len(),
            "generating final response"
        );
        match self
            .complete(model_id, prompt, RESPONSE_SYSTEM, self.config.llm.response_temperature)
            .await
        {
            Ok(text) => serde_json::json!({
                "success": true,
                "response_text": text,
                "actions_count": completed_names.len(),
                "results_count": result_lines.len(),
            }),
            Err(e) => serde_json::json!({ "error": format!("response generation failed: {e}") }),
        }
    }

    // ── memory tools ─────────────────────────────────────────────────

    async fn search_memory(&self, session_id: &str, arguments: &Value) -> Value {
        let pattern = arguments["pattern"].as_str();
        let outcome = if let Some(tool) = arguments["tool_name"].as_str() {
            self.memory.by_tool(session_id, tool).await
        } else if let Some(tag) = arguments["tag"].as_str() {
            self.memory.by_tag(session_id, tag).await
        } else {
            self.memory.list_keys(session_id, pattern).await
        };
        match outcome {
            Ok(keys) => {
                let count = keys.len();
                serde_json::json!({ "success": true, "keys": keys, "count": count })
            }
            Err(e) => serde_json::json!({ "error": format!("memory search failed: {e}") }),
        }
    }

    async fn get_memory_item(&self, session_id: &str, arguments: &Value) -> Value {
        let Some(key) = arguments["key"].as_str() else {
            return serde_json::json!({ "error": "key parameter is required" });
        };
        match self.memory.get(session_id, key).await {
            Ok(Some(value)) => serde_json::json!({ "success": true, "key": key, "value": value }),
            Ok(None) => serde_json::json!({ "error": format!("no memory item for key: {key}") }),
            Err(e) => serde_json::json!({ "error": format!("memory read failed: {e}") }),
        }
    }

    // ── plumbing ─────────────────────────────────────────────────────

    async fn complete(
        &self,
        model_id: &str,
        prompt: String,
        system: &str,
        temperature: f32,
    ) -> aris_domain::Result<String> {
        aris_providers::converse(
            self.llm.as_ref(),
            model_id,
            vec![Message::user(prompt)],
            Some(system.to_owned()),
            temperature,
            Vec::new(),
            None,
            aris_providers::DEFAULT_MAX_RECURSIONS,
        )
        .await
    }
}

/// One human-readable line per notable tool result, fed to the
/// response-generation prompt.
fn summarize_result(action_name: &str, tool_name: Option<&str>, result: &Value, config: &Config) -> Option<String> {
    if let Some(url) = result.get("file_url").and_then(Value::as_str) {
        let name = result
            .get("file_name")
            .and_then(Value::as_str)
            .unwrap_or("document");
        return Some(format!("{action_name}: created '{name}' (download: {url})"));
    }
    if result.get("jwt_token").is_some() {
        let user = result.get("user").and_then(Value::as_str).unwrap_or("user");
        return Some(format!("{action_name}: authentication completed for {user}"));
    }
    if let Some(tool) = tool_name {
        if config.tools.is_data_tool(tool) {
            let size = result.to_string().len();
            return Some(format!("{action_name}: retrieved {size} chars of data"));
        }
    }
    Some(format!("{action_name}: completed successfully"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
