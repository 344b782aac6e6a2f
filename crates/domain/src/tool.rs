//! Provider-agnostic LLM message types, tool specs, and discovered tool
//! descriptors. Every LLM adapter converts between these and its wire
//! format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A message in the conversation window or an LLM request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentPart {
    Text { text: String },
    ToolUse { tool_use: ToolUse },
    ToolResult { tool_result: ToolUseResult },
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// A tool result fed back to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseResult {
    pub tool_use_id: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    /// Join all text parts with newlines; non-text parts are skipped.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool specs & descriptors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool definition passed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's input.
    pub input_schema: Value,
}

/// A tool discovered from a remote server, as surfaced to the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    /// Name of the server that owns the tool.
    pub server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default)]
    pub requires_auth: bool,
}

impl ToolDescriptor {
    /// Render the descriptor for the planning prompt: name, description,
    /// and one line per schema property with type and required marker.
    pub fn prompt_block(&self) -> String {
        let mut out = format!("• {}: {}", self.name, self.description);
        let required: Vec<&str> = self.input_schema["required"]
            .as_array()
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if let Some(props) = self.input_schema["properties"].as_object() {
            for (param, details) in props {
                let ty = details["type"].as_str().unwrap_or("unknown");
                let desc = details["description"].as_str().unwrap_or("No description");
                let star = if required.contains(&param.as_str()) { "*" } else { "" };
                out.push_str(&format!("\n  - {param} ({ty}{star}): {desc}"));
            }
        }
        out
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_text_joins_parts() {
        let msg = Message {
            role: Role::Assistant,
            content: vec![
                ContentPart::Text { text: "one".into() },
                ContentPart::ToolUse {
                    tool_use: ToolUse {
                        id: "t1".into(),
                        name: "exec".into(),
                        input: serde_json::json!({}),
                    },
                },
                ContentPart::Text { text: "two".into() },
            ],
        };
        assert_eq!(msg.text(), "one\ntwo");
    }

    #[test]
    fn prompt_block_marks_required_params() {
        let desc = ToolDescriptor {
            name: "get_fake_data".into(),
            description: "Retrieve sample production data".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "result_variable_name": {
                        "type": "string",
                        "description": "Memory variable to store the result in"
                    },
                    "limit": { "type": "integer" }
                },
                "required": ["result_variable_name"]
            }),
            server: "core".into(),
            capability: None,
            domain: None,
            requires_auth: false,
        };
        let block = desc.prompt_block();
        assert!(block.starts_with("• get_fake_data: Retrieve sample production data"));
        assert!(block.contains("result_variable_name (string*)"));
        assert!(block.contains("limit (integer)"));
    }

    #[test]
    fn prompt_block_without_schema_is_one_line() {
        let desc = ToolDescriptor {
            name: "ping".into(),
            description: "Liveness check".into(),
            input_schema: serde_json::json!({}),
            server: "core".into(),
            capability: None,
            domain: None,
            requires_auth: false,
        };
        assert_eq!(desc.prompt_block(), "• ping: Liveness check");
    }
}
