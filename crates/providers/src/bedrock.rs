//! Bedrock Converse adapter.
//!
//! Speaks the Bedrock runtime Converse HTTP API
//! (`POST {base}/model/{model_id}/converse`) authenticated with a
//! long-lived bearer API key. The endpoint is derived from the
//! configured region unless `llm.base_url` overrides it (gateways,
//! tests).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use aris_domain::config::LlmConfig;
use aris_domain::error::{Error, Result};
use aris_domain::tool::{ContentPart, Message, Role, ToolSpec, ToolUse, ToolUseResult};

use crate::traits::{ChatRequest, ChatTurn, LlmClient, StopReason};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct BedrockProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl BedrockProvider {
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        let base_url = cfg
            .base_url
            .clone()
            .unwrap_or_else(|| format!("https://bedrock-runtime.{}.amazonaws.com", cfg.region))
            .trim_end_matches('/')
            .to_owned();

        let api_key = std::env::var(&cfg.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(
                env_var = %cfg.api_key_env,
                "no Bedrock API key in environment — LLM calls will be rejected"
            );
        }

        Ok(Self { http, base_url, api_key })
    }

    fn converse_url(&self, model_id: &str) -> String {
        format!("{}/model/{model_id}/converse", self.base_url)
    }
}

#[async_trait]
impl LlmClient for BedrockProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatTurn> {
        let body = WireRequest::from(req);
        tracing::debug!(
            model_id = %req.model_id,
            temperature = req.temperature,
            messages = req.messages.len(),
            tools = req.tools.len(),
            "Bedrock converse"
        );

        let mut rb = self.http.post(self.converse_url(&req.model_id)).json(&body);
        if let Some(key) = &self.api_key {
            rb = rb.bearer_auth(key);
        }

        let resp = rb.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("Bedrock converse ({})", req.model_id))
            } else {
                Error::Provider {
                    provider: "bedrock".into(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: "bedrock".into(),
                message: format!("converse returned {status}: {body}"),
            });
        }

        let wire: WireResponse = resp.json().await.map_err(|e| Error::Provider {
            provider: "bedrock".into(),
            message: format!("decoding converse response: {e}"),
        })?;

        Ok(wire.into_turn())
    }

    fn provider_id(&self) -> &str {
        "bedrock"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire shapes (request)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest {
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    system: Vec<WireSystem>,
    inference_config: WireInferenceConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_config: Option<WireToolConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: Vec<WireContent>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum WireContent {
    #[serde(rename = "text")]
    Text(String),
    ToolUse(WireToolUse),
    ToolResult(WireToolResult),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireToolUse {
    tool_use_id: String,
    name: String,
    input: Value,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireToolResult {
    tool_use_id: String,
    content: Vec<WireToolResultContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolResultContent {
    text: String,
}

#[derive(Debug, Serialize)]
struct WireSystem {
    text: String,
}

#[derive(Debug, Serialize)]
struct WireInferenceConfig {
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct WireToolConfig {
    tools: Vec<WireTool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireTool {
    tool_spec: WireToolSpec,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireToolSpec {
    name: String,
    description: String,
    input_schema: WireSchema,
}

#[derive(Debug, Serialize)]
struct WireSchema {
    json: Value,
}

impl From<&ChatRequest> for WireRequest {
    fn from(req: &ChatRequest) -> Self {
        let tool_config = if req.tools.is_empty() {
            None
        } else {
            Some(WireToolConfig {
                tools: req.tools.iter().map(WireTool::from).collect(),
            })
        };
        Self {
            messages: req.messages.iter().map(WireMessage::from).collect(),
            system: req
                .system
                .iter()
                .map(|text| WireSystem { text: text.clone() })
                .collect(),
            inference_config: WireInferenceConfig {
                temperature: req.temperature,
            },
            tool_config,
        }
    }
}

impl From<&ToolSpec> for WireTool {
    fn from(spec: &ToolSpec) -> Self {
        Self {
            tool_spec: WireToolSpec {
                name: spec.name.clone(),
                description: spec.description.clone(),
                input_schema: WireSchema {
                    json: spec.input_schema.clone(),
                },
            },
        }
    }
}

impl From<&Message> for WireMessage {
    fn from(msg: &Message) -> Self {
        let role = match msg.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let content = msg
            .content
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => WireContent::Text(text.clone()),
                ContentPart::ToolUse { tool_use } => WireContent::ToolUse(WireToolUse {
                    tool_use_id: tool_use.id.clone(),
                    name: tool_use.name.clone(),
                    input: tool_use.input.clone(),
                }),
                ContentPart::ToolResult { tool_result } => WireContent::ToolResult(WireToolResult {
                    tool_use_id: tool_result.tool_use_id.clone(),
                    content: vec![WireToolResultContent {
                        text: tool_result.content.clone(),
                    }],
                    status: tool_result.is_error.then(|| "error".to_owned()),
                }),
            })
            .collect();
        Self {
            role: role.to_owned(),
            content,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire shapes (response)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    output: WireOutput,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireOutput {
    message: WireMessage,
}

impl WireResponse {
    fn into_turn(self) -> ChatTurn {
        let content = self
            .output
            .message
            .content
            .into_iter()
            .map(|part| match part {
                WireContent::Text(text) => ContentPart::Text { text },
                WireContent::ToolUse(tu) => ContentPart::ToolUse {
                    tool_use: ToolUse {
                        id: tu.tool_use_id,
                        name: tu.name,
                        input: tu.input,
                    },
                },
                WireContent::ToolResult(tr) => ContentPart::ToolResult {
                    tool_result: ToolUseResult {
                        tool_use_id: tr.tool_use_id,
                        content: tr
                            .content
                            .into_iter()
                            .map(|c| c.text)
                            .collect::<Vec<_>>()
                            .join("\n"),
                        is_error: tr.status.as_deref() == Some("error"),
                    },
                },
            })
            .collect();

        let stop_reason = match self.stop_reason.as_deref() {
            Some("tool_use") => StopReason::ToolUse,
            Some("max_tokens") => StopReason::MaxTokens,
            None | Some("end_turn") | Some("stop_sequence") => StopReason::EndTurn,
            Some(other) => StopReason::Other(other.to_owned()),
        };

        ChatTurn {
            message: Message {
                role: Role::Assistant,
                content,
            },
            stop_reason,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_shape() {
        let req = ChatRequest {
            model_id: "model-x".into(),
            messages: vec![Message::user("hello")],
            system: Some("be brief".into()),
            temperature: 0.1,
            tools: vec![ToolSpec {
                name: "get_fake_data".into(),
                description: "fetch".into(),
                input_schema: serde_json::json!({"type": "object"}),
            }],
        };
        let wire = serde_json::to_value(WireRequest::from(&req)).unwrap();

        assert_eq!(wire["messages"][0]["role"], "user");
        assert_eq!(wire["messages"][0]["content"][0]["text"], "hello");
        assert_eq!(wire["system"][0]["text"], "be brief");
        assert_eq!(wire["inferenceConfig"]["temperature"], 0.1);
        assert_eq!(wire["toolConfig"]["tools"][0]["toolSpec"]["name"], "get_fake_data");
        assert_eq!(
            wire["toolConfig"]["tools"][0]["toolSpec"]["inputSchema"]["json"]["type"],
            "object"
        );
    }

    #[test]
    fn request_without_tools_omits_tool_config() {
        let req = ChatRequest {
            model_id: "model-x".into(),
            messages: vec![Message::user("hi")],
            system: None,
            temperature: 0.2,
            tools: Vec::new(),
        };
        let wire = serde_json::to_value(WireRequest::from(&req)).unwrap();
        assert!(wire.get("toolConfig").is_none());
        assert!(wire.get("system").is_none());
    }

    #[test]
    fn tool_result_wire_shape() {
        let msg = Message {
            role: Role::User,
            content: vec![ContentPart::ToolResult {
                tool_result: ToolUseResult {
                    tool_use_id: "t1".into(),
                    content: "{\"ok\":true}".into(),
                    is_error: false,
                },
            }],
        };
        let wire = serde_json::to_value(WireMessage::from(&msg)).unwrap();
        let tr = &wire["content"][0]["toolResult"];
        assert_eq!(tr["toolUseId"], "t1");
        assert_eq!(tr["content"][0]["text"], "{\"ok\":true}");
        assert!(tr.get("status").is_none());
    }

    #[test]
    fn response_parses_text_turn() {
        let raw = serde_json::json!({
            "output": {
                "message": {
                    "role": "assistant",
                    "content": [{"text": "hello back"}]
                }
            },
            "stopReason": "end_turn"
        });
        let wire: WireResponse = serde_json::from_value(raw).unwrap();
        let turn = wire.into_turn();
        assert_eq!(turn.text(), "hello back");
        assert_eq!(turn.stop_reason, StopReason::EndTurn);
        assert!(turn.tool_uses().is_empty());
    }

    #[test]
    fn response_parses_tool_use_turn() {
        let raw = serde_json::json!({
            "output": {
                "message": {
                    "role": "assistant",
                    "content": [
                        {"text": "let me check"},
                        {"toolUse": {"toolUseId": "c1", "name": "get_machine", "input": {"id": "M-7"}}}
                    ]
                }
            },
            "stopReason": "tool_use"
        });
        let wire: WireResponse = serde_json::from_value(raw).unwrap();
        let turn = wire.into_turn();
        assert_eq!(turn.stop_reason, StopReason::ToolUse);
        let uses = turn.tool_uses();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].name, "get_machine");
        assert_eq!(uses[0].input, serde_json::json!({"id": "M-7"}));
    }

    #[test]
    fn base_url_derives_from_region() {
        let cfg = LlmConfig {
            region: "eu-west-1".into(),
            ..LlmConfig::default()
        };
        let provider = BedrockProvider::from_config(&cfg).unwrap();
        assert_eq!(
            provider.converse_url("model:1"),
            "https://bedrock-runtime.eu-west-1.amazonaws.com/model/model:1/converse"
        );
    }
}
