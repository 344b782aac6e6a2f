//! Provider trait and the tool-use conversation loop.

use async_trait::async_trait;
use serde_json::Value;

use aris_domain::error::Result;
use aris_domain::tool::{ContentPart, Message, Role, ToolSpec, ToolUse, ToolUseResult};

/// Bound on "model requests tools → orchestrator executes → model
/// resumes" rounds within one [`converse`] call.
pub const DEFAULT_MAX_RECURSIONS: usize = 5;

/// Reply returned when the recursion bound is exhausted.
const RECURSION_EXHAUSTED_REPLY: &str =
    "I apologize, but I've reached the maximum number of tool calls allowed.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One chat round-trip.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model_id: String,
    pub messages: Vec<Message>,
    pub system: Option<String>,
    pub temperature: f32,
    /// Tool definitions the model may invoke. Empty = plain completion.
    pub tools: Vec<ToolSpec>,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Other(String),
}

/// One assistant turn.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    /// The full assistant message, including tool-use parts — pushed
    /// back onto the conversation verbatim when the loop continues.
    pub message: Message,
    pub stop_reason: StopReason,
}

impl ChatTurn {
    pub fn text(&self) -> String {
        self.message.text()
    }

    pub fn tool_uses(&self) -> Vec<&ToolUse> {
        self.message
            .content
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolUse { tool_use } => Some(tool_use),
                _ => None,
            })
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The LLM provider seam. Implementations translate between the
/// internal types and their wire format.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatTurn>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}

/// Executes tool invocations on behalf of the model during [`converse`].
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute_tool(&self, name: &str, arguments: &Value) -> Result<Value>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Converse loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run a conversation to a final text answer.
///
/// Without tools this is a single `chat` call. With tools and an
/// executor, tool-use turns are executed and their results fed back as
/// user turns until the model stops requesting tools or the recursion
/// bound is hit. Individual tool failures are reported back to the
/// model, not surfaced as errors.
pub async fn converse(
    client: &dyn LlmClient,
    model_id: &str,
    messages: Vec<Message>,
    system: Option<String>,
    temperature: f32,
    tools: Vec<ToolSpec>,
    tool_executor: Option<&dyn ToolExecutor>,
    max_recursions: usize,
) -> Result<String> {
    let mut request = ChatRequest {
        model_id: model_id.to_owned(),
        messages,
        system,
        temperature,
        tools: Vec::new(),
    };

    let Some(executor) = tool_executor.filter(|_| !tools.is_empty()) else {
        tracing::debug!(model_id, temperature, "LLM call (simple mode)");
        return Ok(client.chat(&request).await?.text());
    };

    request.tools = tools;
    tracing::debug!(
        model_id,
        temperature,
        tools = request.tools.len(),
        "LLM call (tool mode)"
    );

    for _round in 0..max_recursions {
        let turn = client.chat(&request).await?;
        request.messages.push(turn.message.clone());

        if turn.stop_reason != StopReason::ToolUse {
            return Ok(turn.text());
        }

        let mut results = Vec::new();
        for tool_use in turn.tool_uses() {
            tracing::debug!(tool = %tool_use.name, "executing model-requested tool");
            let part = match executor.execute_tool(&tool_use.name, &tool_use.input).await {
                Ok(value) => ContentPart::ToolResult {
                    tool_result: ToolUseResult {
                        tool_use_id: tool_use.id.clone(),
                        content: serde_json::to_string(&value)?,
                        is_error: false,
                    },
                },
                Err(e) => {
                    tracing::warn!(tool = %tool_use.name, error = %e, "tool execution failed");
                    ContentPart::ToolResult {
                        tool_result: ToolUseResult {
                            tool_use_id: tool_use.id.clone(),
                            content: format!("Error: {e}"),
                            is_error: true,
                        },
                    }
                }
            };
            results.push(part);
        }

        request.messages.push(Message {
            role: Role::User,
            content: results,
        });
    }

    tracing::warn!(max_recursions, "tool recursion limit reached");
    Ok(RECURSION_EXHAUSTED_REPLY.to_owned())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Keeps requesting the same tool until `tool_rounds` is exhausted,
    /// then answers with plain text.
    struct FakeLlm {
        tool_rounds: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for FakeLlm {
        async fn chat(&self, req: &ChatRequest) -> Result<ChatTurn> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.tool_rounds && !req.tools.is_empty() {
                Ok(ChatTurn {
                    message: Message {
                        role: Role::Assistant,
                        content: vec![ContentPart::ToolUse {
                            tool_use: ToolUse {
                                id: format!("call-{call}"),
                                name: "lookup".into(),
                                input: serde_json::json!({"round": call}),
                            },
                        }],
                    },
                    stop_reason: StopReason::ToolUse,
                })
            } else {
                Ok(ChatTurn {
                    message: Message::assistant(format!("answer after {call} calls")),
                    stop_reason: StopReason::EndTurn,
                })
            }
        }

        fn provider_id(&self) -> &str {
            "fake"
        }
    }

    struct CountingExecutor {
        executions: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl ToolExecutor for CountingExecutor {
        async fn execute_tool(&self, _name: &str, _arguments: &Value) -> Result<Value> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(aris_domain::Error::Tool {
                    tool: "lookup".into(),
                    message: "boom".into(),
                })
            } else {
                Ok(serde_json::json!({"ok": true}))
            }
        }
    }

    fn tool_specs() -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: "lookup".into(),
            description: "Look something up".into(),
            input_schema: serde_json::json!({"type": "object"}),
        }]
    }

    #[tokio::test]
    async fn simple_mode_single_call() {
        let llm = FakeLlm { tool_rounds: 3, calls: AtomicUsize::new(0) };
        let text = converse(
            &llm,
            "model",
            vec![Message::user("hi")],
            None,
            0.1,
            Vec::new(),
            None,
            DEFAULT_MAX_RECURSIONS,
        )
        .await
        .unwrap();
        assert_eq!(text, "answer after 0 calls");
    }

    #[tokio::test]
    async fn tool_loop_executes_and_resumes() {
        let llm = FakeLlm { tool_rounds: 2, calls: AtomicUsize::new(0) };
        let executions = Arc::new(AtomicUsize::new(0));
        let executor = CountingExecutor { executions: executions.clone(), fail: false };

        let text = converse(
            &llm,
            "model",
            vec![Message::user("use tools")],
            Some("be helpful".into()),
            0.2,
            tool_specs(),
            Some(&executor),
            DEFAULT_MAX_RECURSIONS,
        )
        .await
        .unwrap();

        assert_eq!(text, "answer after 2 calls");
        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn tool_failure_is_reported_not_fatal() {
        let llm = FakeLlm { tool_rounds: 1, calls: AtomicUsize::new(0) };
        let executor = CountingExecutor { executions: Arc::new(AtomicUsize::new(0)), fail: true };

        let text = converse(
            &llm,
            "model",
            vec![Message::user("use tools")],
            None,
            0.2,
            tool_specs(),
            Some(&executor),
            DEFAULT_MAX_RECURSIONS,
        )
        .await
        .unwrap();
        // The model got the error result and still produced an answer.
        assert_eq!(text, "answer after 1 calls");
    }

    #[tokio::test]
    async fn recursion_bound_yields_apology() {
        let llm = FakeLlm { tool_rounds: usize::MAX, calls: AtomicUsize::new(0) };
        let executor = CountingExecutor { executions: Arc::new(AtomicUsize::new(0)), fail: false };

        let text = converse(
            &llm,
            "model",
            vec![Message::user("loop forever")],
            None,
            0.0,
            tool_specs(),
            Some(&executor),
            3,
        )
        .await
        .unwrap();
        assert_eq!(text, RECURSION_EXHAUSTED_REPLY);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    }
}
