//! `aris-providers` — the LLM collaborator.
//!
//! [`LlmClient`] is the provider seam: one `chat` round-trip in, one
//! assistant turn out. [`converse`] builds the full "model may request
//! tool use; orchestrator executes; model resumes" loop on top of it,
//! bounded by a recursion limit. [`BedrockProvider`] adapts the trait to
//! the Bedrock Converse HTTP API.

pub mod bedrock;
pub mod traits;

pub use bedrock::BedrockProvider;
pub use traits::{converse, ChatRequest, ChatTurn, LlmClient, StopReason, ToolExecutor, DEFAULT_MAX_RECURSIONS};
