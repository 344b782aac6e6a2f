//! Planner — turns (user query, recent turns, tool catalog) into an
//! execution plan.
//!
//! The LLM is asked for a strict JSON plan at low temperature. Anything
//! that fails to parse or violates the expected shape degrades to the
//! deterministic two-action fallback plan (analysis → response); a
//! planning failure is never fatal to the turn.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use aris_domain::config::Config;
use aris_domain::plan::{ActionType, ExecutionPlan, PlannedAction};
use aris_domain::tool::{Message, ToolDescriptor};
use aris_providers::LlmClient;

use super::conversation::{render_context, Turn};

const PLANNER_SYSTEM: &str = "You are an expert AI agent planner. Analyze user \
queries and create detailed execution plans using available tools.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Raw plan shape (what the LLM is asked to emit)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    actions: Vec<RawAction>,
}

#[derive(Debug, Deserialize)]
struct RawAction {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    r#type: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
    #[serde(default)]
    depends_on: Option<Vec<String>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Planner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    config: Arc<Config>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, config: Arc<Config>) -> Self {
        Self { llm, config }
    }

    /// Create a plan for one user message. Returns the plan without
    /// persisting it; persistence is the orchestrator's responsibility.
    pub async fn create_plan(
        &self,
        session_id: &str,
        user_query: &str,
        turns: &[Turn],
        tools: &[ToolDescriptor],
        model_id: &str,
    ) -> ExecutionPlan {
        let prompt = self.planning_prompt(user_query, turns, tools);
        tracing::info!(session_id, tools = tools.len(), "creating execution plan");

        let response = aris_providers::converse(
            self.llm.as_ref(),
            model_id,
            vec![Message::user(prompt)],
            Some(PLANNER_SYSTEM.to_owned()),
            self.config.llm.planner_temperature,
            Vec::new(),
            None,
            aris_providers::DEFAULT_MAX_RECURSIONS,
        )
        .await;

        match response {
            Ok(text) => match self.parse_plan(session_id, user_query, &text) {
                Some(plan) => {
                    tracing::info!(
                        session_id,
                        plan_id = %plan.plan_id,
                        actions = plan.actions.len(),
                        "execution plan created"
                    );
                    plan
                }
                None => {
                    tracing::warn!(session_id, "plan response failed to parse, using fallback plan");
                    fallback_plan(session_id, user_query)
                }
            },
            Err(e) => {
                tracing::warn!(session_id, error = %e, "planning LLM call failed, using fallback plan");
                fallback_plan(session_id, user_query)
            }
        }
    }

    fn planning_prompt(&self, user_query: &str, turns: &[Turn], tools: &[ToolDescriptor]) -> String {
        let tool_blocks: Vec<String> = tools.iter().map(ToolDescriptor::prompt_block).collect();
        let context_turns = turns
            .len()
            .min(self.config.sessions.planner_context_turns);
        let context_section = if context_turns == 0 {
            String::new()
        } else {
            let shown = &turns[turns.len() - context_turns..];
            format!("CONVERSATION CONTEXT:\n{}\n\n", render_context(shown))
        };

        format!(
            r#"Analyze this user query and create a detailed execution plan using the available tools.

USER QUERY: "{user_query}"

{context_section}AVAILABLE TOOLS:
{tools}

Create a JSON execution plan with this structure:
{{
    "summary": "Brief description of what will be accomplished",
    "actions": [
        {{
            "id": "unique-id",
            "type": "tool_call|analysis|response",
            "name": "Human-readable action name",
            "description": "What this action will accomplish",
            "tool_name": "exact_tool_name_if_tool_call",
            "arguments": {{"param1": "value1"}},
            "depends_on": ["id-of-earlier-action"]
        }}
    ]
}}

PLANNING GUIDELINES:
1. Only use tools that are actually available in the list above
2. Include analysis actions for complex reasoning
3. End with a response action to synthesize results
4. Express dependencies between actions through depends_on, using the ids you assigned
5. Be specific with tool arguments based on the user query
6. If the query is unclear, plan to ask for clarification

Return ONLY the JSON plan, no other text."#,
            tools = tool_blocks.join("\n"),
        )
    }

    /// Parse the LLM response into a plan, remapping LLM-minted action
    /// ids to fresh opaque ids and rewriting `depends_on` accordingly.
    /// Any shape violation yields `None` (→ fallback plan).
    fn parse_plan(&self, session_id: &str, user_query: &str, response: &str) -> Option<ExecutionPlan> {
        let json = extract_json_object(response)?;
        let raw: RawPlan = serde_json::from_value(json).ok()?;
        if raw.actions.is_empty() {
            return None;
        }

        let plan = ExecutionPlan::new(
            session_id,
            user_query,
            raw.summary.unwrap_or_else(|| "Execute user request".to_owned()),
        );

        // First pass: mint a fresh id for every LLM-supplied label.
        let mut id_map: HashMap<String, String> = HashMap::new();
        let mut minted: Vec<String> = Vec::with_capacity(raw.actions.len());
        for (i, raw_action) in raw.actions.iter().enumerate() {
            let label = raw_action.id.clone().unwrap_or_else(|| format!("action_{i}"));
            let fresh = uuid::Uuid::new_v4().to_string();
            id_map.insert(label, fresh.clone());
            minted.push(fresh);
        }

        // Second pass: build actions, rewriting dependencies. A
        // dependency that names no known label is dropped with a
        // warning; it is not an error.
        let mut actions = Vec::with_capacity(raw.actions.len());
        for (i, raw_action) in raw.actions.into_iter().enumerate() {
            let action_type = ActionType::parse(raw_action.r#type.as_deref().unwrap_or("analysis"))?;
            if action_type == ActionType::ToolCall
                && raw_action.tool_name.as_deref().unwrap_or("").is_empty()
            {
                return None;
            }

            let depends_on = raw_action
                .depends_on
                .unwrap_or_default()
                .into_iter()
                .filter_map(|dep| match id_map.get(&dep) {
                    Some(mapped) => Some(mapped.clone()),
                    None => {
                        tracing::warn!(dependency = %dep, "unknown dependency in plan, dropping");
                        None
                    }
                })
                .collect();

            let mut action = PlannedAction::new(
                &plan.plan_id,
                action_type,
                raw_action.name.unwrap_or_else(|| "Unnamed action".to_owned()),
                raw_action.description.unwrap_or_default(),
            );
            action.action_id = minted[i].clone();
            action.tool_name = raw_action.tool_name.filter(|t| !t.is_empty());
            action.arguments = match raw_action.arguments {
                Some(args @ Value::Object(_)) => args,
                Some(_) => return None,
                None => Value::Object(Default::default()),
            };
            action.depends_on = depends_on;
            actions.push(action);
        }

        Some(plan.with_actions(actions))
    }
}

/// Deterministic fallback: understand the request, then answer it.
pub fn fallback_plan(session_id: &str, user_query: &str) -> ExecutionPlan {
    let analyze = PlannedAction::new(
        "",
        ActionType::Analysis,
        "Analyze user request",
        "Understand what the user is asking for",
    );
    let mut respond = PlannedAction::new(
        "",
        ActionType::Response,
        "Provide response",
        "Generate a helpful response to the user",
    );
    respond.depends_on = vec![analyze.action_id.clone()];

    ExecutionPlan::new(session_id, user_query, "Process user request and provide response")
        .with_actions(vec![analyze, respond])
}

/// Pull the outermost JSON object out of a response that may be wrapped
/// in code fences or prose.
fn extract_json_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
