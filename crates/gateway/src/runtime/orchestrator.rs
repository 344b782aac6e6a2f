//! Session orchestrator — sequences the work for one inbound message:
//! decide whether to plan anew, create and persist the plan, run the
//! executioner, and assemble the final reply from session memory.
//!
//! One orchestrator exists per client connection; within it, messages
//! are processed strictly one at a time (cooperative within a session,
//! parallel across sessions).

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use aris_domain::error::Result;
use aris_domain::plan::{ActionStatus, ActionType, ExecutionPlan};
use aris_mcp_client::PlanObserver;

use crate::state::AppState;

use super::cancel::CancelToken;
use super::conversation::ConversationWindow;
use super::event_bus::{BusPlanObserver, EventBus};
use super::executioner::Executioner;
use super::llm_tools::LlmToolkit;
use super::planner::Planner;
use super::truncate_str;

const PERSIST_FAILURE_REPLY: &str = "I encountered a critical error while \
creating the execution plan. Please try again or contact support if the \
problem persists.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound request
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One inbound client frame. Both `{message: ...}` and the older
/// `{action: "agent", question: ...}` shapes are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub doc_bucket: Option<String>,
    #[serde(default)]
    pub doc_key: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub rag_params: Option<Value>,
}

impl InboundRequest {
    /// The user's text, from whichever field carries it.
    pub fn text(&self) -> String {
        if let Some(message) = &self.message {
            return message.clone();
        }
        if self.action.as_deref() == Some("agent") {
            if let Some(question) = &self.question {
                return question.clone();
            }
        }
        String::new()
    }

    /// Model override: top-level `model_id` wins over
    /// `rag_params.model_params.model_id`.
    pub fn model_id(&self) -> Option<String> {
        if let Some(model) = &self.model_id {
            return Some(model.clone());
        }
        self.rag_params
            .as_ref()
            .and_then(|rp| rp["model_params"]["model_id"].as_str())
            .map(str::to_owned)
    }

    /// `rag_params.model_params.temperature`; anything unparseable is
    /// treated as unset.
    pub fn temperature(&self) -> Option<f32> {
        let raw = self.rag_params.as_ref()?.pointer("/model_params/temperature")?;
        match raw {
            Value::Number(n) => n.as_f64().map(|t| t as f32),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Search/guardrail toggles, recorded into session metadata.
    pub fn search_options(&self) -> Value {
        let Some(rp) = &self.rag_params else {
            return Value::Object(Default::default());
        };
        let pick = |primary: &str| -> bool {
            rp.pointer(&format!("/search/{primary}"))
                .or_else(|| rp.get(primary))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        };
        serde_json::json!({
            "deep_search": pick("deep_search"),
            "web_search": pick("web_search"),
            "guardrails": rp.get("guardrails").and_then(Value::as_bool).unwrap_or(false),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionOrchestrator {
    state: AppState,
    session_id: String,
    user_id: String,
    bus: EventBus,
    cancel: CancelToken,
    window: ConversationWindow,
    planner: Planner,
    toolkit: LlmToolkit,
    model_override: Option<String>,
    temperature_override: Option<f32>,
}

impl SessionOrchestrator {
    pub fn new(
        state: AppState,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        bus: EventBus,
        cancel: CancelToken,
    ) -> Self {
        let window = ConversationWindow::new(state.config.sessions.recent_window);
        let planner = Planner::new(state.llm.clone(), state.config.clone());
        let toolkit = LlmToolkit::new(state.llm.clone(), state.memory.clone(), state.config.clone());
        Self {
            state,
            session_id: session_id.into(),
            user_id: user_id.into(),
            bus,
            cancel,
            window,
            planner,
            toolkit,
            model_override: None,
            temperature_override: None,
        }
    }

    /// Apply per-request runtime options. Unknown model names fall back
    /// to the documented default; unparseable temperatures become unset.
    pub fn set_runtime_options(&mut self, inbound: &InboundRequest) {
        self.model_override = self
            .state
            .config
            .llm
            .resolve_model(inbound.model_id().as_deref());
        self.temperature_override = inbound.temperature();
    }

    pub fn recent_messages(&self, n: usize) -> Vec<super::conversation::Turn> {
        self.window.recent(n)
    }

    fn model_id(&self) -> String {
        self.model_override
            .clone()
            .unwrap_or_else(|| self.state.config.llm.default_model_id.clone())
    }

    /// Process one inbound message end-to-end, emitting frames as it
    /// goes. Always finishes with a `message` frame unless the bus has
    /// been closed.
    pub async fn process_message(&mut self, inbound: &InboundRequest) -> Result<()> {
        let model_id = self.model_id();
        tracing::info!(
            session_id = %self.session_id,
            model_id = %model_id,
            temperature = ?self.temperature_override,
            "processing message"
        );

        // ── Session record upkeep ───────────────────────────────────
        self.state
            .sessions
            .upsert(&self.session_id, &self.user_id, &self.state.config.sessions.agent_kind)
            .await?;
        self.state.sessions.set_model(&self.session_id, &model_id).await?;
        self.state
            .sessions
            .merge_metadata(&self.session_id, inbound.search_options())
            .await?;

        // ── Document ingestion (optional) ───────────────────────────
        let mut message_text = inbound.text();
        if let (Some(bucket), Some(key)) = (inbound.doc_bucket.as_deref(), inbound.doc_key.as_deref()) {
            match self.state.ingestor.ingest(bucket, key).await {
                Ok(doc) => {
                    self.bus.document_notice(doc.notice).await;
                    message_text = format!("{}\n\n{}", doc.context_text, message_text);
                }
                Err(e) => {
                    tracing::warn!(bucket, key, error = %e, "document ingestion failed");
                    self.bus.error(format!("doc_processing_failed: {e}")).await;
                }
            }
        }

        self.bus.progress("Thinking...").await;
        self.window.push_user(&message_text);

        // ── Plan decision: reuse the active plan or create anew ─────
        let plan = match self.state.plans.active_plan(&self.session_id).await? {
            Some(active) => {
                tracing::info!(
                    session_id = %self.session_id,
                    plan_id = %active.plan_id,
                    status = active.status.as_str(),
                    "active plan found, resuming"
                );
                self.bus.plan_update(&active).await;
                active
            }
            None => {
                self.bus.progress("Creating execution plan...").await;
                let tools = self.state.mcp.list_tools().await;
                let turns = self
                    .window
                    .recent(self.state.config.sessions.planner_context_turns + 1);
                // The planner sees the turns before the current message.
                let context = &turns[..turns.len().saturating_sub(1)];
                let plan = self
                    .planner
                    .create_plan(&self.session_id, &message_text, context, &tools, &model_id)
                    .await;

                // Persist before anything else; an unpersisted plan is
                // never executed.
                if let Err(e) = self.state.plans.create_plan(&plan).await {
                    tracing::error!(
                        session_id = %self.session_id,
                        plan_id = %plan.plan_id,
                        error = %e,
                        "plan persistence failed, aborting turn"
                    );
                    self.window.push_assistant(PERSIST_FAILURE_REPLY);
                    self.bus
                        .final_message(PERSIST_FAILURE_REPLY, Value::Object(Default::default()))
                        .await;
                    return Ok(());
                }

                self.bus.plan_create(&plan).await;
                plan
            }
        };

        // ── Execute ─────────────────────────────────────────────────
        self.bus.progress("Executing plan...").await;
        let observer: Arc<dyn PlanObserver> =
            Arc::new(BusPlanObserver::new(self.state.plans.clone(), self.bus.clone()));
        let executioner = Executioner::new(
            self.session_id.clone(),
            self.state.plans.clone(),
            self.state.memory.clone(),
            self.state.mcp.clone(),
            self.toolkit.clone(),
            observer,
            self.state.config.clone(),
            self.cancel.clone(),
            model_id,
        );
        let final_plan = match executioner.execute(&plan.plan_id).await {
            Ok(final_plan) => final_plan,
            Err(e) => {
                tracing::error!(plan_id = %plan.plan_id, error = %e, "plan execution errored");
                self.state.plans.get_plan(&plan.plan_id).await?.unwrap_or(plan)
            }
        };

        // ── Assemble the reply ──────────────────────────────────────
        let response_text = match self.response_text(&final_plan).await {
            Some(text) => text,
            None => fallback_reply(&final_plan),
        };
        let data = self.structured_data(&final_plan).await;

        self.window.push_assistant(&response_text);
        self.state.sessions.touch(&self.session_id).await?;

        tracing::info!(
            session_id = %self.session_id,
            plan_id = %final_plan.plan_id,
            plan_status = final_plan.status.as_str(),
            reply_preview = %truncate_str(&response_text, 120),
            "turn finished"
        );
        self.bus.final_message(response_text, data).await;
        Ok(())
    }

    /// Read the completed response action's `response_text` from
    /// session memory.
    async fn response_text(&self, plan: &ExecutionPlan) -> Option<String> {
        for action in &plan.actions {
            if action.action_type != ActionType::Response || action.status != ActionStatus::Completed {
                continue;
            }
            let key = format!("tool_result_{}", action.action_id);
            if let Ok(Some(result)) = self.state.memory.get(&self.session_id, &key).await {
                if let Some(text) = result.get("response_text").and_then(Value::as_str) {
                    if !text.is_empty() {
                        return Some(text.to_owned());
                    }
                }
            }
        }
        None
    }

    /// Structured payload for the final frame: download entries for
    /// every completed tool result that produced a file.
    async fn structured_data(&self, plan: &ExecutionPlan) -> Value {
        let mut files = Vec::new();
        for action in &plan.actions {
            if action.action_type != ActionType::ToolCall || action.status != ActionStatus::Completed {
                continue;
            }
            let key = format!("tool_result_{}", action.action_id);
            let Ok(Some(result)) = self.state.memory.get(&self.session_id, &key).await else {
                continue;
            };
            if let Some(url) = result.get("file_url").and_then(Value::as_str) {
                let name = result
                    .get("file_name")
                    .and_then(Value::as_str)
                    .unwrap_or("document");
                files.push(serde_json::json!({ "name": name, "url": url }));
            }
        }

        if files.is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::json!({ "files": files })
        }
    }
}

/// Apology used when the plan produced no response text; names any
/// failed actions so the user knows what went wrong.
fn fallback_reply(plan: &ExecutionPlan) -> String {
    let failed: Vec<&str> = plan
        .actions
        .iter()
        .filter(|a| a.status == ActionStatus::Failed)
        .map(|a| a.name.as_str())
        .collect();
    if failed.is_empty() {
        "I've completed processing your request. Please check the results above.".to_owned()
    } else {
        format!(
            "I encountered some issues while processing your request. The following actions \
             failed: {}. Please try again or contact support if the problem persists.",
            failed.join(", ")
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
