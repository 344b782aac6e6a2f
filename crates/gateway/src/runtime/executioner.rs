//! Executioner — drives an execution plan to a terminal status.
//!
//! Actions execute sequentially in dependency order. The scan loop is
//! bounded at `2 × |actions|` iterations and exits early on a pass that
//! makes no progress, so even malformed plans terminate: a plan left
//! non-terminal at that point is deadlocked and is failed with a
//! synthetic error on each stuck action.
//!
//! The plan store is the source of truth throughout — the loop reloads
//! the plan after every action so dependency checks always see
//! committed state, and every emitted `plan_update` is derived from a
//! committed snapshot.

use std::sync::Arc;

use serde_json::Value;

use aris_domain::config::Config;
use aris_domain::error::{Error, Result};
use aris_domain::plan::{ActionStatus, ActionType, ExecutionPlan, PlanStatus, PlannedAction};
use aris_mcp_client::dispatcher::error_field;
use aris_mcp_client::{McpDispatcher, PlanContext, PlanObserver};
use aris_store::{MemoryStore, PlanStore};

use super::cancel::CancelToken;
use super::llm_tools::LlmToolkit;
use super::template::TemplateResolver;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executioner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Executioner {
    session_id: String,
    plans: PlanStore,
    memory: MemoryStore,
    mcp: Arc<McpDispatcher>,
    toolkit: LlmToolkit,
    observer: Arc<dyn PlanObserver>,
    config: Arc<Config>,
    cancel: CancelToken,
    /// Model serving LLM-backed actions this turn.
    model_id: String,
}

impl Executioner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: impl Into<String>,
        plans: PlanStore,
        memory: MemoryStore,
        mcp: Arc<McpDispatcher>,
        toolkit: LlmToolkit,
        observer: Arc<dyn PlanObserver>,
        config: Arc<Config>,
        cancel: CancelToken,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            plans,
            memory,
            mcp,
            toolkit,
            observer,
            config,
            cancel,
            model_id: model_id.into(),
        }
    }

    /// Run the plan to a terminal status and return the final snapshot.
    pub async fn execute(&self, plan_id: &str) -> Result<ExecutionPlan> {
        let mut plan = self.reload(plan_id).await?;
        tracing::info!(
            session_id = %self.session_id,
            plan_id,
            actions = plan.actions.len(),
            "starting plan execution"
        );

        // An empty plan is immediately complete: one status commit, one
        // update frame.
        if plan.actions.is_empty() {
            self.plans.update_plan_status(plan_id, PlanStatus::Completed).await?;
            self.observer.plan_updated(plan_id).await;
            return self.reload(plan_id).await;
        }

        self.plans.update_plan_status(plan_id, PlanStatus::InProgress).await?;
        self.observer.plan_updated(plan_id).await;

        let max_iterations = plan.actions.len() * 2;
        let mut failed = false;

        'passes: for _pass in 0..max_iterations {
            let mut executed_in_pass = false;

            let mut idx = 0;
            while idx < plan.actions.len() {
                let action = plan.actions[idx].clone();
                idx += 1;

                if self.cancel.is_cancelled() {
                    // Stop issuing new work; what already ran is
                    // committed, so a reconnect sees a consistent plan.
                    tracing::info!(plan_id, "session cancelled, halting plan execution");
                    return Ok(plan);
                }
                if action.status != ActionStatus::Pending || !plan.dependencies_satisfied(&action) {
                    continue;
                }

                self.execute_action(&plan, &action).await;
                executed_in_pass = true;
                plan = self.reload(plan_id).await?;

                if plan.has_failed_actions() {
                    // A failed action propagates immediately; nothing
                    // further is started.
                    failed = true;
                    break 'passes;
                }
            }

            if !executed_in_pass {
                break;
            }
        }

        if failed {
            self.plans.update_plan_status(plan_id, PlanStatus::Failed).await?;
            self.observer.plan_updated(plan_id).await;
            tracing::warn!(plan_id, "plan failed");
            return self.reload(plan_id).await;
        }

        // Terminal resolution: derive the final status; anything still
        // non-terminal after a no-progress exit is deadlocked.
        plan = self.reload(plan_id).await?;
        let stuck: Vec<PlannedAction> = plan
            .actions
            .iter()
            .filter(|a| !a.status.is_terminal())
            .cloned()
            .collect();

        let final_status = if stuck.is_empty() {
            plan.derived_status()
        } else {
            let names: Vec<&str> = stuck.iter().map(|a| a.name.as_str()).collect();
            tracing::warn!(plan_id, stuck = ?names, "plan deadlocked on unsatisfiable dependencies");
            for action in &stuck {
                let message = format!(
                    "deadlocked: dependencies {:?} can never complete",
                    action.depends_on
                );
                if let Err(e) = self
                    .plans
                    .update_action_status(plan_id, &action.action_id, ActionStatus::Failed, None, Some(message))
                    .await
                {
                    tracing::warn!(plan_id, action_id = %action.action_id, error = %e, "failed to mark deadlocked action");
                }
            }
            PlanStatus::Failed
        };

        self.plans.update_plan_status(plan_id, final_status).await?;
        self.observer.plan_updated(plan_id).await;
        tracing::info!(plan_id, status = final_status.as_str(), "plan execution finished");
        self.reload(plan_id).await
    }

    async fn reload(&self, plan_id: &str) -> Result<ExecutionPlan> {
        self.plans
            .get_plan(plan_id)
            .await
            .map_err(Error::from)?
            .ok_or_else(|| Error::Store(format!("plan {plan_id} disappeared during execution")))
    }

    // ── per-action execution ─────────────────────────────────────────

    async fn execute_action(&self, plan: &ExecutionPlan, action: &PlannedAction) {
        tracing::info!(
            plan_id = %plan.plan_id,
            action_id = %action.action_id,
            action_type = action.action_type.as_str(),
            name = %action.name,
            "executing action"
        );
        match action.action_type {
            ActionType::ToolCall => self.execute_tool_action(plan, action).await,
            ActionType::Analysis => self.execute_analysis_action(plan, action).await,
            ActionType::Response => self.execute_response_action(plan, action).await,
            ActionType::Clarification => self.execute_clarification_action(plan, action).await,
        }
    }

    async fn execute_tool_action(&self, plan: &ExecutionPlan, action: &PlannedAction) {
        let Some(tool_name) = action.tool_name.clone() else {
            self.commit(
                &plan.plan_id,
                &action.action_id,
                ActionStatus::Failed,
                None,
                Some("tool_call action has no tool name".into()),
            )
            .await;
            return;
        };

        // Resolve template references against completed sibling results.
        let resolver = TemplateResolver {
            plan,
            memory: &self.memory,
            session_id: &self.session_id,
            tools: &self.config.tools,
        };
        let mut arguments = resolver.resolve(&action.arguments).await;

        // Built-in memory tools bypass the dispatcher.
        if LlmToolkit::is_builtin(&tool_name) {
            self.commit(&plan.plan_id, &action.action_id, ActionStatus::Starting, None, None).await;
            self.commit(&plan.plan_id, &action.action_id, ActionStatus::InProgress, None, None).await;
            let result = self.toolkit.call_builtin(&self.session_id, &tool_name, &arguments).await;
            self.store_result(&action.action_id, &tool_name, &result).await;
            self.commit_envelope(&plan.plan_id, &action.action_id, result).await;
            return;
        }

        self.inject_session_id(&tool_name, &mut arguments).await;

        // The dispatcher owns the starting/in_progress/terminal
        // transitions for remote calls.
        let ctx = PlanContext {
            plan_id: plan.plan_id.clone(),
            action_id: action.action_id.clone(),
            store: self.plans.clone(),
            observer: self.observer.clone(),
        };
        match self.mcp.call(&tool_name, arguments, Some(&ctx)).await {
            Ok(result) => {
                self.store_result(&action.action_id, &tool_name, &result).await;
            }
            Err(e) => {
                tracing::warn!(
                    plan_id = %plan.plan_id,
                    action_id = %action.action_id,
                    tool = %tool_name,
                    error = %e,
                    "tool call failed"
                );
            }
        }
    }

    async fn execute_analysis_action(&self, plan: &ExecutionPlan, action: &PlannedAction) {
        self.commit(&plan.plan_id, &action.action_id, ActionStatus::Starting, None, None).await;
        self.commit(&plan.plan_id, &action.action_id, ActionStatus::InProgress, None, None).await;

        let result = match format_source_key(action) {
            Some(data_source_key) => {
                self.toolkit
                    .format_for_document(
                        &self.session_id,
                        &data_source_key,
                        "manufacturing_report",
                        "Manufacturing Data Report",
                        &self.model_id,
                    )
                    .await
            }
            None => serde_json::json!({
                "success": true,
                "analysis_result": format!("Analysis completed for: {}", action.name),
            }),
        };

        self.store_llm_result(&action.action_id, "llm_analysis", &["analysis_result", "llm_tool"], &result)
            .await;
        self.commit_envelope(&plan.plan_id, &action.action_id, result).await;
    }

    async fn execute_response_action(&self, plan: &ExecutionPlan, action: &PlannedAction) {
        self.commit(&plan.plan_id, &action.action_id, ActionStatus::Starting, None, None).await;
        self.commit(&plan.plan_id, &action.action_id, ActionStatus::InProgress, None, None).await;

        let result = self
            .toolkit
            .generate_response(&self.session_id, &plan.user_query, plan, &self.model_id)
            .await;

        self.store_llm_result(&action.action_id, "llm_response", &["response_result", "llm_tool"], &result)
            .await;
        self.commit_envelope(&plan.plan_id, &action.action_id, result).await;
    }

    async fn execute_clarification_action(&self, plan: &ExecutionPlan, action: &PlannedAction) {
        self.commit(&plan.plan_id, &action.action_id, ActionStatus::Starting, None, None).await;
        self.commit(&plan.plan_id, &action.action_id, ActionStatus::InProgress, None, None).await;

        let question = if action.description.is_empty() {
            action.name.clone()
        } else {
            action.description.clone()
        };
        let result = serde_json::json!({ "success": true, "clarification_text": question });

        self.store_llm_result(&action.action_id, "llm_clarification", &["clarification", "llm_tool"], &result)
            .await;
        self.commit_envelope(&plan.plan_id, &action.action_id, result).await;
    }

    // ── helpers ──────────────────────────────────────────────────────

    /// Servers that expect the ambient session identifier get it
    /// injected unconditionally, overriding whatever the planner put
    /// there.
    async fn inject_session_id(&self, tool_name: &str, arguments: &mut Value) {
        let Some(server_name) = self.mcp.tool_server(tool_name).await else {
            return;
        };
        let Some(argument) = self
            .config
            .mcp
            .servers
            .iter()
            .find(|s| s.name == server_name)
            .and_then(|s| s.session_id_argument.clone())
        else {
            return;
        };

        if let Value::Object(args) = arguments {
            let previous = args.insert(argument.clone(), Value::String(self.session_id.clone()));
            match previous {
                Some(Value::String(old)) if old != self.session_id => {
                    tracing::info!(
                        tool = tool_name,
                        argument = %argument,
                        overridden = %old,
                        "overrode planner-supplied session identifier"
                    );
                }
                _ => {
                    tracing::debug!(tool = tool_name, argument = %argument, "injected session identifier");
                }
            }
        }
    }

    /// Commit a transition, then notify through the observer. A
    /// rejected commit suppresses the notification.
    async fn commit(
        &self,
        plan_id: &str,
        action_id: &str,
        status: ActionStatus,
        result: Option<Value>,
        error: Option<String>,
    ) {
        match self
            .plans
            .update_action_status(plan_id, action_id, status, result, error)
            .await
        {
            Ok(()) => self.observer.plan_updated(plan_id).await,
            Err(e) => {
                tracing::warn!(plan_id, action_id, status = status.as_str(), error = %e, "action status commit failed");
            }
        }
    }

    /// Terminal commit from a result envelope: a non-empty `error`
    /// field means failure, anything else success.
    async fn commit_envelope(&self, plan_id: &str, action_id: &str, result: Value) {
        match error_field(&result) {
            Some(message) => {
                self.commit(plan_id, action_id, ActionStatus::Failed, Some(result), Some(message))
                    .await
            }
            None => {
                self.commit(plan_id, action_id, ActionStatus::Completed, Some(result), None)
                    .await
            }
        }
    }

    async fn store_result(&self, action_id: &str, tool_name: &str, result: &Value) {
        if let Err(e) = self
            .memory
            .handle_tool_result(&self.session_id, action_id, tool_name, result)
            .await
        {
            tracing::warn!(action_id, tool = tool_name, error = %e, "failed to store tool result");
        }
    }

    async fn store_llm_result(&self, action_id: &str, tool_name: &str, tags: &[&str], result: &Value) {
        let key = format!("tool_result_{action_id}");
        let tags: Vec<String> = tags.iter().map(|t| (*t).to_owned()).collect();
        if let Err(e) = self
            .memory
            .put(&self.session_id, &key, result, Some(tool_name), &tags, None)
            .await
        {
            tracing::warn!(action_id, tool = tool_name, error = %e, "failed to store result");
        }
    }
}

/// Detect the format-for-document analysis shape: the name/description
/// signal formatting intent and there is exactly one dependency whose
/// result can serve as the data source.
fn format_source_key(action: &PlannedAction) -> Option<String> {
    let haystack = format!("{} {}", action.name, action.description).to_lowercase();
    let is_format = haystack.contains("format")
        && (haystack.contains("pdf") || haystack.contains("document") || haystack.contains("report"));
    if !is_format || action.depends_on.len() != 1 {
        return None;
    }
    Some(format!("tool_result_{}", action.depends_on[0]))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
