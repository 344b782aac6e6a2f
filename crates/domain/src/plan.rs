//! Execution plan model — the DAG of typed actions derived from one user
//! message, plus the status machines for plans and actions.
//!
//! Action statuses move only forward along
//! `pending → starting → in_progress → {completed | failed | cancelled}`;
//! [`ActionStatus::can_transition_to`] encodes the chain and the store
//! rejects anything else. Plan status is derived from action statuses via
//! [`ExecutionPlan::derived_status`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Action type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ToolCall,
    Analysis,
    Response,
    Clarification,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolCall => "tool_call",
            Self::Analysis => "analysis",
            Self::Response => "response",
            Self::Clarification => "clarification",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tool_call" => Some(Self::ToolCall),
            "analysis" => Some(Self::Analysis),
            "response" => Some(Self::Response),
            "clarification" => Some(Self::Clarification),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Action status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Starting,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Position along the canonical chain, used for monotonicity checks.
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Starting => 1,
            Self::InProgress => 2,
            Self::Completed | Self::Failed | Self::Cancelled => 3,
        }
    }

    /// True when `next` is a legal forward transition from `self`.
    ///
    /// Skipping ahead is allowed (e.g. `pending → failed` when a tool
    /// errors before it ever starts); moving backwards or out of a
    /// terminal state is not. Re-asserting the same status is a no-op
    /// transition and allowed.
    pub fn can_transition_to(self, next: ActionStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Starting => "starting",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "starting" => Some(Self::Starting),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    New,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl PlanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Planned action
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single typed unit of work in an execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedAction {
    pub action_id: String,
    pub plan_id: String,
    pub action_type: ActionType,
    pub name: String,
    pub description: String,
    /// Non-empty iff `action_type == ToolCall`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// JSON object; string values may embed `{{action.field}}` templates.
    pub arguments: Value,
    /// Ids of sibling actions that must complete first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub status: ActionStatus,
    /// 1-based position within the plan, used for stable display.
    pub execution_order: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl PlannedAction {
    /// Build a fresh pending action. `execution_order` is assigned when
    /// the plan is assembled.
    pub fn new(
        plan_id: impl Into<String>,
        action_type: ActionType,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            action_id: uuid::Uuid::new_v4().to_string(),
            plan_id: plan_id.into(),
            action_type,
            name: name.into(),
            description: description.into(),
            tool_name: None,
            arguments: Value::Object(Default::default()),
            depends_on: Vec::new(),
            status: ActionStatus::Pending,
            execution_order: 0,
            result: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution plan
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A DAG of actions derived from one user message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub plan_id: String,
    pub session_id: String,
    /// The verbatim triggering user message.
    pub user_query: String,
    /// One-line natural-language summary of what the plan will do.
    pub summary: String,
    pub status: PlanStatus,
    /// Actions in `execution_order`.
    pub actions: Vec<PlannedAction>,
    pub total_actions: u32,
    pub completed_actions: u32,
    pub failed_actions: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionPlan {
    pub fn new(session_id: impl Into<String>, user_query: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            plan_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            user_query: user_query.into(),
            summary: summary.into(),
            status: PlanStatus::New,
            actions: Vec::new(),
            total_actions: 0,
            completed_actions: 0,
            failed_actions: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Attach actions, assigning 1-based execution order and counters.
    pub fn with_actions(mut self, mut actions: Vec<PlannedAction>) -> Self {
        for (i, action) in actions.iter_mut().enumerate() {
            action.plan_id = self.plan_id.clone();
            action.execution_order = i as u32 + 1;
        }
        self.total_actions = actions.len() as u32;
        self.actions = actions;
        self
    }

    pub fn action(&self, action_id: &str) -> Option<&PlannedAction> {
        self.actions.iter().find(|a| a.action_id == action_id)
    }

    pub fn has_failed_actions(&self) -> bool {
        self.actions.iter().any(|a| a.status == ActionStatus::Failed)
    }

    /// True when every id in `action.depends_on` names a sibling that has
    /// completed. An id that names no sibling blocks forever — the
    /// executioner's bounded loop turns that into a deadlock failure.
    pub fn dependencies_satisfied(&self, action: &PlannedAction) -> bool {
        action.depends_on.iter().all(|dep_id| {
            self.action(dep_id)
                .map(|dep| dep.status == ActionStatus::Completed)
                .unwrap_or(false)
        })
    }

    /// Derive the plan status from action statuses:
    /// failed if any action failed, else completed if all completed, else
    /// in_progress if anything is starting/in_progress, else the current
    /// status stands.
    pub fn derived_status(&self) -> PlanStatus {
        if self.has_failed_actions() {
            PlanStatus::Failed
        } else if !self.actions.is_empty()
            && self.actions.iter().all(|a| a.status == ActionStatus::Completed)
        {
            PlanStatus::Completed
        } else if self
            .actions
            .iter()
            .any(|a| matches!(a.status, ActionStatus::Starting | ActionStatus::InProgress))
        {
            PlanStatus::InProgress
        } else {
            self.status
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
