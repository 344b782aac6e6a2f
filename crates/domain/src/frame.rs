//! Outbound wire frames for the client channel.
//!
//! Every frame is a JSON object tagged by `type`. Plan frames carry the
//! full actions array so a reconnecting client can rebuild its view from
//! any single `plan_update`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plan::{ExecutionPlan, PlannedAction};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan snapshots
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One action as shown to the client. Exactly these fields, always all
/// present (the UI relies on the stable shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSnapshot {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: String,
    pub name: String,
    pub description: String,
    pub tool_name: Option<String>,
    pub arguments: Value,
    pub depends_on: Vec<String>,
    pub status: String,
}

impl From<&PlannedAction> for ActionSnapshot {
    fn from(action: &PlannedAction) -> Self {
        Self {
            id: action.action_id.clone(),
            action_type: action.action_type.as_str().to_owned(),
            name: action.name.clone(),
            description: action.description.clone(),
            tool_name: action.tool_name.clone(),
            arguments: action.arguments.clone(),
            depends_on: action.depends_on.clone(),
            status: action.status.as_str().to_owned(),
        }
    }
}

/// The full plan view sent in `plan_create` and `plan_update` frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSnapshot {
    pub plan_id: String,
    pub summary: String,
    pub status: String,
    pub actions: Vec<ActionSnapshot>,
}

impl From<&ExecutionPlan> for PlanSnapshot {
    fn from(plan: &ExecutionPlan) -> Self {
        Self {
            plan_id: plan.plan_id.clone(),
            summary: plan.summary.clone(),
            status: plan.status.as_str().to_owned(),
            actions: plan.actions.iter().map(ActionSnapshot::from).collect(),
        }
    }
}

impl PlanSnapshot {
    /// Stable fingerprint over (plan status, action id → status).
    ///
    /// Two snapshots with equal fingerprints describe the same visible
    /// state; the event bus uses this to suppress duplicate
    /// `plan_update` frames.
    pub fn fingerprint(&self) -> String {
        let mut out = String::with_capacity(64);
        out.push_str(&self.status);
        for action in &self.actions {
            out.push('|');
            out.push_str(&action.id);
            out.push('=');
            out.push_str(&action.status);
        }
        out
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Document notice
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Advisory payload for out-of-band document attachments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentNotice {
    pub name: String,
    pub format: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    #[serde(default)]
    pub metadata: Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outbound frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Frames written to the client connection, in emission order per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundFrame {
    /// Free-form short progress line.
    #[serde(rename = "chain_of_thought")]
    ChainOfThought { message: String },

    /// A new plan was created; carries the full actions array.
    #[serde(rename = "plan_create")]
    PlanCreate { data: PlanSnapshot },

    /// Plan state changed; emitted after the store committed the change.
    #[serde(rename = "plan_update")]
    PlanUpdate { data: PlanSnapshot },

    /// A document was ingested out-of-band.
    #[serde(rename = "doc")]
    Doc { data: DocPayload },

    /// The end-of-turn assistant reply.
    #[serde(rename = "message")]
    Message {
        message: String,
        data: Value,
        action: String,
    },

    /// Keep-alive, emitted every ~5 seconds.
    #[serde(rename = "ping")]
    Ping,

    #[serde(rename = "error")]
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocPayload {
    pub document: DocumentNotice,
}

impl OutboundFrame {
    /// The end-of-turn reply frame. `action: "close"` tells the client
    /// the turn is finished.
    pub fn final_message(message: impl Into<String>, data: Value) -> Self {
        Self::Message {
            message: message.into(),
            data,
            action: "close".into(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{ActionType, ExecutionPlan, PlannedAction};

    fn sample_plan() -> ExecutionPlan {
        let mut a = PlannedAction::new("p", ActionType::ToolCall, "Fetch data", "Get the data");
        a.tool_name = Some("get_fake_data".into());
        let b = PlannedAction::new("p", ActionType::Response, "Reply", "Compose reply");
        ExecutionPlan::new("s1", "show data", "Fetch and reply").with_actions(vec![a, b])
    }

    #[test]
    fn action_snapshot_has_exact_field_set() {
        let plan = sample_plan();
        let snap = PlanSnapshot::from(&plan);
        let json = serde_json::to_value(&snap.actions[0]).unwrap();
        let obj = json.as_object().unwrap();
        let mut keys: Vec<_> = obj.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(
            keys,
            vec!["arguments", "depends_on", "description", "id", "name", "status", "tool_name", "type"]
        );
    }

    #[test]
    fn frames_are_tagged_by_type() {
        let frame = OutboundFrame::ChainOfThought {
            message: "Thinking...".into(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "chain_of_thought");
        assert_eq!(json["message"], "Thinking...");

        let ping = serde_json::to_value(OutboundFrame::Ping).unwrap();
        assert_eq!(ping["type"], "ping");
    }

    #[test]
    fn final_message_carries_close_action() {
        let frame = OutboundFrame::final_message("done", serde_json::json!({}));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["action"], "close");
        assert_eq!(json["data"], serde_json::json!({}));
    }

    #[test]
    fn plan_frame_shape() {
        let plan = sample_plan();
        let frame = OutboundFrame::PlanCreate {
            data: PlanSnapshot::from(&plan),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "plan_create");
        assert_eq!(json["data"]["plan_id"], plan.plan_id);
        assert_eq!(json["data"]["actions"].as_array().unwrap().len(), 2);
        assert_eq!(json["data"]["actions"][0]["status"], "pending");
    }

    #[test]
    fn fingerprint_tracks_status_changes() {
        let mut plan = sample_plan();
        let before = PlanSnapshot::from(&plan).fingerprint();
        // Same state twice → same fingerprint.
        assert_eq!(before, PlanSnapshot::from(&plan).fingerprint());

        plan.actions[0].status = crate::plan::ActionStatus::Completed;
        let after = PlanSnapshot::from(&plan).fingerprint();
        assert_ne!(before, after);
    }

    #[test]
    fn fingerprint_ignores_result_payloads() {
        let mut plan = sample_plan();
        let before = PlanSnapshot::from(&plan).fingerprint();
        plan.actions[0].result = Some(serde_json::json!({"rows": 42}));
        assert_eq!(before, PlanSnapshot::from(&plan).fingerprint());
    }
}
