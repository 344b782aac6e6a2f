//! Per-session event bus — the single ordered sink for outbound frames.
//!
//! Components publish by calling `bus.emit(...)` methods; one writer
//! task per connection drains the channel onto the socket, so frames
//! from concurrent internal tasks never interleave destructively.
//! Duplicate `plan_update` frames (identical plan/action statuses) are
//! suppressed as a fidelity optimization.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use aris_domain::frame::{DocPayload, DocumentNotice, OutboundFrame, PlanSnapshot};
use aris_domain::plan::ExecutionPlan;
use aris_mcp_client::PlanObserver;
use aris_store::PlanStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EventBus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct EventBus {
    session_id: String,
    tx: mpsc::Sender<OutboundFrame>,
    /// plan_id → fingerprint of the last delivered `plan_update`.
    last_update: Arc<Mutex<HashMap<String, String>>>,
    closed: Arc<AtomicBool>,
}

impl EventBus {
    /// Create the bus and the receiving end for the writer task.
    pub fn new(session_id: impl Into<String>, buffer: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Self {
                session_id: session_id.into(),
                tx,
                last_update: Arc::new(Mutex::new(HashMap::new())),
                closed: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Stop emitting. Subsequent sends become no-ops; pending work keeps
    /// writing to the store but the client hears nothing more.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn send(&self, frame: OutboundFrame) {
        if self.is_closed() {
            return;
        }
        if self.tx.send(frame).await.is_err() {
            tracing::debug!(session_id = %self.session_id, "event channel closed, dropping frame");
            self.close();
        }
    }

    // ── frame emitters ───────────────────────────────────────────────

    /// Free-form short status line (`chain_of_thought`).
    pub async fn progress(&self, message: impl Into<String>) {
        self.send(OutboundFrame::ChainOfThought {
            message: message.into(),
        })
        .await;
    }

    pub async fn plan_create(&self, plan: &ExecutionPlan) {
        self.send(OutboundFrame::PlanCreate {
            data: PlanSnapshot::from(plan),
        })
        .await;
    }

    /// Emit a `plan_update`, suppressing a frame identical (by plan and
    /// per-action status) to the previous one for the same plan.
    pub async fn plan_update(&self, plan: &ExecutionPlan) {
        let snapshot = PlanSnapshot::from(plan);
        let fingerprint = snapshot.fingerprint();
        {
            let mut last = self.last_update.lock();
            if last.get(&plan.plan_id) == Some(&fingerprint) {
                return;
            }
            last.insert(plan.plan_id.clone(), fingerprint);
        }
        self.send(OutboundFrame::PlanUpdate { data: snapshot }).await;
    }

    pub async fn document_notice(&self, notice: DocumentNotice) {
        self.send(OutboundFrame::Doc {
            data: DocPayload { document: notice },
        })
        .await;
    }

    pub async fn final_message(&self, message: impl Into<String>, data: Value) {
        self.send(OutboundFrame::final_message(message, data)).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.send(OutboundFrame::Error {
            message: message.into(),
        })
        .await;
    }

    pub async fn ping(&self) {
        self.send(OutboundFrame::Ping).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store-backed plan observer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Publishes `plan_update` frames by re-reading the plan store after a
/// commit. Because the snapshot comes from the store, an emitted frame
/// can never show a status the store does not hold.
pub struct BusPlanObserver {
    plans: PlanStore,
    bus: EventBus,
}

impl BusPlanObserver {
    pub fn new(plans: PlanStore, bus: EventBus) -> Self {
        Self { plans, bus }
    }
}

#[async_trait]
impl PlanObserver for BusPlanObserver {
    async fn plan_updated(&self, plan_id: &str) {
        match self.plans.get_plan(plan_id).await {
            Ok(Some(plan)) => self.bus.plan_update(&plan).await,
            Ok(None) => {
                tracing::warn!(plan_id, "plan vanished between commit and notification");
            }
            Err(e) => {
                tracing::warn!(plan_id, error = %e, "failed to read plan for notification");
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use aris_domain::plan::{ActionStatus, ActionType, PlannedAction};

    fn sample_plan() -> ExecutionPlan {
        let action = PlannedAction::new("p", ActionType::Analysis, "Analyze", "");
        ExecutionPlan::new("s1", "q", "do a thing").with_actions(vec![action])
    }

    #[tokio::test]
    async fn frames_arrive_in_emission_order() {
        let (bus, mut rx) = EventBus::new("s1", 16);
        let plan = sample_plan();

        bus.progress("Thinking...").await;
        bus.plan_create(&plan).await;
        bus.final_message("done", serde_json::json!({})).await;

        assert!(matches!(rx.recv().await.unwrap(), OutboundFrame::ChainOfThought { .. }));
        assert!(matches!(rx.recv().await.unwrap(), OutboundFrame::PlanCreate { .. }));
        assert!(matches!(rx.recv().await.unwrap(), OutboundFrame::Message { .. }));
    }

    #[tokio::test]
    async fn identical_plan_updates_are_suppressed() {
        let (bus, mut rx) = EventBus::new("s1", 16);
        let mut plan = sample_plan();

        bus.plan_update(&plan).await;
        bus.plan_update(&plan).await; // identical → suppressed

        plan.actions[0].status = ActionStatus::Completed;
        bus.plan_update(&plan).await; // changed → delivered

        assert!(matches!(rx.recv().await.unwrap(), OutboundFrame::PlanUpdate { .. }));
        let second = rx.recv().await.unwrap();
        match second {
            OutboundFrame::PlanUpdate { data } => {
                assert_eq!(data.actions[0].status, "completed");
            }
            other => panic!("expected plan_update, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_bus_drops_frames() {
        let (bus, mut rx) = EventBus::new("s1", 16);
        bus.close();
        bus.progress("never delivered").await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dedup_is_per_plan() {
        let (bus, mut rx) = EventBus::new("s1", 16);
        let plan_a = sample_plan();
        let plan_b = sample_plan();

        bus.plan_update(&plan_a).await;
        bus.plan_update(&plan_b).await; // different plan_id → delivered

        assert!(matches!(rx.recv().await.unwrap(), OutboundFrame::PlanUpdate { .. }));
        assert!(matches!(rx.recv().await.unwrap(), OutboundFrame::PlanUpdate { .. }));
    }
}
