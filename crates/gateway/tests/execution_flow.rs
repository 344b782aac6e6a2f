//! End-to-end orchestration scenarios over a scripted LLM and scripted
//! MCP servers: planning, execution, template resolution, failure
//! propagation, persistence failures, and cross-session isolation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use aris_domain::config::{Config, McpServerConfig};
use aris_domain::frame::{OutboundFrame, PlanSnapshot};
use aris_domain::tool::Message;
use aris_gateway::runtime::cancel::CancelToken;
use aris_gateway::runtime::event_bus::EventBus;
use aris_gateway::runtime::ingest::DisabledIngestor;
use aris_gateway::runtime::orchestrator::{InboundRequest, SessionOrchestrator};
use aris_gateway::state::AppState;
use aris_mcp_client::{McpDispatcher, McpTransport, TransportError};
use aris_providers::{ChatRequest, ChatTurn, LlmClient, StopReason};
use aris_store::{Database, MemoryStore, PlanStore, SessionStore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Routes by prompt shape: planning prompts get the configured plan
/// JSON, formatting prompts a fixed body, response prompts a fixed
/// reply.
struct ScriptedLlm {
    plan_response: String,
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(&self, req: &ChatRequest) -> aris_domain::Result<ChatTurn> {
        let prompt = req.messages.last().map(|m| m.text()).unwrap_or_default();
        let reply = if prompt.contains("Create a JSON execution plan") {
            self.plan_response.clone()
        } else if prompt.contains("RAW DATA") {
            "FORMATTED REPORT BODY".to_owned()
        } else if prompt.contains("Generate a professional response") {
            "I retrieved today's manufacturing data for you.".to_owned()
        } else {
            "Hello! How can I help?".to_owned()
        };
        Ok(ChatTurn {
            message: Message::assistant(reply),
            stop_reason: StopReason::EndTurn,
        })
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted MCP transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type ToolHandler = Box<dyn Fn(&Value) -> Value + Send + Sync>;

struct ScriptedServer {
    tools: Vec<String>,
    handlers: HashMap<String, ToolHandler>,
    call_counts: Arc<parking_lot::Mutex<HashMap<String, usize>>>,
}

impl ScriptedServer {
    fn new() -> Self {
        Self {
            tools: Vec::new(),
            handlers: HashMap::new(),
            call_counts: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        }
    }

    fn tool(mut self, name: &str, handler: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.tools.push(name.to_owned());
        self.handlers.insert(name.to_owned(), Box::new(handler));
        self
    }

    fn counts(&self) -> Arc<parking_lot::Mutex<HashMap<String, usize>>> {
        self.call_counts.clone()
    }
}

#[async_trait]
impl McpTransport for ScriptedServer {
    async fn request(&self, method: &str, params: Option<Value>, _t: Duration) -> Result<Value, TransportError> {
        match method {
            "initialize" => Ok(serde_json::json!({"capabilities": {}})),
            "tools/list" => {
                let tools: Vec<Value> = self
                    .tools
                    .iter()
                    .map(|name| serde_json::json!({"name": name, "description": format!("{name} tool")}))
                    .collect();
                Ok(serde_json::json!({ "tools": tools }))
            }
            "tools/call" => {
                let params = params.unwrap_or(Value::Null);
                let name = params["name"].as_str().unwrap_or_default().to_owned();
                *self.call_counts.lock().entry(name.clone()).or_insert(0) += 1;
                match self.handlers.get(&name) {
                    Some(handler) => Ok(handler(&params["arguments"])),
                    None => Ok(serde_json::json!({
                        "content": [{"type": "text", "text": format!("unknown tool {name}")}],
                        "isError": true
                    })),
                }
            }
            _ => Ok(Value::Null),
        }
    }

    async fn notify(&self, _method: &str) -> Result<(), TransportError> {
        Ok(())
    }

    fn is_alive(&self) -> bool {
        true
    }

    fn mark_failed(&self) {}
}

fn structured(value: Value) -> Value {
    serde_json::json!({ "content": [], "structuredContent": value })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Harness {
    state: AppState,
}

fn server_entry(name: &str, session_arg: Option<&str>) -> McpServerConfig {
    McpServerConfig {
        name: name.into(),
        url: format!("http://test/{name}"),
        session_id_argument: session_arg.map(str::to_owned),
        ..McpServerConfig::default()
    }
}

fn harness(plan_response: &str, servers: Vec<(McpServerConfig, Arc<dyn McpTransport>)>) -> Harness {
    let mut config = Config::default();
    config.mcp.servers = servers.iter().map(|(cfg, _)| cfg.clone()).collect();
    let config = Arc::new(config);

    let db = Database::open_in_memory().unwrap();
    let state = AppState {
        config,
        sessions: SessionStore::new(db.clone()),
        plans: PlanStore::new(db.clone()),
        memory: MemoryStore::new(db),
        mcp: Arc::new(McpDispatcher::with_transports(servers, Duration::from_secs(300))),
        llm: Arc::new(ScriptedLlm {
            plan_response: plan_response.to_owned(),
        }),
        ingestor: Arc::new(DisabledIngestor),
        api_token_hash: None,
    };
    Harness { state }
}

impl Harness {
    fn orchestrator(&self, session_id: &str) -> (SessionOrchestrator, mpsc::Receiver<OutboundFrame>) {
        let (bus, rx) = EventBus::new(session_id, 512);
        let orchestrator = SessionOrchestrator::new(
            self.state.clone(),
            session_id,
            "user-1",
            bus,
            CancelToken::new(),
        );
        (orchestrator, rx)
    }
}

async fn send(orchestrator: &mut SessionOrchestrator, text: &str) {
    let inbound: InboundRequest =
        serde_json::from_value(serde_json::json!({ "message": text })).unwrap();
    orchestrator.set_runtime_options(&inbound);
    orchestrator.process_message(&inbound).await.unwrap();
}

fn drain(rx: &mut mpsc::Receiver<OutboundFrame>) -> Vec<OutboundFrame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

fn plan_creates(frames: &[OutboundFrame]) -> Vec<&PlanSnapshot> {
    frames
        .iter()
        .filter_map(|f| match f {
            OutboundFrame::PlanCreate { data } => Some(data),
            _ => None,
        })
        .collect()
}

fn plan_updates(frames: &[OutboundFrame]) -> Vec<&PlanSnapshot> {
    frames
        .iter()
        .filter_map(|f| match f {
            OutboundFrame::PlanUpdate { data } => Some(data),
            _ => None,
        })
        .collect()
}

fn final_messages(frames: &[OutboundFrame]) -> Vec<(&str, &Value)> {
    frames
        .iter()
        .filter_map(|f| match f {
            OutboundFrame::Message { message, data, .. } => Some((message.as_str(), data)),
            _ => None,
        })
        .collect()
}

/// Assert the per-action status sequence across updates is a prefix-
/// ordered walk of the canonical chain.
fn assert_monotonic(updates: &[&PlanSnapshot], action_id: &str) {
    let chain = ["pending", "starting", "in_progress", "completed", "failed", "cancelled"];
    let mut last_rank = 0usize;
    for update in updates {
        if let Some(snap) = update.actions.iter().find(|a| a.id == action_id) {
            let rank = chain
                .iter()
                .position(|s| *s == snap.status)
                .unwrap_or_else(|| panic!("unknown status {}", snap.status));
            assert!(
                rank >= last_rank,
                "status went backwards for {action_id}: {} after rank {last_rank}",
                snap.status
            );
            last_rank = rank;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 1 — greeting via the fallback plan
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn greeting_runs_fallback_plan_end_to_end() {
    // The "planner" answers with prose, not JSON → fallback plan.
    let h = harness("Hi there! What can I do for you today?", vec![]);
    let (mut orchestrator, mut rx) = h.orchestrator("sess-greeting");

    send(&mut orchestrator, "hello").await;
    let frames = drain(&mut rx);

    // One plan_create with the two fallback actions, both pending.
    let creates = plan_creates(&frames);
    assert_eq!(creates.len(), 1);
    assert_eq!(creates[0].actions.len(), 2);
    assert!(creates[0].actions.iter().all(|a| a.status == "pending"));
    assert_eq!(creates[0].actions[0].action_type, "analysis");
    assert_eq!(creates[0].actions[1].action_type, "response");

    // Updates walk each action monotonically to completed.
    let updates = plan_updates(&frames);
    assert!(!updates.is_empty());
    for action in &creates[0].actions {
        assert_monotonic(&updates, &action.id);
    }
    let last = updates.last().unwrap();
    assert_eq!(last.status, "completed");
    assert!(last.actions.iter().all(|a| a.status == "completed"));

    // Exactly one final message, with empty data.
    let finals = final_messages(&frames);
    assert_eq!(finals.len(), 1);
    assert_eq!(finals[0].1, &serde_json::json!({}));
    assert!(!finals[0].0.is_empty());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 2 — single tool call
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const DATA_PLAN: &str = r#"{
    "summary": "Fetch today's data and summarize it",
    "actions": [
        {"id": "fetch", "type": "tool_call", "name": "Fetch data",
         "description": "Retrieve today's data", "tool_name": "get_fake_data",
         "arguments": {"result_variable_name": "todays_data"}},
        {"id": "analyze", "type": "analysis", "name": "Analyze data",
         "description": "Review the data", "depends_on": ["fetch"]},
        {"id": "reply", "type": "response", "name": "Reply",
         "description": "Summarize for the user", "depends_on": ["analyze"]}
    ]
}"#;

#[tokio::test]
async fn single_tool_call_stores_result_and_replies() {
    let server = ScriptedServer::new().tool("get_fake_data", |_args| {
        structured(serde_json::json!({"machines": 4, "throughput": [120, 118, 131]}))
    });
    let h = harness(
        DATA_PLAN,
        vec![(server_entry("core", None), Arc::new(server) as Arc<dyn McpTransport>)],
    );
    let (mut orchestrator, mut rx) = h.orchestrator("sess-data");

    send(&mut orchestrator, "show me today's data").await;
    let frames = drain(&mut rx);

    let creates = plan_creates(&frames);
    assert_eq!(creates.len(), 1);
    assert_eq!(creates[0].actions.len(), 3);
    let fetch_id = creates[0].actions[0].id.clone();

    // The canonical memory key exists for the completed tool call.
    let stored = h
        .state
        .memory
        .get("sess-data", &format!("tool_result_{fetch_id}"))
        .await
        .unwrap()
        .expect("tool result stored in session memory");
    assert_eq!(stored["machines"], 4);

    // Final plan completed, final message references the data, data {}.
    let updates = plan_updates(&frames);
    assert_eq!(updates.last().unwrap().status, "completed");
    let finals = final_messages(&frames);
    assert_eq!(finals.len(), 1);
    assert!(finals[0].0.contains("data"));
    assert_eq!(finals[0].1, &serde_json::json!({}));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 3 — document generation with template resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const PDF_PLAN: &str = r#"{
    "summary": "Fetch data and produce a PDF report",
    "actions": [
        {"id": "A", "type": "tool_call", "name": "Fetch data",
         "description": "Retrieve the data", "tool_name": "get_fake_data",
         "arguments": {}},
        {"id": "B", "type": "tool_call", "name": "Create PDF",
         "description": "Render the data as a PDF", "tool_name": "create_pdf",
         "arguments": {"content": "{{A.result}}", "chat_id": "current_chat"},
         "depends_on": ["A"]},
        {"id": "C", "type": "response", "name": "Reply",
         "description": "Tell the user about the document", "depends_on": ["B"]}
    ]
}"#;

#[tokio::test]
async fn document_generation_resolves_templates_and_reports_files() {
    let data_server = ScriptedServer::new().tool("get_fake_data", |_args| {
        structured(serde_json::json!({"machines": ["M-1", "M-2"], "oee": 0.82}))
    });
    let file_server = ScriptedServer::new().tool("create_pdf", |args| {
        // Template resolved: the content field carries the pretty JSON
        // of the data result, not the placeholder.
        let content = args["content"].as_str().unwrap_or_default();
        assert!(content.contains("\"machines\""), "unresolved template: {content}");
        assert!(content.contains("M-1"));
        assert!(!content.contains("{{"));
        // Ambient session id overrode the planner's placeholder.
        assert_eq!(args["chat_id"], "sess-pdf");
        structured(serde_json::json!({
            "success": true,
            "file_url": "https://files.example.com/report.pdf",
            "file_name": "report.pdf"
        }))
    });

    let h = harness(
        PDF_PLAN,
        vec![
            (server_entry("core", None), Arc::new(data_server) as Arc<dyn McpTransport>),
            (
                server_entry("file-generator", Some("chat_id")),
                Arc::new(file_server) as Arc<dyn McpTransport>,
            ),
        ],
    );
    let (mut orchestrator, mut rx) = h.orchestrator("sess-pdf");

    send(&mut orchestrator, "make me a PDF of today's data").await;
    let frames = drain(&mut rx);

    let updates = plan_updates(&frames);
    assert_eq!(updates.last().unwrap().status, "completed");

    let finals = final_messages(&frames);
    assert_eq!(finals.len(), 1);
    assert_eq!(
        finals[0].1,
        &serde_json::json!({
            "files": [{"name": "report.pdf", "url": "https://files.example.com/report.pdf"}]
        })
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 4 — tool failure propagates to the plan
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const FAILING_PLAN: &str = r#"{
    "summary": "Fetch data, then render it",
    "actions": [
        {"id": "fetch", "type": "tool_call", "name": "Fetch data",
         "description": "Retrieve the data", "tool_name": "get_fake_data",
         "arguments": {}},
        {"id": "pdf", "type": "tool_call", "name": "Create PDF",
         "description": "Render as PDF", "tool_name": "create_pdf",
         "arguments": {"content": "{{fetch.result}}"}, "depends_on": ["fetch"]},
        {"id": "reply", "type": "response", "name": "Reply",
         "description": "Answer", "depends_on": ["pdf"]}
    ]
}"#;

#[tokio::test]
async fn tool_failure_fails_plan_and_skips_downstream_actions() {
    let server = ScriptedServer::new()
        .tool("get_fake_data", |_args| {
            serde_json::json!({
                "content": [{"type": "text", "text": "boom"}],
                "isError": true
            })
        })
        .tool("create_pdf", |_args| structured(serde_json::json!({"file_url": "x"})));
    let counts = server.counts();

    let h = harness(
        FAILING_PLAN,
        vec![(server_entry("core", None), Arc::new(server) as Arc<dyn McpTransport>)],
    );
    let (mut orchestrator, mut rx) = h.orchestrator("sess-fail");

    send(&mut orchestrator, "make a report").await;
    let frames = drain(&mut rx);

    let updates = plan_updates(&frames);
    let last = updates.last().unwrap();
    assert_eq!(last.status, "failed");
    assert_eq!(last.actions[0].status, "failed");
    // Nothing downstream was started.
    assert_eq!(last.actions[1].status, "pending");
    assert_eq!(last.actions[2].status, "pending");
    assert_eq!(counts.lock().get("create_pdf"), None);

    // The apology names the failed action.
    let finals = final_messages(&frames);
    assert_eq!(finals.len(), 1);
    assert!(finals[0].0.contains("Fetch data"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 5 — plan persistence failure aborts the turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn persistence_failure_aborts_turn_and_session_recovers() {
    // Split-brain stores: the session record lands in a different
    // database than plans, so the plan insert hits a foreign-key
    // violation — a faithful stand-in for "the store write failed".
    let plan_db = Database::open_in_memory().unwrap();
    let session_db = Database::open_in_memory().unwrap();

    let state = AppState {
        config: Arc::new(Config::default()),
        sessions: SessionStore::new(session_db),
        plans: PlanStore::new(plan_db.clone()),
        memory: MemoryStore::new(plan_db.clone()),
        mcp: Arc::new(McpDispatcher::with_transports(vec![], Duration::from_secs(300))),
        llm: Arc::new(ScriptedLlm {
            plan_response: "not json".to_owned(),
        }),
        ingestor: Arc::new(DisabledIngestor),
        api_token_hash: None,
    };

    let (bus, mut rx) = EventBus::new("sess-store", 512);
    let mut orchestrator =
        SessionOrchestrator::new(state, "sess-store", "user-1", bus, CancelToken::new());

    send(&mut orchestrator, "hello").await;
    let frames = drain(&mut rx);

    // No plan_create; one apology final message.
    assert!(plan_creates(&frames).is_empty());
    let finals = final_messages(&frames);
    assert_eq!(finals.len(), 1);
    assert!(finals[0].0.contains("error"));

    // Heal the store (the session record now exists where plans live)
    // and the next turn works end-to-end.
    SessionStore::new(plan_db)
        .upsert("sess-store", "user-1", "manufacturing")
        .await
        .unwrap();
    send(&mut orchestrator, "hello again").await;
    let frames = drain(&mut rx);
    assert_eq!(plan_creates(&frames).len(), 1);
    let updates = plan_updates(&frames);
    assert_eq!(updates.last().unwrap().status, "completed");
    assert_eq!(final_messages(&frames).len(), 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 6 — concurrent sessions stay isolated
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn concurrent_sessions_are_isolated() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_handler = calls.clone();
    let server = ScriptedServer::new().tool("get_fake_data", move |_args| {
        let n = calls_in_handler.fetch_add(1, Ordering::SeqCst);
        structured(serde_json::json!({"sequence": n}))
    });

    let h = harness(
        DATA_PLAN,
        vec![(server_entry("core", None), Arc::new(server) as Arc<dyn McpTransport>)],
    );
    let (mut orch_a, mut rx_a) = h.orchestrator("sess-a");
    let (mut orch_b, mut rx_b) = h.orchestrator("sess-b");

    tokio::join!(send(&mut orch_a, "data please"), send(&mut orch_b, "data please"));

    let frames_a = drain(&mut rx_a);
    let frames_b = drain(&mut rx_b);

    let plan_a = plan_creates(&frames_a)[0].plan_id.clone();
    let plan_b = plan_creates(&frames_b)[0].plan_id.clone();
    assert_ne!(plan_a, plan_b);

    // Neither stream ever references the other's plan.
    for update in plan_updates(&frames_a) {
        assert_eq!(update.plan_id, plan_a);
    }
    for update in plan_updates(&frames_b) {
        assert_eq!(update.plan_id, plan_b);
    }

    // Both completed, each with its own memory namespace.
    assert_eq!(plan_updates(&frames_a).last().unwrap().status, "completed");
    assert_eq!(plan_updates(&frames_b).last().unwrap().status, "completed");

    let keys_a = h.state.memory.list_keys("sess-a", None).await.unwrap();
    let keys_b = h.state.memory.list_keys("sess-b", None).await.unwrap();
    assert!(!keys_a.is_empty());
    assert!(!keys_b.is_empty());
    // Action ids are unique per plan, so the canonical keys never cross.
    assert!(keys_a.iter().all(|k| !keys_b.contains(k)));

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store-before-notify spot check
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn final_update_matches_store_state() {
    let server = ScriptedServer::new()
        .tool("get_fake_data", |_args| structured(serde_json::json!({"ok": true})));
    let h = harness(
        DATA_PLAN,
        vec![(server_entry("core", None), Arc::new(server) as Arc<dyn McpTransport>)],
    );
    let (mut orchestrator, mut rx) = h.orchestrator("sess-check");

    send(&mut orchestrator, "data").await;
    let frames = drain(&mut rx);
    let last: PlanSnapshot = (*plan_updates(&frames).last().unwrap()).clone();

    // Reading the store now yields the same statuses the final frame
    // carried.
    let stored = h.state.plans.get_plan(&last.plan_id).await.unwrap().unwrap();
    assert_eq!(stored.status.as_str(), last.status);
    for (snap, action) in last.actions.iter().zip(stored.actions.iter()) {
        assert_eq!(snap.id, action.action_id);
        assert_eq!(snap.status, action.status.as_str());
    }
}
