//! `aris-mcp-client` — MCP (Model Context Protocol) client for ARIS.
//!
//! This crate provides:
//! - JSON-RPC 2.0 protocol types for talking to MCP servers.
//! - An HTTP transport that POSTs JSON-RPC to each server's endpoint.
//! - An [`McpDispatcher`] that holds all server connections and
//!   orchestrates tool discovery, routing, auth injection, result
//!   normalization, and plan-status side effects.
//!
//! # Usage
//!
//! ```rust,ignore
//! use aris_mcp_client::McpDispatcher;
//!
//! let dispatcher = McpDispatcher::from_config(&config.mcp);
//! dispatcher.start_all().await;
//!
//! for tool in dispatcher.list_tools().await {
//!     println!("{}::{}", tool.server, tool.name);
//! }
//!
//! let result = dispatcher.call("get_fake_data", json!({"limit": 5}), None).await?;
//! ```

pub mod dispatcher;
pub mod protocol;
pub mod transport;

// Re-exports for convenience.
pub use dispatcher::{McpDispatcher, McpError, PlanContext, PlanObserver, ServerState};
pub use protocol::{CallToolResult, ToolDef};
pub use transport::{HttpTransport, McpTransport, TransportError};
