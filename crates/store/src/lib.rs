//! `aris-store` — relational persistence for the ARIS orchestrator.
//!
//! One SQLite database holds four tables: `sessions`, `plans`, `actions`,
//! and `session_memory`. Three store façades share the connection:
//! - [`PlanStore`] — the authoritative state machine for plans and their
//!   actions. Every state change commits here BEFORE any client
//!   notification referencing it.
//! - [`MemoryStore`] — the durable key→value scratchpad carrying tool
//!   outputs across actions and turns.
//! - [`SessionStore`] — session records (owner, agent kind, model,
//!   activity, metadata).
//!
//! All access goes through a single serialized connection; each operation
//! is a self-contained `spawn_blocking` closure, so no connection is ever
//! held across an external await.

pub mod db;
pub mod memory;
pub mod plans;
pub mod schema;
pub mod sessions;

pub use db::{Database, StoreError};
pub use memory::{MemoryStats, MemoryStore};
pub use plans::PlanStore;
pub use sessions::{SessionRecord, SessionStore};
