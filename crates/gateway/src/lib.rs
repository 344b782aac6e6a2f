//! `aris-gateway` — the ARIS server process.
//!
//! Owns the client channel (WebSocket), the per-session orchestration
//! pipeline (planner → plan store → executioner → session memory →
//! event fan-out), and the service wiring in `main.rs`.

pub mod api;
pub mod runtime;
pub mod state;
