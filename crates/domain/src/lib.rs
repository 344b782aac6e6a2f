//! `aris-domain` — shared types for the ARIS orchestrator.
//!
//! This crate holds everything the other crates agree on:
//! - The plan model ([`plan`]): execution plans, actions, and their
//!   status machines.
//! - The client wire format ([`frame`]): outbound frames delivered over
//!   the session channel.
//! - LLM and tool types ([`tool`]): provider-agnostic messages, tool
//!   specs, and discovered tool descriptors.
//! - Configuration ([`config`]) loaded from environment variables.
//! - The shared error type ([`error`]).

pub mod config;
pub mod error;
pub mod frame;
pub mod plan;
pub mod tool;

pub use error::{Error, Result};
