//! # Cortex session
//!
//! ## Responsibility
//! Own one Cortex connection end to end: run the handshake, correlate every
//! reply with the request that caused it, and turn replies, warnings and
//! stream pushes into [`SessionEvent`](crate::events::SessionEvent)s.
//!
//! ## Layout
//! - [`state`]: the data the session accumulates ([`Session`], [`SessionState`])
//! - [`operations`]: caller-issued requests and their params
//! - [`machine`]: the synchronous transition logic
//! - [`client`]: the tokio actor that owns a machine and its channel

pub mod client;
pub mod machine;
pub mod operations;
pub mod state;

pub use client::CortexClient;
pub use machine::SessionMachine;
pub use operations::{Operation, ProfileAction};
pub use state::{HeadsetInfo, Session, SessionState};
