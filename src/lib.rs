//! # cortex-relay
//!
//! A client for the Cortex headset service plus a trigger-and-wait bridge
//! that forwards decoded samples to a remote inference endpoint.
//!
//! ## Layout
//! - [`channel`]: full-duplex text channel over tokio-tungstenite, with an
//!   in-memory pair for tests
//! - [`protocol`]: request kinds, frame encoding and inbound classification
//! - [`registry`]: correlation ids for requests in flight
//! - [`session`]: handshake state machine and its actor
//! - [`streams`]: stream names, label extraction and push-frame decoding
//! - [`events`]: typed session events with callbacks and a broadcast channel
//! - [`bridge`]: the query bridge
//! - [`config`]: TOML configuration
//!
//! ```no_run
//! use cortex_relay::config::RelayConfig;
//! use cortex_relay::events::{EventDispatcher, EventKind};
//! use cortex_relay::session::CortexClient;
//!
//! # async fn run() -> cortex_relay::error::Result<()> {
//! let config = RelayConfig::load("relay.toml")?;
//! let events = EventDispatcher::new();
//! events.on(EventKind::SessionReady, |ev| println!("{ev:?}"));
//! let client = CortexClient::connect(config.session, events)?;
//! client.join().await
//! # }
//! ```

pub mod bridge;
pub mod channel;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod streams;

pub use bridge::QueryBridge;
pub use error::{RelayError, Result};
pub use events::{EventDispatcher, EventKind, SessionEvent};
pub use session::{CortexClient, Operation, SessionState};
