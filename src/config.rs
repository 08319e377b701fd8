//! Configuration for the session client and the query bridge.
//!
//! Loaded from TOML; every field except the credentials has a default.
//!
//! ```toml
//! [session]
//! client_id = "..."
//! client_secret = "..."
//! headset_id = "EPOCX-1234"
//!
//! [bridge]
//! url = "ws://localhost:8000/connect/text"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Environment variable overriding `session.client_id`.
pub const ENV_CLIENT_ID: &str = "CORTEX_CLIENT_ID";
/// Environment variable overriding `session.client_secret`.
pub const ENV_CLIENT_SECRET: &str = "CORTEX_CLIENT_SECRET";

/// The local service only listens on TLS; builds without the `tls` feature
/// cannot reach it.
fn default_session_url() -> String {
    "wss://localhost:6868".to_string()
}

fn default_debit() -> u32 {
    10
}

fn default_connect_poll_interval_ms() -> u64 {
    3_000
}

fn default_max_connect_polls() -> u32 {
    10
}

fn default_bridge_url() -> String {
    "ws://localhost:8000/connect/text".to_string()
}

fn default_poll_interval_us() -> u64 {
    1_000
}

/// Settings for the Cortex session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_url")]
    pub url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// License key when borrowing one; empty uses the app's own.
    #[serde(default)]
    pub license: String,
    /// Number of sessions to debit from the license.
    #[serde(default = "default_debit")]
    pub debit: u32,
    /// Pin a headset; when absent the first discovered headset is used.
    #[serde(default)]
    pub headset_id: Option<String>,
    /// Training profile the profile workflow loads.
    #[serde(default)]
    pub profile_name: Option<String>,
    /// Delay before re-querying a headset that reports `connecting`.
    #[serde(default = "default_connect_poll_interval_ms")]
    pub connect_poll_interval_ms: u64,
    /// How many `connecting` re-queries to tolerate before giving up.
    #[serde(default = "default_max_connect_polls")]
    pub max_connect_polls: u32,
}

impl SessionConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            url: default_session_url(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            license: String::new(),
            debit: default_debit(),
            headset_id: None,
            profile_name: None,
            connect_poll_interval_ms: default_connect_poll_interval_ms(),
            max_connect_polls: default_max_connect_polls(),
        }
    }

    /// Reject blank credentials before any connection is attempted.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(RelayError::blank("client_id"));
        }
        if self.client_secret.trim().is_empty() {
            return Err(RelayError::blank("client_secret"));
        }
        Ok(())
    }

    pub fn connect_poll_interval(&self) -> Duration {
        Duration::from_millis(self.connect_poll_interval_ms)
    }
}

/// Settings for the query bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_url")]
    pub url: String,
    /// Transmitter cadence.
    #[serde(default = "default_poll_interval_us")]
    pub poll_interval_us: u64,
    /// Default wait for `trigger()`; `None` waits indefinitely.
    #[serde(default)]
    pub trigger_timeout_ms: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: default_bridge_url(),
            poll_interval_us: default_poll_interval_us(),
            trigger_timeout_ms: None,
        }
    }
}

impl BridgeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us.max(1))
    }

    pub fn trigger_timeout(&self) -> Option<Duration> {
        self.trigger_timeout_ms.map(Duration::from_millis)
    }
}

/// Top-level file layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub session: SessionConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

impl RelayConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| RelayError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Replace credentials with `CORTEX_CLIENT_ID` / `CORTEX_CLIENT_SECRET` when set.
    pub fn apply_env(&mut self) {
        if let Ok(id) = std::env::var(ENV_CLIENT_ID) {
            self.session.client_id = id;
        }
        if let Ok(secret) = std::env::var(ENV_CLIENT_SECRET) {
            self.session.client_secret = secret;
        }
    }
}
