//! Session data owned by the state machine.

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::error::{RelayError, Result};
use crate::streams::{StreamLabels, StreamName};

/// Where the handshake currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    CheckingAccess,
    /// Waiting for the user to approve the app in the launcher.
    RequestingAccess,
    Authorized,
    DiscoveringHeadset,
    ConnectingHeadset,
    /// The headset reported `connecting`; a re-query is scheduled.
    AwaitingHeadsetConnected,
    SessionCreated,
    Subscribing,
    Streaming,
    Closed,
    /// Absorbing: nothing but close is accepted from here.
    Errored,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Errored)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::CheckingAccess => "checking_access",
            SessionState::RequestingAccess => "requesting_access",
            SessionState::Authorized => "authorized",
            SessionState::DiscoveringHeadset => "discovering_headset",
            SessionState::ConnectingHeadset => "connecting_headset",
            SessionState::AwaitingHeadsetConnected => "awaiting_headset_connected",
            SessionState::SessionCreated => "session_created",
            SessionState::Subscribing => "subscribing",
            SessionState::Streaming => "streaming",
            SessionState::Closed => "closed",
            SessionState::Errored => "errored",
        };
        write!(f, "{s}")
    }
}

/// One entry of a `queryHeadsets` reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HeadsetInfo {
    pub id: String,
    pub status: String,
    #[serde(default, rename = "connectedBy")]
    pub connected_by: Option<String>,
}

/// Everything learned over the life of one channel.
#[derive(Debug, Clone)]
pub struct Session {
    pub state: SessionState,
    pub auth_token: Option<String>,
    pub headset_id: Option<String>,
    pub session_id: Option<String>,
    /// Profile the profile workflow works towards.
    pub profile_name: Option<String>,
    /// Uuid of the last record created.
    pub record_id: Option<String>,
    pub subscribed: BTreeSet<StreamName>,
    pub labels: StreamLabels,
}

impl Session {
    pub fn new(headset_id: Option<String>, profile_name: Option<String>) -> Self {
        Self {
            state: SessionState::Idle,
            auth_token: None,
            headset_id,
            session_id: None,
            profile_name,
            record_id: None,
            subscribed: BTreeSet::new(),
            labels: StreamLabels::new(),
        }
    }

    pub fn token(&self) -> Result<&str> {
        self.auth_token.as_deref().ok_or(RelayError::NotAuthorized)
    }

    pub fn active_session(&self) -> Result<&str> {
        self.session_id.as_deref().ok_or(RelayError::NoActiveSession)
    }

    pub fn headset(&self) -> Result<&str> {
        self.headset_id
            .as_deref()
            .ok_or_else(|| RelayError::blank("headset_id"))
    }

    /// Forget the session id and everything hanging off it.
    pub(crate) fn drop_session(&mut self) -> Option<String> {
        self.subscribed.clear();
        self.session_id.take()
    }
}
