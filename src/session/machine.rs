//! # Session state machine
//!
//! ## Responsibility
//! Drives the handshake (access check → authorize → headset discovery →
//! connect → create session) and every request/reply pair layered on top of
//! it, publishing one event per completed operation.
//!
//! ## Guarantees
//! - Single writer: only the owning worker calls into the machine
//! - Nothing is sent before the channel reports open
//! - `authorize` is only sent after a reply or warning grants access
//! - Protocol errors are published, never fatal
//!
//! ## NOT Responsible For
//! - Socket I/O (see [`crate::channel`])
//! - Timers: a `connecting` headset schedules a re-query that the owning
//!   actor fires via [`SessionMachine::poll_headsets`]

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelEvent, ChannelHandle};
use crate::config::SessionConfig;
use crate::error::{RelayError, Result};
use crate::events::{EventDispatcher, MentalCommandQuery, SessionEvent};
use crate::protocol::{classify, encode_request, warning, Inbound, RequestKind, RpcError, Warning};
use crate::registry::RequestRegistry;
use crate::streams::{decode, extract_labels, StreamName};

use super::operations::{Operation, ProfileAction};
use super::state::{HeadsetInfo, Session, SessionState};

/// The handshake and request/reply core for one channel.
pub struct SessionMachine {
    config: SessionConfig,
    channel: ChannelHandle,
    events: EventDispatcher,
    registry: RequestRegistry,
    session: Session,
    connect_polls: u32,
    scheduled_requery: Option<Duration>,
}

impl SessionMachine {
    /// Fails with `InvalidArgument` on blank credentials.
    pub fn new(config: SessionConfig, channel: ChannelHandle, events: EventDispatcher) -> Result<Self> {
        config.validate()?;
        let session = Session::new(config.headset_id.clone(), config.profile_name.clone());
        Ok(Self {
            config,
            channel,
            events,
            registry: RequestRegistry::new(),
            session,
            connect_polls: 0,
            scheduled_requery: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Delay after which the owner should call [`poll_headsets`](Self::poll_headsets).
    pub fn take_scheduled_requery(&mut self) -> Option<Duration> {
        self.scheduled_requery.take()
    }

    fn set_state(&mut self, next: SessionState) {
        if self.session.state != next {
            debug!(from = %self.session.state, to = %next, "session state");
            self.session.state = next;
        }
    }

    fn warn_caller(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(message = %message, "session warning");
        self.events.publish(SessionEvent::Warning(message));
    }

    fn ensure_live(&self) -> Result<()> {
        match self.session.state {
            SessionState::Closed => Err(RelayError::ChannelClosed),
            SessionState::Errored => Err(RelayError::Errored("session is in the errored state".into())),
            _ => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Channel events
    // -----------------------------------------------------------------------

    pub fn handle_channel_event(&mut self, event: ChannelEvent) -> Result<()> {
        match event {
            ChannelEvent::Open => self.on_open(),
            ChannelEvent::Message(text) => self.on_message(&text),
            ChannelEvent::Error(err) => {
                self.on_transport_error(&err);
                Ok(())
            }
            ChannelEvent::Closed { code, reason } => {
                self.on_closed(code, &reason);
                Ok(())
            }
        }
    }

    /// Start the handshake.
    pub fn on_open(&mut self) -> Result<()> {
        if self.session.state != SessionState::Idle {
            warn!(state = %self.session.state, "channel reopened mid-session, ignoring");
            return Ok(());
        }
        info!("channel open, checking access right");
        self.set_state(SessionState::CheckingAccess);
        let params = self.credentials();
        self.issue(RequestKind::HasAccessRight, params)?;
        Ok(())
    }

    pub fn on_message(&mut self, text: &str) -> Result<()> {
        debug!(frame = %text, "received");
        if self.session.state.is_terminal() {
            debug!(state = %self.session.state, "dropping frame after terminal state");
            return Ok(());
        }
        match classify(text)? {
            Inbound::Push(frame) => {
                let sample = decode(&frame, &self.session.labels)?;
                self.events.publish(SessionEvent::StreamData(sample));
                Ok(())
            }
            Inbound::Reply { id, result } => {
                let kind = self.registry.complete(id)?;
                debug!(id, kind = %kind, "reply");
                self.handle_reply(kind, result)
            }
            Inbound::Error { id, error } => {
                let kind = self.registry.complete(id)?;
                self.handle_error(kind, error);
                Ok(())
            }
            Inbound::Warning(w) => self.handle_warning(w),
        }
    }

    pub fn on_transport_error(&mut self, err: &str) {
        error!(error = %err, "session channel error");
        self.registry.clear();
        if !self.session.state.is_terminal() {
            self.set_state(SessionState::Errored);
        }
    }

    pub fn on_closed(&mut self, code: Option<u16>, reason: &str) {
        info!(code = ?code, reason = %reason, "session channel closed");
        self.registry.clear();
        self.session.drop_session();
        self.session.auth_token = None;
        self.set_state(SessionState::Closed);
    }

    /// Close the channel from our side.
    pub fn close(&mut self) {
        self.channel.close();
        self.on_closed(Some(1000), "closed by caller");
    }

    // -----------------------------------------------------------------------
    // Caller requests
    // -----------------------------------------------------------------------

    /// Validate and send a caller-issued request.
    pub fn execute(&mut self, op: Operation) -> Result<()> {
        self.ensure_live()?;
        op.validate()?;
        match op {
            Operation::QueryHeadsets => self.query_headsets(),
            Operation::CreateSession => self.create_session(),
            Operation::Subscribe(_) => {
                let params = op.params(&self.session)?;
                self.issue(RequestKind::Subscribe, params)?;
                if self.session.state == SessionState::SessionCreated {
                    self.set_state(SessionState::Subscribing);
                }
                Ok(())
            }
            other => {
                let params = other.params(&self.session)?;
                self.issue(other.kind(), params).map(|_| ())
            }
        }
    }

    /// Fire the re-query scheduled for a `connecting` headset.
    pub fn poll_headsets(&mut self) -> Result<()> {
        if self.session.state != SessionState::AwaitingHeadsetConnected {
            debug!(state = %self.session.state, "headset poll no longer needed");
            return Ok(());
        }
        self.query_headsets()
    }

    // -----------------------------------------------------------------------
    // Outbound helpers
    // -----------------------------------------------------------------------

    fn issue(&mut self, kind: RequestKind, params: Value) -> Result<u64> {
        let id = self.registry.register(kind)?;
        let sent = encode_request(id, kind, &params).and_then(|text| {
            debug!(frame = %text, "sending");
            self.channel.send(text)
        });
        if let Err(e) = sent {
            self.registry.release(id);
            return Err(e);
        }
        debug!(id, kind = %kind, "request sent");
        Ok(id)
    }

    /// Server-driven re-issue: skip quietly if the same kind is already pending.
    fn reissue(&mut self, kind: RequestKind, params: Value) -> Result<()> {
        if self.registry.is_in_flight(kind) {
            debug!(kind = %kind, "already in flight, not re-issuing");
            return Ok(());
        }
        self.issue(kind, params).map(|_| ())
    }

    fn credentials(&self) -> Value {
        json!({
            "clientId": self.config.client_id,
            "clientSecret": self.config.client_secret,
        })
    }

    fn authorize(&mut self) -> Result<()> {
        info!("authorizing");
        let params = json!({
            "clientId": self.config.client_id,
            "clientSecret": self.config.client_secret,
            "license": self.config.license,
            "debit": self.config.debit,
        });
        self.reissue(RequestKind::Authorize, params)
    }

    fn query_headsets(&mut self) -> Result<()> {
        if self.session.session_id.is_none() {
            self.set_state(SessionState::DiscoveringHeadset);
        }
        self.reissue(RequestKind::QueryHeadsets, json!({}))
    }

    fn create_session(&mut self) -> Result<()> {
        if let Some(existing) = &self.session.session_id {
            self.warn_caller(format!("There is an existing session {existing}"));
            return Ok(());
        }
        let params = Operation::CreateSession.params(&self.session)?;
        self.issue(RequestKind::CreateSession, params).map(|_| ())
    }

    fn setup_profile(&mut self, profile: String, action: ProfileAction) -> Result<()> {
        let params = Operation::SetupProfile { profile, action }.params(&self.session)?;
        self.issue(RequestKind::SetupProfile, params).map(|_| ())
    }

    // -----------------------------------------------------------------------
    // Replies
    // -----------------------------------------------------------------------

    fn handle_reply(&mut self, kind: RequestKind, result: Value) -> Result<()> {
        match kind {
            RequestKind::HasAccessRight => {
                if access_granted(&result) {
                    self.authorize()
                } else {
                    self.set_state(SessionState::RequestingAccess);
                    self.warn_caller("Access not granted yet, requesting access");
                    let params = self.credentials();
                    self.issue(RequestKind::RequestAccess, params).map(|_| ())
                }
            }
            RequestKind::RequestAccess => {
                if access_granted(&result) {
                    self.authorize()
                } else {
                    let message = result
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("waiting for approval in the launcher");
                    self.warn_caller(message);
                    Ok(())
                }
            }
            RequestKind::Authorize => {
                let token = required_str(kind, &result, "cortexToken")?;
                info!("authorized");
                self.session.auth_token = Some(token);
                self.set_state(SessionState::Authorized);
                self.query_headsets()
            }
            RequestKind::QueryHeadsets => {
                let headsets: Vec<HeadsetInfo> = parse(kind, result)?;
                self.on_headsets(headsets)
            }
            RequestKind::ConnectDevice => {
                info!(headset = ?self.session.headset_id, "connect requested, re-querying");
                self.query_headsets()
            }
            RequestKind::DisconnectDevice => {
                let headset = self.session.headset_id.take().unwrap_or_default();
                info!(headset = %headset, "headset disconnected");
                self.events.publish(SessionEvent::HeadsetDisconnected(headset));
                Ok(())
            }
            RequestKind::CreateSession => {
                let id = required_str(kind, &result, "id")?;
                info!(session = %id, "session created");
                self.connect_polls = 0;
                self.session.session_id = Some(id.clone());
                self.set_state(SessionState::SessionCreated);
                self.events.publish(SessionEvent::SessionReady(id));
                Ok(())
            }
            RequestKind::CloseSession => {
                let id = self.session.drop_session().unwrap_or_default();
                info!(session = %id, "session closed");
                self.set_state(SessionState::Authorized);
                self.events.publish(SessionEvent::SessionClosed(id));
                Ok(())
            }
            RequestKind::Subscribe => {
                self.on_subscribed(&result)?;
                Ok(())
            }
            RequestKind::Unsubscribe => {
                self.on_unsubscribed(&result)?;
                Ok(())
            }
            RequestKind::QueryProfile => {
                #[derive(Deserialize)]
                struct Entry {
                    name: String,
                }
                let entries: Vec<Entry> = parse(kind, result)?;
                let names = entries.into_iter().map(|e| e.name).collect();
                self.events.publish(SessionEvent::ProfilesListed(names));
                Ok(())
            }
            RequestKind::GetCurrentProfile => self.on_current_profile(&result),
            RequestKind::SetupProfile => self.on_setup_profile(&result),
            RequestKind::Training => {
                self.events.publish(SessionEvent::TrainingResult(result));
                Ok(())
            }
            RequestKind::CreateRecord => {
                let record = required(kind, &result, "record")?;
                self.session.record_id = record.get("uuid").and_then(Value::as_str).map(str::to_string);
                info!(record = ?self.session.record_id, "record created");
                self.events.publish(SessionEvent::RecordCreated(record));
                Ok(())
            }
            RequestKind::StopRecord => {
                let record = required(kind, &result, "record")?;
                self.events.publish(SessionEvent::RecordStopped(record));
                Ok(())
            }
            RequestKind::ExportRecord => {
                let ok = partition(&result, "recordId", |id, reason| {
                    warn!(record = %id, reason = %reason, "record export failed");
                });
                self.events.publish(SessionEvent::RecordExported(ok));
                Ok(())
            }
            RequestKind::InjectMarker => {
                let marker = required(kind, &result, "marker")?;
                self.events.publish(SessionEvent::MarkerInjected(marker));
                Ok(())
            }
            RequestKind::UpdateMarker => {
                let marker = required(kind, &result, "marker")?;
                self.events.publish(SessionEvent::MarkerUpdated(marker));
                Ok(())
            }
            RequestKind::MentalCommandActiveAction | RequestKind::SetMentalCommandActiveAction => {
                self.mental_command(MentalCommandQuery::ActiveAction, result)
            }
            RequestKind::MentalCommandBrainMap => {
                self.mental_command(MentalCommandQuery::BrainMap, result)
            }
            RequestKind::MentalCommandTrainingThreshold => {
                self.mental_command(MentalCommandQuery::TrainingThreshold, result)
            }
            RequestKind::MentalCommandActionSensitivity => {
                self.mental_command(MentalCommandQuery::ActionSensitivity, result)
            }
            RequestKind::GetCortexInfo => {
                self.events.publish(SessionEvent::CortexInfo(result));
                Ok(())
            }
        }
    }

    fn mental_command(&self, query: MentalCommandQuery, data: Value) -> Result<()> {
        self.events.publish(SessionEvent::MentalCommand { query, data });
        Ok(())
    }

    fn on_headsets(&mut self, headsets: Vec<HeadsetInfo>) -> Result<()> {
        for h in &headsets {
            info!(headset = %h.id, status = %h.status, connected_by = ?h.connected_by, "headset");
        }

        if let Some(id) = &self.session.session_id {
            debug!(session = %id, "headset list while a session is live, not re-driving the handshake");
            return Ok(());
        }

        let Some(first) = headsets.first() else {
            self.warn_caller("No headset available. Please turn on a headset.");
            return Ok(());
        };

        let Some(wanted) = self.session.headset_id.clone() else {
            info!(headset = %first.id, "no headset pinned, using the first one");
            self.session.headset_id = Some(first.id.clone());
            return self.query_headsets();
        };

        let Some(found) = headsets.iter().find(|h| h.id == wanted) else {
            self.warn_caller(format!(
                "Cannot find the headset {wanted}. Please make sure the id is correct."
            ));
            return Ok(());
        };

        match found.status.as_str() {
            "connected" => {
                self.connect_polls = 0;
                self.create_session()
            }
            "discovered" => {
                self.set_state(SessionState::ConnectingHeadset);
                let params = json!({"command": "connect", "headset": wanted});
                self.issue(RequestKind::ConnectDevice, params).map(|_| ())
            }
            "connecting" => {
                self.connect_polls += 1;
                if self.connect_polls > self.config.max_connect_polls {
                    self.warn_caller(format!(
                        "Headset {wanted} still connecting after {} polls, giving up",
                        self.config.max_connect_polls
                    ));
                    self.set_state(SessionState::Errored);
                    return Ok(());
                }
                debug!(headset = %wanted, poll = self.connect_polls, "headset connecting, re-query scheduled");
                self.set_state(SessionState::AwaitingHeadsetConnected);
                self.scheduled_requery = Some(self.config.connect_poll_interval());
                Ok(())
            }
            other => {
                self.warn_caller(format!("Invalid headset connection status {other}"));
                Ok(())
            }
        }
    }

    fn on_subscribed(&mut self, result: &Value) -> Result<()> {
        for entry in list(result, "success") {
            let Some(name) = entry.get("streamName").and_then(Value::as_str) else {
                continue;
            };
            let stream = match StreamName::from_str(name) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "subscribed to a stream this client cannot decode");
                    continue;
                }
            };
            let labels = match extract_labels(stream, entry.get("cols").unwrap_or(&Value::Null)) {
                Ok(l) => l,
                Err(e) => {
                    error!(stream = %stream, error = %e, "could not read stream labels");
                    continue;
                }
            };
            info!(stream = %stream, labels = labels.len(), "stream subscribed");
            if stream.is_labeled() {
                self.session.labels.insert(stream, labels.clone());
            }
            self.session.subscribed.insert(stream);
            self.events.publish(SessionEvent::StreamLabels { stream, labels });
        }

        for entry in list(result, "failure") {
            let name = entry.get("streamName").and_then(Value::as_str).unwrap_or("?");
            let reason = entry.get("message").and_then(Value::as_str).unwrap_or("");
            warn!(stream = %name, reason = %reason, "stream subscription failed");
        }

        if self.session.subscribed.is_empty() {
            self.set_state(SessionState::SessionCreated);
        } else {
            self.set_state(SessionState::Streaming);
        }
        Ok(())
    }

    fn on_unsubscribed(&mut self, result: &Value) -> Result<()> {
        let mut removed = Vec::new();
        for name in partition(result, "streamName", |name, reason| {
            warn!(stream = %name, reason = %reason, "stream unsubscribe failed");
        }) {
            match StreamName::from_str(&name) {
                Ok(stream) => {
                    self.session.subscribed.remove(&stream);
                    removed.push(stream);
                }
                Err(e) => debug!(error = %e, "unsubscribed from an unknown stream"),
            }
        }
        if self.session.subscribed.is_empty() && self.session.state == SessionState::Streaming {
            self.set_state(SessionState::SessionCreated);
        }
        self.events.publish(SessionEvent::StreamsUnsubscribed(removed));
        Ok(())
    }

    fn on_current_profile(&mut self, result: &Value) -> Result<()> {
        let name = result.get("name").and_then(Value::as_str).map(str::to_string);
        let loaded_by_this_app = result
            .get("loadedByThisApp")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        self.events.publish(SessionEvent::CurrentProfile {
            name: name.clone(),
            loaded_by_this_app,
        });

        let Some(wanted) = self.session.profile_name.clone() else {
            return Ok(());
        };
        match name {
            None => {
                info!(profile = %wanted, "no profile loaded, loading");
                self.setup_profile(wanted, ProfileAction::Load)
            }
            Some(current) if current != wanted => {
                self.warn_caller(format!(
                    "Profile {current} is loaded for headset {}",
                    self.session.headset_id.as_deref().unwrap_or("?")
                ));
                Ok(())
            }
            Some(_) if loaded_by_this_app => {
                self.events.publish(SessionEvent::ProfileLoaded(true));
                Ok(())
            }
            Some(_) => {
                info!(profile = %wanted, "profile loaded by another app, unloading");
                self.setup_profile(wanted, ProfileAction::Unload)
            }
        }
    }

    fn on_setup_profile(&mut self, result: &Value) -> Result<()> {
        let action = required_str(RequestKind::SetupProfile, result, "action")?;
        match action.as_str() {
            "create" => {
                let name = result.get("name").and_then(Value::as_str);
                match (&self.session.profile_name, name) {
                    (Some(wanted), Some(created)) if wanted == created => {
                        let wanted = wanted.clone();
                        self.setup_profile(wanted, ProfileAction::Load)
                    }
                    _ => Ok(()),
                }
            }
            "load" => {
                self.events.publish(SessionEvent::ProfileLoaded(true));
                Ok(())
            }
            "unload" => {
                self.events.publish(SessionEvent::ProfileLoaded(false));
                Ok(())
            }
            "save" => {
                self.events.publish(SessionEvent::ProfileSaved);
                Ok(())
            }
            other => {
                debug!(action = %other, "unhandled setupProfile action");
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Errors and warnings
    // -----------------------------------------------------------------------

    fn handle_error(&mut self, kind: RequestKind, error: RpcError) {
        warn!(kind = %kind, code = error.code, message = %error.message, "request failed");
        self.events.publish(SessionEvent::InformError { kind, error });
    }

    fn handle_warning(&mut self, w: Warning) -> Result<()> {
        match w.code {
            warning::ACCESS_RIGHT_GRANTED => {
                info!("access granted by the user");
                self.authorize()
            }
            warning::HEADSET_CONNECTED => {
                if self.session.auth_token.is_none() || self.session.session_id.is_some() {
                    debug!("headset connected, nothing to re-drive");
                    return Ok(());
                }
                self.query_headsets()
            }
            warning::CORTEX_AUTO_UNLOAD_PROFILE => {
                info!(profile = ?self.session.profile_name, "profile unloaded by the service");
                self.session.profile_name = None;
                Ok(())
            }
            warning::CORTEX_STOP_ALL_STREAMS => {
                let stopped = w.message.get("sessionId").and_then(Value::as_str);
                match (stopped, self.session.session_id.as_deref()) {
                    (Some(stopped), Some(current)) if stopped == current => {
                        let id = self.session.drop_session().unwrap_or_default();
                        warn!(session = %id, "service stopped all streams");
                        self.set_state(SessionState::Authorized);
                        self.events.publish(SessionEvent::StreamsStopped(id));
                    }
                    _ => debug!(session = ?stopped, "stop-all-streams for another session"),
                }
                Ok(())
            }
            code => {
                info!(code, message = %w.message, "service warning");
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Reply helpers
// ---------------------------------------------------------------------------

fn access_granted(result: &Value) -> bool {
    result
        .get("accessGranted")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn parse<T: serde::de::DeserializeOwned>(kind: RequestKind, result: Value) -> Result<T> {
    serde_json::from_value(result).map_err(|e| RelayError::MalformedReply {
        kind,
        detail: e.to_string(),
    })
}

fn required(kind: RequestKind, result: &Value, field: &str) -> Result<Value> {
    result
        .get(field)
        .cloned()
        .ok_or_else(|| RelayError::MalformedReply {
            kind,
            detail: format!("missing '{field}'"),
        })
}

fn required_str(kind: RequestKind, result: &Value, field: &str) -> Result<String> {
    result
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RelayError::MalformedReply {
            kind,
            detail: format!("missing string '{field}'"),
        })
}

fn list<'a>(result: &'a Value, field: &str) -> impl Iterator<Item = &'a Map<String, Value>> {
    result
        .get(field)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

/// Collect `key` from every `success` entry; report every `failure` entry.
fn partition(result: &Value, key: &str, mut on_failure: impl FnMut(&str, &str)) -> Vec<String> {
    for entry in list(result, "failure") {
        on_failure(
            entry.get(key).and_then(Value::as_str).unwrap_or("?"),
            entry.get("message").and_then(Value::as_str).unwrap_or(""),
        );
    }
    list(result, "success")
        .filter_map(|e| e.get(key).and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, Peer};
    use tokio::sync::broadcast;

    fn machine() -> (SessionMachine, Peer, broadcast::Receiver<SessionEvent>) {
        let (chan, peer) = Channel::pair();
        let events = EventDispatcher::new();
        let rx = events.subscribe();
        let m = SessionMachine::new(SessionConfig::new("id", "secret"), chan.handle, events).unwrap();
        (m, peer, rx)
    }

    fn sent(peer: &mut Peer) -> Vec<Value> {
        peer.drain_texts()
            .iter()
            .map(|t| serde_json::from_str(t).unwrap())
            .collect()
    }

    #[test]
    fn blank_credentials_are_rejected_up_front() {
        let (chan, _peer) = Channel::pair();
        let err = SessionMachine::new(SessionConfig::new("", "x"), chan.handle, EventDispatcher::new());
        assert!(matches!(err, Err(RelayError::InvalidArgument { field: "client_id", .. })));
    }

    #[test]
    fn nothing_is_sent_before_open() {
        let (_m, mut peer, _rx) = machine();
        assert!(peer.drain_texts().is_empty());
    }

    #[test]
    fn open_checks_access_right() {
        let (mut m, mut peer, _rx) = machine();
        m.on_open().unwrap();
        let out = sent(&mut peer);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["method"], "hasAccessRight");
        assert_eq!(out[0]["params"]["clientId"], "id");
        assert_eq!(m.state(), SessionState::CheckingAccess);
    }

    #[derive(Clone, Default)]
    struct Capture(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn debug_log_carries_whole_frames() {
        let (mut m, mut peer, _rx) = machine();
        let capture = Capture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(capture.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            m.on_open().unwrap();
            let id = sent(&mut peer)[0]["id"].clone();
            let reply = json!({"id": id, "result": {"accessGranted": false, "message": "pending"}});
            m.on_message(&reply.to_string()).unwrap();
        });

        let log = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert!(log.contains(r#""clientSecret":"secret""#), "{log}");
        assert!(log.contains(r#""accessGranted":false"#), "{log}");
    }

    #[test]
    fn partition_splits_success_and_failure() {
        let result = json!({
            "success": [{"recordId": "a"}, {"recordId": "b"}],
            "failure": [{"recordId": "c", "message": "disk full"}],
        });
        let mut failed = Vec::new();
        let ok = partition(&result, "recordId", |id, why| failed.push(format!("{id}:{why}")));
        assert_eq!(ok, vec!["a", "b"]);
        assert_eq!(failed, vec!["c:disk full"]);
    }

    #[test]
    fn unknown_reply_id_is_an_error() {
        let (mut m, _peer, _rx) = machine();
        let err = m.on_message(r#"{"id":99,"result":{}}"#).unwrap_err();
        assert!(matches!(err, RelayError::UnknownRequestId(99)));
    }

    #[test]
    fn transport_error_is_absorbing() {
        let (mut m, _peer, _rx) = machine();
        m.on_open().unwrap();
        m.on_transport_error("reset by peer");
        assert_eq!(m.state(), SessionState::Errored);
        assert!(matches!(m.execute(Operation::QueryProfile), Err(RelayError::Errored(_))));
        m.on_message(r#"{"warning":{"code":104,"message":""}}"#).unwrap();
        assert_eq!(m.state(), SessionState::Errored);
    }
}
