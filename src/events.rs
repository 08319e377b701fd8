//! # Event dispatcher
//!
//! ## Responsibility
//! Fans session milestones and stream data out to observers without the
//! session knowing who is listening.
//!
//! Two ways to listen:
//! - [`EventDispatcher::on`] registers a callback for one [`EventKind`]
//!   (invoked synchronously on the publishing worker)
//! - [`EventDispatcher::subscribe`] returns a `tokio::sync::broadcast`
//!   receiver that sees every event
//!
//! ## Guarantees
//! - Clone freely: all clones share the same callback table and channel
//! - Publishing never blocks and never fails; with no listeners the event is dropped

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tokio::sync::broadcast;

use crate::protocol::{RequestKind, RpcError};
use crate::streams::{StreamName, StreamSample};

/// Broadcast channel capacity (number of events buffered per slow receiver).
pub const EVENT_CHANNEL_CAP: usize = 1024;

/// Which mental-command parameter a result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MentalCommandQuery {
    ActiveAction,
    BrainMap,
    TrainingThreshold,
    ActionSensitivity,
}

/// Everything the session publishes.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A session was created; carries its id.
    SessionReady(String),
    /// A subscription succeeded; carries the learned labels.
    StreamLabels { stream: StreamName, labels: Vec<String> },
    StreamData(StreamSample),
    StreamsUnsubscribed(Vec<StreamName>),
    /// The service stopped every stream of this session id.
    StreamsStopped(String),
    SessionClosed(String),
    HeadsetDisconnected(String),
    ProfilesListed(Vec<String>),
    CurrentProfile {
        name: Option<String>,
        loaded_by_this_app: bool,
    },
    /// `true` after a load, `false` after an unload.
    ProfileLoaded(bool),
    ProfileSaved,
    TrainingResult(Value),
    RecordCreated(Value),
    RecordStopped(Value),
    /// Ids of the records that exported successfully.
    RecordExported(Vec<String>),
    MarkerInjected(Value),
    MarkerUpdated(Value),
    MentalCommand {
        query: MentalCommandQuery,
        data: Value,
    },
    CortexInfo(Value),
    /// The service answered a request with an error object.
    InformError { kind: RequestKind, error: RpcError },
    /// An advisory the caller may need to act on (approval pending, no headset, ...).
    Warning(String),
}

/// Event names observers can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionReady,
    StreamLabels,
    StreamData(StreamName),
    StreamsUnsubscribed,
    StreamsStopped,
    SessionClosed,
    HeadsetDisconnected,
    ProfilesListed,
    CurrentProfile,
    ProfileLoaded,
    ProfileSaved,
    TrainingResult,
    RecordCreated,
    RecordStopped,
    RecordExported,
    MarkerInjected,
    MarkerUpdated,
    MentalCommand,
    CortexInfo,
    InformError,
    Warning,
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::SessionReady(_) => EventKind::SessionReady,
            SessionEvent::StreamLabels { .. } => EventKind::StreamLabels,
            SessionEvent::StreamData(sample) => EventKind::StreamData(sample.stream()),
            SessionEvent::StreamsUnsubscribed(_) => EventKind::StreamsUnsubscribed,
            SessionEvent::StreamsStopped(_) => EventKind::StreamsStopped,
            SessionEvent::SessionClosed(_) => EventKind::SessionClosed,
            SessionEvent::HeadsetDisconnected(_) => EventKind::HeadsetDisconnected,
            SessionEvent::ProfilesListed(_) => EventKind::ProfilesListed,
            SessionEvent::CurrentProfile { .. } => EventKind::CurrentProfile,
            SessionEvent::ProfileLoaded(_) => EventKind::ProfileLoaded,
            SessionEvent::ProfileSaved => EventKind::ProfileSaved,
            SessionEvent::TrainingResult(_) => EventKind::TrainingResult,
            SessionEvent::RecordCreated(_) => EventKind::RecordCreated,
            SessionEvent::RecordStopped(_) => EventKind::RecordStopped,
            SessionEvent::RecordExported(_) => EventKind::RecordExported,
            SessionEvent::MarkerInjected(_) => EventKind::MarkerInjected,
            SessionEvent::MarkerUpdated(_) => EventKind::MarkerUpdated,
            SessionEvent::MentalCommand { .. } => EventKind::MentalCommand,
            SessionEvent::CortexInfo(_) => EventKind::CortexInfo,
            SessionEvent::InformError { .. } => EventKind::InformError,
            SessionEvent::Warning(_) => EventKind::Warning,
        }
    }
}

type Callback = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

struct DispatcherState {
    callbacks: RwLock<HashMap<EventKind, Vec<Callback>>>,
    tx: broadcast::Sender<SessionEvent>,
}

/// Named-event publish/subscribe hub.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<DispatcherState>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("receivers", &self.inner.tx.receiver_count())
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAP);
        Self {
            inner: Arc::new(DispatcherState {
                callbacks: RwLock::new(HashMap::new()),
                tx,
            }),
        }
    }

    /// Register `callback` for every event of `kind`.
    ///
    /// Callbacks run on the publishing worker; keep them short.
    pub fn on<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.inner
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(Arc::new(callback));
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.tx.subscribe()
    }

    /// Deliver `event` to matching callbacks, then to broadcast receivers.
    pub fn publish(&self, event: SessionEvent) {
        let callbacks: Vec<Callback> = self
            .inner
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();
        for cb in &callbacks {
            cb(&event);
        }
        let _ = self.inner.tx.send(event);
    }
}
