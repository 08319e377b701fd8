//! Crate-level error type.
//!
//! Local invariant violations (blank arguments, duplicate in-flight requests,
//! decoding before labels are known) are raised synchronously at the call
//! site. Protocol errors returned by the service never show up here; they are
//! published as `SessionEvent::InformError` instead.

use crate::protocol::RequestKind;
use crate::streams::StreamName;

/// Everything that can go wrong inside the relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A reply or error frame referenced an id the registry never issued.
    #[error("unknown request id {0}")]
    UnknownRequestId(u64),

    /// A request of this kind is still waiting for its reply.
    #[error("a {0} request is already in flight")]
    DuplicateInFlight(RequestKind),

    /// A data frame arrived for a stream whose subscription was never acknowledged.
    #[error("labels for stream '{0}' are not known yet")]
    LabelsNotYetKnown(StreamName),

    /// The service named a stream outside the supported set.
    #[error("unknown stream '{0}'")]
    UnknownStream(String),

    /// An inbound frame did not match any known message shape.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A reply was recognized but its payload was missing a required field.
    #[error("malformed {kind} reply: {detail}")]
    MalformedReply { kind: RequestKind, detail: String },

    /// A required argument was blank or otherwise unusable.
    #[error("invalid argument '{field}': {detail}")]
    InvalidArgument { field: &'static str, detail: String },

    /// The operation needs a session id and none is held.
    #[error("no active session")]
    NoActiveSession,

    /// The operation needs an auth token and authorization has not completed.
    #[error("not authorized yet")]
    NotAuthorized,

    /// The session hit an unrecoverable condition and accepts no more requests.
    #[error("session errored: {0}")]
    Errored(String),

    /// The channel (or the actor owning it) has gone away.
    #[error("channel closed")]
    ChannelClosed,

    /// The underlying socket reported an error.
    #[error("transport error: {0}")]
    Transport(String),

    /// A blocking wait elapsed without a reply.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration could not be read or parsed.
    #[error("config: {0}")]
    Config(String),
}

impl RelayError {
    /// Shorthand for a blank required argument.
    pub fn blank(field: &'static str) -> Self {
        RelayError::InvalidArgument {
            field,
            detail: "must not be empty".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
