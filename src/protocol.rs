//! Wire format for the Cortex JSON-RPC dialect.
//!
//! ## Frames
//! - Request: `{"jsonrpc":"2.0","id":N,"method":"...","params":{...}}`
//! - Reply: `{"id":N,"result":...}` or `{"id":N,"error":{"code":C,"message":"..."}}`
//! - Push: `{"sid":"...","<stream>":[...],"time":T}`
//! - Warning: `{"warning":{"code":C,"message":...}}`
//!
//! Inbound frames are classified once, here, into the closed [`Inbound`]
//! union. Everything downstream matches exhaustively on it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RelayError, Result};

/// JSON-RPC version tag carried on every request.
pub const JSONRPC_VERSION: &str = "2.0";

/// Error code the service returns when a profile belongs to another user.
pub const ERR_PROFILE_ACCESS_DENIED: i64 = -32046;

/// Warning codes pushed by the service.
pub mod warning {
    pub const CORTEX_STOP_ALL_STREAMS: i64 = 0;
    pub const CORTEX_CLOSE_SESSION: i64 = 1;
    pub const USER_LOGIN: i64 = 2;
    pub const USER_LOGOUT: i64 = 3;
    pub const ACCESS_RIGHT_GRANTED: i64 = 9;
    pub const ACCESS_RIGHT_REJECTED: i64 = 10;
    pub const PROFILE_LOADED: i64 = 13;
    pub const PROFILE_UNLOADED: i64 = 14;
    pub const CORTEX_AUTO_UNLOAD_PROFILE: i64 = 15;
    pub const EULA_ACCEPTED: i64 = 17;
    pub const DISKSPACE_LOW: i64 = 19;
    pub const DISKSPACE_CRITICAL: i64 = 20;
    pub const HEADSET_CANNOT_CONNECT_TIMEOUT: i64 = 102;
    pub const HEADSET_DISCONNECTED_TIMEOUT: i64 = 103;
    pub const HEADSET_CONNECTED: i64 = 104;
    pub const HEADSET_CANNOT_WORK_WITH_BTLE: i64 = 112;
    pub const HEADSET_CANNOT_CONNECT_DISABLE_MOTION: i64 = 113;
}

// ---------------------------------------------------------------------------
// Request kinds
// ---------------------------------------------------------------------------

/// Every request the client knows how to issue.
///
/// The kind travels beside the correlation id in the registry so a reply is
/// routed by meaning, never by a magic number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequestKind {
    HasAccessRight,
    RequestAccess,
    Authorize,
    QueryHeadsets,
    ConnectDevice,
    DisconnectDevice,
    CreateSession,
    CloseSession,
    Subscribe,
    Unsubscribe,
    QueryProfile,
    GetCurrentProfile,
    SetupProfile,
    Training,
    CreateRecord,
    StopRecord,
    ExportRecord,
    InjectMarker,
    UpdateMarker,
    MentalCommandActiveAction,
    SetMentalCommandActiveAction,
    MentalCommandBrainMap,
    MentalCommandTrainingThreshold,
    MentalCommandActionSensitivity,
    GetCortexInfo,
}

impl RequestKind {
    /// The JSON-RPC method name sent on the wire.
    pub fn method(self) -> &'static str {
        match self {
            RequestKind::HasAccessRight => "hasAccessRight",
            RequestKind::RequestAccess => "requestAccess",
            RequestKind::Authorize => "authorize",
            RequestKind::QueryHeadsets => "queryHeadsets",
            RequestKind::ConnectDevice | RequestKind::DisconnectDevice => "controlDevice",
            RequestKind::CreateSession => "createSession",
            RequestKind::CloseSession => "updateSession",
            RequestKind::Subscribe => "subscribe",
            RequestKind::Unsubscribe => "unsubscribe",
            RequestKind::QueryProfile => "queryProfile",
            RequestKind::GetCurrentProfile => "getCurrentProfile",
            RequestKind::SetupProfile => "setupProfile",
            RequestKind::Training => "training",
            RequestKind::CreateRecord => "createRecord",
            RequestKind::StopRecord => "stopRecord",
            RequestKind::ExportRecord => "exportRecord",
            RequestKind::InjectMarker => "injectMarker",
            RequestKind::UpdateMarker => "updateMarker",
            RequestKind::MentalCommandActiveAction
            | RequestKind::SetMentalCommandActiveAction => "mentalCommandActiveAction",
            RequestKind::MentalCommandBrainMap => "mentalCommandBrainMap",
            RequestKind::MentalCommandTrainingThreshold => "mentalCommandTrainingThreshold",
            RequestKind::MentalCommandActionSensitivity => "mentalCommandActionSensitivity",
            RequestKind::GetCortexInfo => "getCortexInfo",
        }
    }

    /// Whether this kind is one of the handshake steps.
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            RequestKind::HasAccessRight
                | RequestKind::RequestAccess
                | RequestKind::Authorize
                | RequestKind::QueryHeadsets
                | RequestKind::ConnectDevice
                | RequestKind::CreateSession
        )
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // Two kinds share `controlDevice` / `mentalCommandActiveAction`;
            // keep them apart in logs.
            RequestKind::ConnectDevice => write!(f, "controlDevice(connect)"),
            RequestKind::DisconnectDevice => write!(f, "controlDevice(disconnect)"),
            RequestKind::SetMentalCommandActiveAction => write!(f, "mentalCommandActiveAction(set)"),
            other => write!(f, "{}", other.method()),
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct RequestFrame<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

/// Serialize one request frame.
pub fn encode_request(id: u64, kind: RequestKind, params: &Value) -> Result<String> {
    let frame = RequestFrame {
        jsonrpc: JSONRPC_VERSION,
        id,
        method: kind.method(),
        params,
    };
    Ok(serde_json::to_string(&frame)?)
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Error object carried by a failed reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl RpcError {
    /// Keep whatever the service sent when the body is not a well-formed
    /// error object, so the request id can still be released.
    fn from_body(body: Value) -> Self {
        match serde_json::from_value(body.clone()) {
            Ok(error) => error,
            Err(_) => Self {
                code: body.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: body.to_string(),
            },
        }
    }
}

/// Advisory pushed by the service outside any request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub code: i64,
    #[serde(default)]
    pub message: Value,
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Stream data, keyed by subscription id rather than request id.
    Push(Map<String, Value>),
    Reply { id: u64, result: Value },
    Error { id: u64, error: RpcError },
    Warning(Warning),
}

/// Classify a text frame by which correlator it carries.
///
/// Precedence: `sid`, then `result`, then `error`, then `warning`.
pub fn classify(text: &str) -> Result<Inbound> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(mut obj) = value else {
        return Err(RelayError::MalformedFrame("frame is not a JSON object".into()));
    };

    if obj.contains_key("sid") {
        return Ok(Inbound::Push(obj));
    }
    if let Some(result) = obj.remove("result") {
        let id = frame_id(&obj)?;
        return Ok(Inbound::Reply { id, result });
    }
    if let Some(error) = obj.remove("error") {
        let id = frame_id(&obj)?;
        return Ok(Inbound::Error {
            id,
            error: RpcError::from_body(error),
        });
    }
    if let Some(warning) = obj.remove("warning") {
        return Ok(Inbound::Warning(serde_json::from_value(warning)?));
    }

    Err(RelayError::MalformedFrame(format!(
        "no sid/result/error/warning key in {}",
        Value::Object(obj)
    )))
}

fn frame_id(obj: &Map<String, Value>) -> Result<u64> {
    obj.get("id")
        .and_then(Value::as_u64)
        .ok_or_else(|| RelayError::MalformedFrame("reply without a numeric id".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_request_carries_version_id_method_params() {
        let text = encode_request(7, RequestKind::QueryHeadsets, &json!({})).unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["jsonrpc"], "2.0");
        assert_eq!(v["id"], 7);
        assert_eq!(v["method"], "queryHeadsets");
        assert_eq!(v["params"], json!({}));
    }

    #[test]
    fn classify_push_wins_over_everything() {
        let frame = r#"{"sid":"s","eeg":[1,2],"time":1.0,"result":1}"#;
        assert!(matches!(classify(frame).unwrap(), Inbound::Push(_)));
    }

    #[test]
    fn classify_reply() {
        let got = classify(r#"{"id":3,"jsonrpc":"2.0","result":{"ok":true}}"#).unwrap();
        assert_eq!(got, Inbound::Reply { id: 3, result: json!({"ok": true}) });
    }

    #[test]
    fn classify_error() {
        let got = classify(r#"{"id":4,"error":{"code":-32046,"message":"denied"}}"#).unwrap();
        match got {
            Inbound::Error { id, error } => {
                assert_eq!(id, 4);
                assert_eq!(error.code, ERR_PROFILE_ACCESS_DENIED);
                assert_eq!(error.message, "denied");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn classify_warning_with_object_message() {
        let got = classify(r#"{"warning":{"code":0,"message":{"sessionId":"x"}}}"#).unwrap();
        match got {
            Inbound::Warning(w) => {
                assert_eq!(w.code, warning::CORTEX_STOP_ALL_STREAMS);
                assert_eq!(w.message["sessionId"], "x");
            }
            other => panic!("expected warning, got {other:?}"),
        }
    }

    #[test]
    fn classify_rejects_unknown_shape() {
        assert!(matches!(classify(r#"{"hello":1}"#), Err(RelayError::MalformedFrame(_))));
        assert!(matches!(classify("[1,2]"), Err(RelayError::MalformedFrame(_))));
        assert!(matches!(classify("nope"), Err(RelayError::Json(_))));
    }

    #[test]
    fn malformed_error_body_still_carries_the_id() {
        let got = classify(r#"{"id":5,"error":{"code":-32000}}"#).unwrap();
        assert_eq!(
            got,
            Inbound::Error {
                id: 5,
                error: RpcError { code: -32000, message: String::new() },
            }
        );
        match classify(r#"{"id":6,"error":"boom"}"#).unwrap() {
            Inbound::Error { id, error } => {
                assert_eq!(id, 6);
                assert_eq!(error.code, 0);
                assert_eq!(error.message, "\"boom\"");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn reply_without_id_is_malformed() {
        assert!(matches!(classify(r#"{"result":1}"#), Err(RelayError::MalformedFrame(_))));
    }

    #[test]
    fn shared_methods_display_distinctly() {
        assert_eq!(RequestKind::ConnectDevice.method(), RequestKind::DisconnectDevice.method());
        assert_ne!(
            RequestKind::ConnectDevice.to_string(),
            RequestKind::DisconnectDevice.to_string()
        );
    }
}
