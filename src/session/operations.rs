//! Requests a caller can issue on an established session.
//!
//! Each operation maps to exactly one [`RequestKind`], validates its own
//! arguments before anything touches the wire, and builds its `params` from
//! the current [`Session`].

use serde_json::{json, Map, Value};

use crate::error::{RelayError, Result};
use crate::protocol::RequestKind;
use crate::streams::StreamName;

use super::state::Session;

/// `status` argument of `setupProfile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileAction {
    Create,
    Load,
    Unload,
    Save,
}

impl ProfileAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ProfileAction::Create => "create",
            ProfileAction::Load => "load",
            ProfileAction::Unload => "unload",
            ProfileAction::Save => "save",
        }
    }
}

/// A caller-issued request.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    QueryHeadsets,
    /// Not re-entrant: a no-op with a warning while a session id is held.
    CreateSession,
    CloseSession,
    DisconnectDevice,
    Subscribe(Vec<StreamName>),
    Unsubscribe(Vec<StreamName>),
    QueryProfile,
    GetCurrentProfile,
    SetupProfile {
        profile: String,
        action: ProfileAction,
    },
    Training {
        detection: String,
        action: String,
        status: String,
    },
    CreateRecord {
        title: String,
        extra: Map<String, Value>,
    },
    StopRecord,
    ExportRecord {
        folder: String,
        stream_types: Vec<String>,
        format: String,
        record_ids: Vec<String>,
        /// Only sent for `CSV`.
        version: Option<String>,
        extra: Map<String, Value>,
    },
    InjectMarker {
        time: f64,
        value: Value,
        label: String,
        extra: Map<String, Value>,
    },
    UpdateMarker {
        marker_id: String,
        time: f64,
        extra: Map<String, Value>,
    },
    GetMentalCommandActiveAction {
        profile: String,
    },
    SetMentalCommandActiveAction {
        actions: Vec<String>,
    },
    GetMentalCommandBrainMap {
        profile: String,
    },
    GetMentalCommandTrainingThreshold,
    GetMentalCommandActionSensitivity {
        profile: String,
    },
    SetMentalCommandActionSensitivity {
        profile: String,
        values: Vec<i64>,
    },
    GetCortexInfo,
}

impl Operation {
    pub fn kind(&self) -> RequestKind {
        match self {
            Operation::QueryHeadsets => RequestKind::QueryHeadsets,
            Operation::CreateSession => RequestKind::CreateSession,
            Operation::CloseSession => RequestKind::CloseSession,
            Operation::DisconnectDevice => RequestKind::DisconnectDevice,
            Operation::Subscribe(_) => RequestKind::Subscribe,
            Operation::Unsubscribe(_) => RequestKind::Unsubscribe,
            Operation::QueryProfile => RequestKind::QueryProfile,
            Operation::GetCurrentProfile => RequestKind::GetCurrentProfile,
            Operation::SetupProfile { .. } => RequestKind::SetupProfile,
            Operation::Training { .. } => RequestKind::Training,
            Operation::CreateRecord { .. } => RequestKind::CreateRecord,
            Operation::StopRecord => RequestKind::StopRecord,
            Operation::ExportRecord { .. } => RequestKind::ExportRecord,
            Operation::InjectMarker { .. } => RequestKind::InjectMarker,
            Operation::UpdateMarker { .. } => RequestKind::UpdateMarker,
            Operation::GetMentalCommandActiveAction { .. } => RequestKind::MentalCommandActiveAction,
            Operation::SetMentalCommandActiveAction { .. } => {
                RequestKind::SetMentalCommandActiveAction
            }
            Operation::GetMentalCommandBrainMap { .. } => RequestKind::MentalCommandBrainMap,
            Operation::GetMentalCommandTrainingThreshold => {
                RequestKind::MentalCommandTrainingThreshold
            }
            Operation::GetMentalCommandActionSensitivity { .. }
            | Operation::SetMentalCommandActionSensitivity { .. } => {
                RequestKind::MentalCommandActionSensitivity
            }
            Operation::GetCortexInfo => RequestKind::GetCortexInfo,
        }
    }

    /// Check arguments that do not depend on session state.
    pub fn validate(&self) -> Result<()> {
        match self {
            Operation::Subscribe(streams) | Operation::Unsubscribe(streams) if streams.is_empty() => {
                Err(RelayError::blank("streams"))
            }
            Operation::SetupProfile { profile, .. }
            | Operation::GetMentalCommandActiveAction { profile }
            | Operation::GetMentalCommandBrainMap { profile }
            | Operation::GetMentalCommandActionSensitivity { profile }
            | Operation::SetMentalCommandActionSensitivity { profile, .. }
                if profile.trim().is_empty() =>
            {
                Err(RelayError::blank("profile"))
            }
            Operation::CreateRecord { title, .. } if title.trim().is_empty() => {
                Err(RelayError::blank("title"))
            }
            Operation::ExportRecord { folder, .. } if folder.trim().is_empty() => {
                Err(RelayError::blank("folder"))
            }
            Operation::ExportRecord { record_ids, .. } if record_ids.is_empty() => {
                Err(RelayError::blank("record_ids"))
            }
            Operation::InjectMarker { label, .. } if label.trim().is_empty() => {
                Err(RelayError::blank("label"))
            }
            Operation::UpdateMarker { marker_id, .. } if marker_id.trim().is_empty() => {
                Err(RelayError::blank("marker_id"))
            }
            _ => Ok(()),
        }
    }

    /// Build the `params` object for this request.
    pub fn params(&self, s: &Session) -> Result<Value> {
        let params = match self {
            Operation::QueryHeadsets | Operation::GetCortexInfo => json!({}),
            Operation::CreateSession => json!({
                "cortexToken": s.token()?,
                "headset": s.headset()?,
                "status": "active",
            }),
            Operation::CloseSession => json!({
                "cortexToken": s.token()?,
                "session": s.active_session()?,
                "status": "close",
            }),
            Operation::DisconnectDevice => json!({
                "command": "disconnect",
                "headset": s.headset()?,
            }),
            Operation::Subscribe(streams) | Operation::Unsubscribe(streams) => json!({
                "cortexToken": s.token()?,
                "session": s.active_session()?,
                "streams": streams.iter().map(|n| n.as_str()).collect::<Vec<_>>(),
            }),
            Operation::QueryProfile => json!({ "cortexToken": s.token()? }),
            Operation::GetCurrentProfile => json!({
                "cortexToken": s.token()?,
                "headset": s.headset()?,
            }),
            Operation::SetupProfile { profile, action } => json!({
                "cortexToken": s.token()?,
                "headset": s.headset()?,
                "profile": profile,
                "status": action.as_str(),
            }),
            Operation::Training {
                detection,
                action,
                status,
            } => json!({
                "cortexToken": s.token()?,
                "detection": detection,
                "session": s.active_session()?,
                "action": action,
                "status": status,
            }),
            Operation::CreateRecord { title, extra } => with_extra(
                json!({
                    "cortexToken": s.token()?,
                    "session": s.active_session()?,
                    "title": title,
                }),
                extra,
            ),
            Operation::StopRecord => json!({
                "cortexToken": s.token()?,
                "session": s.active_session()?,
            }),
            Operation::ExportRecord {
                folder,
                stream_types,
                format,
                record_ids,
                version,
                extra,
            } => {
                let mut params = json!({
                    "cortexToken": s.token()?,
                    "folder": folder,
                    "format": format,
                    "streamTypes": stream_types,
                    "recordIds": record_ids,
                });
                if format == "CSV" {
                    if let Some(version) = version {
                        params["version"] = json!(version);
                    }
                }
                with_extra(params, extra)
            }
            Operation::InjectMarker {
                time,
                value,
                label,
                extra,
            } => with_extra(
                json!({
                    "cortexToken": s.token()?,
                    "session": s.active_session()?,
                    "time": time,
                    "value": value,
                    "label": label,
                }),
                extra,
            ),
            Operation::UpdateMarker {
                marker_id,
                time,
                extra,
            } => with_extra(
                json!({
                    "cortexToken": s.token()?,
                    "session": s.active_session()?,
                    "markerId": marker_id,
                    "time": time,
                }),
                extra,
            ),
            Operation::GetMentalCommandActiveAction { profile } => json!({
                "cortexToken": s.token()?,
                "profile": profile,
                "status": "get",
            }),
            Operation::SetMentalCommandActiveAction { actions } => json!({
                "cortexToken": s.token()?,
                "session": s.active_session()?,
                "status": "set",
                "actions": actions,
            }),
            Operation::GetMentalCommandBrainMap { profile } => json!({
                "cortexToken": s.token()?,
                "profile": profile,
                "session": s.active_session()?,
            }),
            Operation::GetMentalCommandTrainingThreshold => json!({
                "cortexToken": s.token()?,
                "session": s.active_session()?,
            }),
            Operation::GetMentalCommandActionSensitivity { profile } => json!({
                "cortexToken": s.token()?,
                "profile": profile,
                "status": "get",
            }),
            Operation::SetMentalCommandActionSensitivity { profile, values } => json!({
                "cortexToken": s.token()?,
                "profile": profile,
                "session": s.active_session()?,
                "status": "set",
                "values": values,
            }),
        };
        Ok(params)
    }
}

/// Merge caller-supplied optional fields; fixed fields win on conflict.
fn with_extra(mut params: Value, extra: &Map<String, Value>) -> Value {
    if let Value::Object(obj) = &mut params {
        for (k, v) in extra {
            obj.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
    params
}
