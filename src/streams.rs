//! # Stream demultiplexer
//!
//! ## Responsibility
//! Turns push frames (`{"sid": .., "<stream>": [...], "time": ..}`) into typed
//! [`StreamSample`]s, zipping positional values with the column labels learned
//! when the subscription was acknowledged.
//!
//! ## Guarantees
//! - Exhaustive: every supported stream has exactly one decoding rule
//! - Strict: decoding a labeled stream before its labels are known fails with
//!   [`RelayError::LabelsNotYetKnown`]; it is never silently dropped
//!
//! ## Irregular cases
//! - `eeg`: the trailing marker column is dropped from both labels and values
//! - `dev`: labels live in the third column entry, values in the third element

use std::collections::HashMap;
use std::str::FromStr;

use serde_json::{json, Map, Value};

use crate::error::{RelayError, Result};

// ---------------------------------------------------------------------------
// Stream names
// ---------------------------------------------------------------------------

/// The fixed set of streams the service can push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamName {
    /// Raw EEG signal (`eeg`).
    RawSignal,
    /// Motion sensors (`mot`).
    Motion,
    /// Contact quality, signal strength and battery (`dev`).
    DeviceQuality,
    /// Performance metrics (`met`).
    PerformanceMetric,
    /// Band power (`pow`).
    BandPower,
    /// Mental command detections (`com`).
    Command,
    /// Facial expression detections (`fac`).
    FacialExpression,
    /// System events (`sys`).
    System,
}

impl StreamName {
    pub const ALL: [StreamName; 8] = [
        StreamName::Command,
        StreamName::FacialExpression,
        StreamName::RawSignal,
        StreamName::Motion,
        StreamName::DeviceQuality,
        StreamName::PerformanceMetric,
        StreamName::BandPower,
        StreamName::System,
    ];

    /// Field name used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            StreamName::RawSignal => "eeg",
            StreamName::Motion => "mot",
            StreamName::DeviceQuality => "dev",
            StreamName::PerformanceMetric => "met",
            StreamName::BandPower => "pow",
            StreamName::Command => "com",
            StreamName::FacialExpression => "fac",
            StreamName::System => "sys",
        }
    }

    /// Streams whose values are zipped with subscription-time labels.
    pub fn is_labeled(self) -> bool {
        matches!(
            self,
            StreamName::RawSignal
                | StreamName::Motion
                | StreamName::DeviceQuality
                | StreamName::PerformanceMetric
                | StreamName::BandPower
        )
    }
}

impl std::fmt::Display for StreamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamName {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        StreamName::ALL
            .into_iter()
            .find(|n| n.as_str() == s)
            .ok_or_else(|| RelayError::UnknownStream(s.to_string()))
    }
}

/// Parse a comma-separated stream list such as `eeg,mot,met`.
pub fn parse_stream_list(list: &str) -> Result<Vec<StreamName>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(StreamName::from_str)
        .collect()
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// Derive the label sequence for `stream` from the `cols` entry of a
/// subscription acknowledgement.
pub fn extract_labels(stream: StreamName, cols: &Value) -> Result<Vec<String>> {
    let cols = cols
        .as_array()
        .ok_or_else(|| RelayError::MalformedFrame(format!("{stream} cols is not an array")))?;

    let source: &[Value] = match stream {
        StreamName::RawSignal => &cols[..cols.len().saturating_sub(1)],
        StreamName::DeviceQuality => cols
            .get(2)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                RelayError::MalformedFrame("dev cols has no nested channel list".into())
            })?,
        _ => cols,
    };

    Ok(source.iter().map(label_text).collect())
}

fn label_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Labels learned per stream. Written only by subscription acknowledgements.
#[derive(Debug, Clone, Default)]
pub struct StreamLabels {
    labels: HashMap<StreamName, Vec<String>>,
}

impl StreamLabels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stream: StreamName, labels: Vec<String>) {
        self.labels.insert(stream, labels);
    }

    pub fn get(&self, stream: StreamName) -> Option<&[String]> {
        self.labels.get(&stream).map(Vec::as_slice)
    }

    pub fn require(&self, stream: StreamName) -> Result<&[String]> {
        self.get(stream).ok_or(RelayError::LabelsNotYetKnown(stream))
    }

    pub fn contains(&self, stream: StreamName) -> bool {
        self.labels.contains_key(&stream)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Samples
// ---------------------------------------------------------------------------

/// Positional values plus their label → value mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSample {
    pub stream: StreamName,
    pub values: Vec<Value>,
    pub labeled: Map<String, Value>,
    pub time: f64,
}

/// One decoded push frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSample {
    Command {
        action: String,
        power: f64,
        time: f64,
    },
    FacialExpression {
        eye_action: String,
        upper_action: String,
        upper_power: f64,
        lower_action: String,
        lower_power: f64,
        time: f64,
    },
    /// `eeg`, `mot`, `met` and `pow`.
    Labeled(LabeledSample),
    DeviceQuality {
        signal: f64,
        battery_percent: f64,
        /// Per-channel contact quality.
        quality: LabeledSample,
    },
    /// Passed through unchanged.
    System(Value),
}

impl StreamSample {
    pub fn stream(&self) -> StreamName {
        match self {
            StreamSample::Command { .. } => StreamName::Command,
            StreamSample::FacialExpression { .. } => StreamName::FacialExpression,
            StreamSample::Labeled(s) => s.stream,
            StreamSample::DeviceQuality { .. } => StreamName::DeviceQuality,
            StreamSample::System(_) => StreamName::System,
        }
    }

    /// Flatten into the JSON record forwarded to the query bridge:
    /// `{"<stream>": {label: value, ..}, "time": t}` for labeled streams.
    pub fn to_record(&self) -> Value {
        match self {
            StreamSample::Command { action, power, time } => {
                json!({"action": action, "power": power, "time": time})
            }
            StreamSample::FacialExpression {
                eye_action,
                upper_action,
                upper_power,
                lower_action,
                lower_power,
                time,
            } => json!({
                "eyeAct": eye_action,
                "uAct": upper_action,
                "uPow": upper_power,
                "lAct": lower_action,
                "lPow": lower_power,
                "time": time,
            }),
            StreamSample::Labeled(s) => {
                let mut rec = Map::new();
                rec.insert(s.stream.as_str().into(), Value::Object(s.labeled.clone()));
                rec.insert("time".into(), json!(s.time));
                Value::Object(rec)
            }
            StreamSample::DeviceQuality {
                signal,
                battery_percent,
                quality,
            } => json!({
                "signal": signal,
                "dev": quality.labeled,
                "batteryPercent": battery_percent,
                "time": quality.time,
            }),
            StreamSample::System(v) => v.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode a push frame using the labels learned so far.
pub fn decode(frame: &Map<String, Value>, labels: &StreamLabels) -> Result<StreamSample> {
    let stream = StreamName::ALL
        .into_iter()
        .find(|s| frame.get(s.as_str()).is_some_and(|v| !v.is_null()))
        .ok_or_else(|| RelayError::MalformedFrame("push frame names no known stream".into()))?;

    // `sys` frames are passed through without looking at any other field.
    match stream {
        StreamName::System => Ok(StreamSample::System(frame[stream.as_str()].clone())),
        StreamName::Command => {
            let (data, time) = payload(frame, stream)?;
            Ok(StreamSample::Command {
                action: text_at(data, 0, stream)?,
                power: number_at(data, 1, stream)?,
                time,
            })
        }
        StreamName::FacialExpression => {
            let (data, time) = payload(frame, stream)?;
            Ok(StreamSample::FacialExpression {
                eye_action: text_at(data, 0, stream)?,
                upper_action: text_at(data, 1, stream)?,
                upper_power: number_at(data, 2, stream)?,
                lower_action: text_at(data, 3, stream)?,
                lower_power: number_at(data, 4, stream)?,
                time,
            })
        }
        StreamName::RawSignal => {
            let (data, time) = payload(frame, stream)?;
            let keep = data.len().saturating_sub(1);
            let values = data[..keep].to_vec();
            Ok(StreamSample::Labeled(zip_labels(stream, values, time, labels)?))
        }
        StreamName::Motion | StreamName::PerformanceMetric | StreamName::BandPower => {
            let (data, time) = payload(frame, stream)?;
            Ok(StreamSample::Labeled(zip_labels(stream, data.clone(), time, labels)?))
        }
        StreamName::DeviceQuality => {
            let (data, time) = payload(frame, stream)?;
            let signal = number_at(data, 1, stream)?;
            let per_channel = data
                .get(2)
                .and_then(Value::as_array)
                .cloned()
                .ok_or_else(|| {
                    RelayError::MalformedFrame("dev frame has no per-channel quality".into())
                })?;
            let battery_percent = number_at(data, 3, stream)?;
            Ok(StreamSample::DeviceQuality {
                signal,
                battery_percent,
                quality: zip_labels(stream, per_channel, time, labels)?,
            })
        }
    }
}

/// The stream's array payload and the frame timestamp.
fn payload(frame: &Map<String, Value>, stream: StreamName) -> Result<(&Vec<Value>, f64)> {
    let data = array_field(frame, stream)?;
    let time = frame
        .get("time")
        .and_then(Value::as_f64)
        .ok_or_else(|| RelayError::MalformedFrame(format!("{stream} frame has no time")))?;
    Ok((data, time))
}

fn zip_labels(
    stream: StreamName,
    values: Vec<Value>,
    time: f64,
    labels: &StreamLabels,
) -> Result<LabeledSample> {
    let names = labels.require(stream)?;
    if names.len() != values.len() {
        tracing::debug!(
            stream = %stream,
            labels = names.len(),
            values = values.len(),
            "label/value count mismatch, zipping the common prefix"
        );
    }
    let labeled = names
        .iter()
        .cloned()
        .zip(values.iter().cloned())
        .collect::<Map<String, Value>>();
    Ok(LabeledSample {
        stream,
        values,
        labeled,
        time,
    })
}

fn array_field(frame: &Map<String, Value>, stream: StreamName) -> Result<&Vec<Value>> {
    frame
        .get(stream.as_str())
        .and_then(Value::as_array)
        .ok_or_else(|| RelayError::MalformedFrame(format!("{stream} payload is not an array")))
}

fn text_at(data: &[Value], idx: usize, stream: StreamName) -> Result<String> {
    data.get(idx)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RelayError::MalformedFrame(format!("{stream}[{idx}] is not a string")))
}

fn number_at(data: &[Value], idx: usize, stream: StreamName) -> Result<f64> {
    data.get(idx)
        .and_then(Value::as_f64)
        .ok_or_else(|| RelayError::MalformedFrame(format!("{stream}[{idx}] is not a number")))
}
