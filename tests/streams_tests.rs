//! Stream label extraction and push-frame decoding through the public API.

use rstest::rstest;
use tokio_test::{assert_err, assert_ok};
use serde_json::{json, Map, Value};

use cortex_relay::error::RelayError;
use cortex_relay::events::{EventKind, SessionEvent};
use cortex_relay::streams::{decode, extract_labels, parse_stream_list, StreamLabels, StreamName, StreamSample};

fn frame(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(m) => m,
        other => panic!("not an object: {other}"),
    }
}

fn learned(stream: StreamName, cols: Value) -> StreamLabels {
    let mut labels = StreamLabels::new();
    labels.insert(stream, extract_labels(stream, &cols).unwrap());
    labels
}

#[rstest]
#[case(StreamName::Motion, json!(["COUNTER_MEMS", "Q0", "Q1", "Q2"]))]
#[case(StreamName::PerformanceMetric, json!(["eng.isActive", "eng", "exc"]))]
#[case(StreamName::BandPower, json!(["AF3/theta", "AF3/alpha"]))]
fn test_labeled_stream_maps_every_label_to_its_position(#[case] stream: StreamName, #[case] cols: Value) {
    let labels = learned(stream, cols.clone());
    let names: Vec<String> = cols
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c.as_str().unwrap().to_string())
        .collect();
    let values: Vec<Value> = (0..names.len()).map(|i| json!(i as f64 * 1.5)).collect();

    let mut raw = Map::new();
    raw.insert("sid".into(), json!("sess-1"));
    raw.insert(stream.as_str().into(), Value::Array(values.clone()));
    raw.insert("time".into(), json!(12.0));

    match decode(&raw, &labels).unwrap() {
        StreamSample::Labeled(s) => {
            assert_eq!(s.stream, stream);
            assert_eq!(s.labeled.len(), names.len());
            for (i, name) in names.iter().enumerate() {
                assert_eq!(s.labeled[name.as_str()], values[i], "label {name}");
            }
        }
        other => panic!("expected labeled sample, got {other:?}"),
    }
}

#[test]
fn test_raw_signal_drops_marker_on_both_sides() {
    let labels = learned(StreamName::RawSignal, json!(["COUNTER", "INTERPOLATED", "AF3", "MARKERS"]));
    assert_eq!(
        labels.get(StreamName::RawSignal).unwrap(),
        &["COUNTER".to_string(), "INTERPOLATED".into(), "AF3".into()]
    );

    let f = frame(json!({"sid": "s", "eeg": [1, 0, 4100.25, [{"marker": 1}]], "time": 3.5}));
    match decode(&f, &labels).unwrap() {
        StreamSample::Labeled(s) => {
            assert_eq!(s.values, vec![json!(1), json!(0), json!(4100.25)]);
            assert!(!s.labeled.contains_key("MARKERS"));
        }
        other => panic!("expected eeg sample, got {other:?}"),
    }
}

#[test]
fn test_device_quality_labels_and_record() {
    let cols = json!(["Battery", "Signal", ["AF3", "T7", "OVERALL"], "BatteryPercent"]);
    let labels = learned(StreamName::DeviceQuality, cols);
    let f = frame(json!({"sid": "s", "dev": [4, 0.75, [4, 2, 88], 91], "time": 7.0}));
    let sample = assert_ok!(decode(&f, &labels));
    assert_eq!(sample.stream(), StreamName::DeviceQuality);
    assert_eq!(
        sample.to_record(),
        json!({
            "signal": 0.75,
            "dev": {"AF3": 4, "T7": 2, "OVERALL": 88},
            "batteryPercent": 91.0,
            "time": 7.0,
        })
    );
}

#[test]
fn test_command_record_shape() {
    let f = frame(json!({"sid": "s", "com": ["lift", 0.8], "time": 1.0}));
    let sample = decode(&f, &StreamLabels::new()).unwrap();
    assert_eq!(sample.to_record(), json!({"action": "lift", "power": 0.8, "time": 1.0}));
}

#[test]
fn test_decoding_needs_labels_for_labeled_streams_only() {
    let empty = StreamLabels::new();
    for (name, payload) in [("mot", json!([1, 2])), ("met", json!([1])), ("pow", json!([1.0]))] {
        let f = frame(json!({"sid": "s", name: payload, "time": 0.0}));
        assert!(
            matches!(decode(&f, &empty), Err(RelayError::LabelsNotYetKnown(_))),
            "{name}"
        );
    }
    let f = frame(json!({"sid": "s", "sys": ["headset", "ready"]}));
    assert_ok!(decode(&f, &empty));
}

#[test]
fn test_malformed_command_payload() {
    let f = frame(json!({"sid": "s", "com": [1, "push"], "time": 1.0}));
    let err = assert_err!(decode(&f, &StreamLabels::new()));
    assert!(matches!(err, RelayError::MalformedFrame(_)));
}

#[test]
fn test_stream_data_events_are_keyed_per_stream() {
    let f = frame(json!({"sid": "s", "com": ["neutral", 0.0], "time": 1.0}));
    let ev = SessionEvent::StreamData(decode(&f, &StreamLabels::new()).unwrap());
    assert_eq!(ev.kind(), EventKind::StreamData(StreamName::Command));
}

#[rstest]
#[case("eeg", StreamName::RawSignal)]
#[case("mot", StreamName::Motion)]
#[case("dev", StreamName::DeviceQuality)]
#[case("met", StreamName::PerformanceMetric)]
#[case("pow", StreamName::BandPower)]
#[case("com", StreamName::Command)]
#[case("fac", StreamName::FacialExpression)]
#[case("sys", StreamName::System)]
fn test_wire_names(#[case] wire: &str, #[case] stream: StreamName) {
    assert_eq!(wire.parse::<StreamName>().unwrap(), stream);
    assert_eq!(stream.to_string(), wire);
}

#[test]
fn test_stream_list_rejects_unknown_names() {
    assert!(matches!(
        parse_stream_list("eeg,brainwaves"),
        Err(RelayError::UnknownStream(name)) if name == "brainwaves"
    ));
}
