//! End-to-end bmson decoding (requires the default `bmson` feature).
#![cfg(feature = "bmson")]

use std::path::Path;

use omnichart::prelude::*;

#[test]
fn bmson_decodes_with_stops_and_scroll_extension() {
    let source = r#"{
        "version": "1.0.0",
        "info": {
            "title": "Json",
            "artist": "Writer",
            "init_bpm": 120,
            "resolution": 240,
            "mode_hint": "beat-7k"
        },
        "bpm_events": [{"y": 960, "bpm": 240}],
        "stop_events": [{"y": 480, "duration": 240}],
        "scroll_events": [{"y": 960, "rate": 1.5}],
        "sound_channels": [
            {"name": "piano.wav", "notes": [
                {"x": 1, "y": 240, "l": 0},
                {"x": 8, "y": 960, "l": 240},
                {"y": 0, "l": 0}
            ]}
        ]
    }"#;
    let DecodeOutput { chart, warnings } =
        decode_chart(Path::new("chart.bmson"), source.as_bytes()).unwrap();
    assert!(warnings.is_empty());
    assert_eq!(chart.meta.format, Some(FormatKind::Bmson));
    assert_eq!(chart.key_count, 8);
    // The BGM note contributes no lane data.
    assert_eq!(chart.notes.len(), 2);
    // Pulse 240 = beat 1 = 500ms, before the stop.
    assert_eq!(chart.notes[0].start_ms, 500);
    // Pulse 960 = beat 4: 2000ms of tempo plus the 500ms stop at beat 2.
    let hold = &chart.notes[1];
    assert_eq!(hold.start_ms, 2500);
    // The hold spans one beat at the new 240 BPM tempo.
    assert_eq!(hold.end_ms, Some(2750));
    assert_eq!(hold.lane, 7);
    assert!((chart.timing.scroll_factor_at(2500) - 1.5).abs() < 1e-9);
    assert!((chart.timing.tempo_at(2500) - 250.0).abs() < 1e-9);
}

#[test]
fn bmson_mode_hints_set_the_key_count() {
    for (hint, keys) in [("beat-5k", 6), ("popn-9k", 9), ("generic-4keys", 4)] {
        let source = format!(
            r#"{{"version":"1.0.0","info":{{"title":"t","artist":"a","init_bpm":130,"mode_hint":"{hint}"}},"sound_channels":[]}}"#
        );
        let DecodeOutput { chart, .. } =
            decode_chart(Path::new("c.bmson"), source.as_bytes()).unwrap();
        assert_eq!(chart.key_count, keys, "hint {hint}");
    }
}

#[test]
fn bmson_rejects_unmappable_mode_hints() {
    let source = r#"{"version":"1.0.0","info":{"title":"t","artist":"a","init_bpm":130,"mode_hint":"circle-24"},"sound_channels":[]}"#;
    assert!(matches!(
        decode_chart(Path::new("c.bmson"), source.as_bytes()).unwrap_err(),
        DecodeError::UnsupportedVariant(_)
    ));
}

#[test]
fn invalid_json_is_a_malformed_header() {
    assert!(matches!(
        decode_chart(Path::new("c.bmson"), b"{\"info\":").unwrap_err(),
        DecodeError::MalformedHeader(_)
    ));
}
