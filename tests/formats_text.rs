//! End-to-end decoding of the text formats through path detection.

use std::path::Path;

use omnichart::prelude::*;

#[test]
fn bms_roundtrip_through_the_top_level_api() {
    let source = "#TITLE End To End\n#ARTIST A\n#BPM 120\n#LNOBJ ZZ\n\
                  #WAV01 kick.wav\n#00011:01ZZ\n#00013:0101\n";
    let DecodeOutput { chart, warnings } =
        decode_chart(Path::new("song.bms"), source.as_bytes()).unwrap();
    assert!(warnings.is_empty());
    assert_eq!(chart.meta.format, Some(FormatKind::Bms));
    assert_eq!(chart.meta.title, "End To End");
    // One lnobj hold in lane 0, two taps in lane 2.
    assert_eq!(chart.notes.len(), 3);
    assert_eq!(chart.notes[0].end_ms, Some(1000));
    assert_eq!(
        chart.notes[0].sample,
        Some(SampleRef::Name("kick.wav".into()))
    );
}

#[test]
fn dtx_resolver_injection_flows_from_the_api() {
    let source = "#TITLE: Drums\n#BPM: 150\n#PATH_WAV: snd\n\
                  #WAV01: tom.wav\n#00012: 0101\n";
    let output = decode_chart_with(Path::new("drum.dtx"), source.as_bytes(), |name| {
        (name == "snd/tom.wav").then(Vec::new)
    })
    .unwrap();
    assert!(output.warnings.is_empty());
    assert_eq!(output.chart.meta.format, Some(FormatKind::Dtx));
    assert_eq!(output.chart.notes.len(), 2);

    // Without the resolver the companion check degrades to a warning.
    let output = decode_chart(Path::new("drum.dtx"), source.as_bytes()).unwrap();
    assert!(matches!(
        output.warnings.as_slice(),
        [DecodeWarning::MissingCompanion { name }] if name == "snd/tom.wav"
    ));
}

#[test]
fn osu_mania_chart_decodes_with_green_line_scrolls() {
    let source = "osu file format v14\n\n[General]\nMode: 3\nAudioFilename: a.mp3\n\n\
                  [Metadata]\nTitle: M\nArtist: N\n\n\
                  [Difficulty]\nCircleSize: 4\nSliderMultiplier: 1.4\n\n\
                  [TimingPoints]\n0,500,4,2,0,60,1,0\n1000,-200,4,2,0,60,0,0\n\n\
                  [HitObjects]\n64,192,0,1,0,0:0:0:0:\n192,192,1500,128,0,2000:0:0:0:0:\n";
    let DecodeOutput { chart, warnings } =
        decode_chart(Path::new("map.osu"), source.as_bytes()).unwrap();
    assert!(warnings.is_empty());
    assert_eq!(chart.meta.format, Some(FormatKind::Osu));
    assert_eq!(chart.meta.audio.as_deref(), Some("a.mp3"));
    assert_eq!(chart.key_count, 4);
    assert!((chart.timing.scroll_factor_at(1000) - 0.5).abs() < 1e-9);
    assert_eq!(chart.notes[0].volume, 60);
    assert_eq!(chart.notes[1].end_ms, Some(2000));
}

#[test]
fn sm_marker_pairing_survives_the_whole_pipeline() {
    // 600 BPM puts the head at 100ms and the tail at 400ms.
    let source = "#TITLE:Pair;\n#MUSIC:song.ogg;\n#OFFSET:0;\n#BPMS:0=600;\n\
                  #NOTES:dance-single:a:Hard:9:0:\n\
                  0000\n2000\n0000\n0000\n,\n3000\n0000\n0000\n0000\n;\n";
    let DecodeOutput { chart, warnings } =
        decode_chart(Path::new("steps.sm"), source.as_bytes()).unwrap();
    assert!(warnings.is_empty());
    assert_eq!(chart.meta.format, Some(FormatKind::Sm));
    assert_eq!(chart.notes.len(), 1);
    let hold = &chart.notes[0];
    assert_eq!((hold.start_ms, hold.end_ms), (100, Some(400)));
    assert!(chart.judgeable_notes().count() == 1);
}

#[test]
fn tsc_doc_example_stays_valid() {
    let source = "#TSC 1\nkeys\t4\ntitle\tExample\n\nnote\t1000\t0\n";
    let DecodeOutput { chart, warnings } =
        decode_chart(Path::new("example.tsc"), source.as_bytes()).unwrap();
    assert!(warnings.is_empty());
    assert_eq!(chart.meta.format, Some(FormatKind::Tsc));
    assert_eq!(chart.key_count, 4);
    assert_eq!(chart.notes.len(), 1);
}

#[test]
fn decode_as_bypasses_detection_for_sibling_retries() {
    // A caller that knows better can force a decoder directly.
    let source = "#TITLE T\n#BPM 120\n#00011:01\n";
    let output = decode_as(FormatKind::Bms, source.as_bytes(), &mut |_| None).unwrap();
    assert_eq!(output.chart.meta.format, Some(FormatKind::Bms));
    assert_eq!(output.chart.notes.len(), 1);
}
