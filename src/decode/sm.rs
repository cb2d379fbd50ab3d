//! Decoder for the simfile text format (`.sm`/`.ssc`).
//!
//! Tags are `#KEY:VALUE;` pairs; note data is a grid of measures split on
//! commas, one row per line, one character per column. Holds are
//! marker-paired: `2` (or `4` for rolls) opens a hold in its column and the
//! next `3` in the same column closes it. Timing comes from beat-indexed
//! `#BPMS`/`#STOPS` tables shifted by `#OFFSET` seconds.
//!
//! Several styles in this family have no sensible lane mapping here; blocks
//! with an unknown style are skipped, and a file with nothing decodable is an
//! unsupported variant. Holds left open at end of stream close one beat
//! later, unlike the drop policy of the keysound text formats.

use crate::{
    DecodeOutput, Resolver,
    assemble::{OpenHold, OpenHoldPolicy, PendingNote, RawChart, assemble},
    chart::{ChartMeta, TempoPoint},
    decode::{malformed_header, text_lossy},
    diag::{DecodeError, DecodeWarning},
    timing::BeatClock,
};

/// Lane counts for the styles this crate maps to mania-like lanes.
const STYLES: &[(&str, u8)] = &[
    ("dance-single", 4),
    ("dance-double", 8),
    ("dance-solo", 6),
    ("dance-couple", 8),
    ("pump-single", 5),
    ("pump-double", 10),
    ("pump-halfdouble", 6),
    ("kb7-single", 7),
];

pub(crate) fn decode(
    bytes: &[u8],
    _resolver: &mut Resolver<'_>,
) -> Result<DecodeOutput, DecodeError> {
    let text = text_lossy(bytes);
    let tags = parse_tags(&text);
    if tags.is_empty() {
        return Err(malformed_header("no simfile tags"));
    }

    let mut warnings = Vec::new();
    let mut meta = ChartMeta::default();
    let mut offset_s = 0.0_f64;
    let mut bpms: Option<String> = None;
    let mut stops: Option<String> = None;
    let mut note_blocks: Vec<String> = Vec::new();

    for (key, value) in tags {
        match key.as_str() {
            "TITLE" => meta.title = value.trim().to_owned(),
            "ARTIST" => meta.artist = value.trim().to_owned(),
            "MUSIC" => meta.audio = Some(value.trim().to_owned()),
            "OFFSET" => {
                offset_s = value.trim().parse().unwrap_or_else(|_| {
                    warnings.push(DecodeWarning::MalformedRecord {
                        context: "#OFFSET".into(),
                        reason: format!("bad value {:?}", value.trim()),
                    });
                    0.0
                });
            }
            "BPMS" => bpms = Some(value),
            "STOPS" => stops = Some(value),
            "NOTES" => note_blocks.push(value),
            _ => {}
        }
    }

    let bpms = bpms.ok_or_else(|| malformed_header("missing #BPMS"))?;
    let changes = parse_beat_table(&bpms, &mut warnings, |bpm| {
        (bpm > 0.0).then(|| 60_000.0 / bpm)
    });
    if changes.is_empty() {
        return Err(malformed_header("empty #BPMS"));
    }
    let stop_table = stops.map_or_else(Vec::new, |stops| {
        parse_beat_table(&stops, &mut warnings, |seconds| {
            (seconds >= 0.0).then(|| seconds * 1000.0)
        })
    });

    let origin_ms = -offset_s * 1000.0;
    let initial_mpb = changes[0].1;
    let clock = BeatClock::new(origin_ms, initial_mpb, changes.clone(), stop_table);

    let mut raw = RawChart::new(0, meta);
    if changes[0].0 > 0.0 {
        raw.tempo.push(TempoPoint::tempo(origin_ms as i64, initial_mpb));
    }
    for &(beat, mpb) in &changes {
        raw.tempo.push(TempoPoint::tempo(clock.ms_at(beat) as i64, mpb));
    }

    if note_blocks.is_empty() {
        return Err(malformed_header("missing #NOTES"));
    }

    let mut decoded = false;
    for block in note_blocks {
        let parts: Vec<&str> = block.split(':').collect();
        if parts.len() < 6 {
            warnings.push(DecodeWarning::SkippedBlock {
                what: "notes block",
                reason: "fewer than six segments".into(),
            });
            continue;
        }
        let style = parts[0].trim();
        let Some(&(_, lanes)) = STYLES.iter().find(|&&(name, _)| name == style) else {
            warnings.push(DecodeWarning::SkippedBlock {
                what: "notes block",
                reason: format!("style {style:?} has no lane mapping"),
            });
            continue;
        };
        if decoded {
            warnings.push(DecodeWarning::SkippedBlock {
                what: "notes block",
                reason: format!("only the first decodable block is used ({style:?} skipped)"),
            });
            continue;
        }
        decoded = true;
        raw.key_count = lanes;
        let data = parts[5..].join(":");
        decode_note_grid(&data, lanes, &clock, &mut raw, &mut warnings);
    }

    if !decoded {
        return Err(DecodeError::UnsupportedVariant(
            "no notes block with a known style".into(),
        ));
    }

    let chart = assemble(raw, &mut warnings);
    Ok(DecodeOutput { chart, warnings })
}

/// `beat=value` comma list; `map` converts and filters the value.
fn parse_beat_table(
    value: &str,
    warnings: &mut Vec<DecodeWarning>,
    map: impl Fn(f64) -> Option<f64>,
) -> Vec<(f64, f64)> {
    let mut entries = Vec::new();
    for pair in value.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let parsed = pair.split_once('=').and_then(|(beat, value)| {
            let beat: f64 = beat.trim().parse().ok()?;
            let value: f64 = value.trim().parse().ok()?;
            (beat >= 0.0 && value.is_finite()).then_some((beat, value))
        });
        match parsed.and_then(|(beat, value)| Some((beat, map(value)?))) {
            Some(entry) => entries.push(entry),
            None => warnings.push(DecodeWarning::MalformedRecord {
                context: "beat table".into(),
                reason: format!("bad entry {pair:?}"),
            }),
        }
    }
    entries
}

fn decode_note_grid(
    data: &str,
    lanes: u8,
    clock: &BeatClock,
    raw: &mut RawChart,
    warnings: &mut Vec<DecodeWarning>,
) {
    let mut open: Vec<Option<i64>> = vec![None; usize::from(lanes)];
    let mut last_beat = 0.0_f64;

    for (measure_idx, measure) in data.split(',').enumerate() {
        let rows: Vec<&str> = measure
            .lines()
            .map(|line| line.split("//").next().unwrap_or("").trim())
            .filter(|line| !line.is_empty())
            .collect();
        if rows.is_empty() {
            continue;
        }
        let row_count = rows.len() as f64;
        for (row_idx, row) in rows.iter().enumerate() {
            let beat = 4.0 * measure_idx as f64 + 4.0 * row_idx as f64 / row_count;
            last_beat = beat;
            let start_ms = clock.ms_at(beat) as i64;
            for (lane, glyph) in row.chars().take(usize::from(lanes)).enumerate() {
                let lane = lane as u8;
                match glyph {
                    '0' => {}
                    '1' => raw.notes.push(PendingNote::tap(lane, start_ms)),
                    '2' | '4' => {
                        if let Some(orphan) = open[usize::from(lane)].replace(start_ms) {
                            warnings.push(DecodeWarning::MalformedRecord {
                                context: format!("measure {measure_idx}"),
                                reason: format!(
                                    "hold head in lane {lane} while the hold from {orphan}ms is open"
                                ),
                            });
                        }
                    }
                    '3' => match open[usize::from(lane)].take() {
                        Some(head_ms) => {
                            raw.notes.push(PendingNote {
                                lane,
                                start: crate::assemble::NoteStart::At(head_ms),
                                end_ms: Some(start_ms),
                                sample: None,
                                volume: 100,
                            });
                        }
                        None => warnings.push(DecodeWarning::UnmatchedHoldEnd { lane }),
                    },
                    // Mines, keysounds, lifts and fakes are valid glyphs with
                    // no counterpart in the canonical model.
                    _ => {}
                }
            }
        }
    }

    for (lane, head_ms) in open.into_iter().enumerate() {
        if let Some(start_ms) = head_ms {
            raw.open_holds.push(OpenHold {
                lane: lane as u8,
                start_ms,
                sample: None,
                volume: 100,
            });
        }
    }
    raw.open_hold_policy = OpenHoldPolicy::CloseAfterMs(clock.ms_per_beat_at(last_beat) as i64);
}

fn parse_tags(text: &str) -> Vec<(String, String)> {
    let mut tags = Vec::new();
    let mut rest = text;
    while let Some(hash) = rest.find('#') {
        rest = &rest[hash + 1..];
        let Some(colon) = rest.find(':') else { break };
        let key = rest[..colon].trim().to_ascii_uppercase();
        rest = &rest[colon + 1..];
        let end = rest.find(';').unwrap_or(rest.len());
        tags.push((key, rest[..end].to_owned()));
        rest = rest.get(end + 1..).unwrap_or("");
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_str(source: &str) -> Result<DecodeOutput, DecodeError> {
        decode(source.as_bytes(), &mut |_| None)
    }

    fn simfile(notes: &str) -> String {
        format!(
            "#TITLE:Example;\n#ARTIST:Someone;\n#MUSIC:song.ogg;\n\
             #OFFSET:0.000;\n#BPMS:0.000=600.000;\n#STOPS:;\n\
             #NOTES:\n  dance-single:\n  author:\n  Hard:\n  9:\n  0,0,0,0,0:\n{notes};\n"
        )
    }

    #[test]
    fn marker_pairing_produces_one_hold_and_no_taps() {
        // 600 BPM = 100ms per beat; head at beat 1, tail at beat 4.
        let source = simfile("0000\n2000\n0000\n0000\n,\n3000\n0000\n0000\n0000\n");
        let DecodeOutput { chart, warnings } = decode_str(&source).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(chart.notes.len(), 1);
        let hold = &chart.notes[0];
        assert_eq!((hold.lane, hold.start_ms, hold.end_ms), (0, 100, Some(400)));
    }

    #[test]
    fn offset_shifts_the_whole_chart() {
        let source = simfile("1000\n0000\n0000\n0000\n")
            .replace("#OFFSET:0.000;", "#OFFSET:-0.500;");
        let DecodeOutput { chart, .. } = decode_str(&source).unwrap();
        assert_eq!(chart.notes[0].start_ms, 500);
    }

    #[test]
    fn stops_delay_later_rows_only() {
        // Stop of 250ms at beat 1: the row on beat 1 is unshifted, beat 2 is.
        let source = simfile("0100\n0100\n0100\n0000\n")
            .replace("#STOPS:;", "#STOPS:1.000=0.250;");
        let DecodeOutput { chart, .. } = decode_str(&source).unwrap();
        let starts: Vec<i64> = chart.notes.iter().map(|n| n.start_ms).collect();
        assert_eq!(starts, vec![0, 100, 450]);
    }

    #[test]
    fn unmatched_tail_warns_and_is_dropped() {
        let source = simfile("3000\n0000\n0000\n0000\n");
        let DecodeOutput { chart, warnings } = decode_str(&source).unwrap();
        assert!(chart.notes.is_empty());
        assert!(matches!(
            warnings.as_slice(),
            [DecodeWarning::UnmatchedHoldEnd { lane: 0 }]
        ));
    }

    #[test]
    fn open_hold_closes_one_beat_later() {
        let source = simfile("2000\n0000\n0000\n0000\n");
        let DecodeOutput { chart, warnings } = decode_str(&source).unwrap();
        assert_eq!(chart.notes.len(), 1);
        assert_eq!(chart.notes[0].end_ms, Some(100));
        assert!(matches!(
            warnings.as_slice(),
            [DecodeWarning::ClosedOpenHold { lane: 0, .. }]
        ));
    }

    #[test]
    fn unknown_style_blocks_are_skipped_then_unsupported() {
        let unknown_only = "#TITLE:x;#BPMS:0=120;\
             #NOTES:pump-routine:a:Hard:9:0:0000\n;";
        assert!(matches!(
            decode_str(unknown_only).unwrap_err(),
            DecodeError::UnsupportedVariant(_)
        ));

        let mixed = "#TITLE:x;#BPMS:0=120;\
             #NOTES:pump-routine:a:Hard:9:0:0000\n;\
             #NOTES:dance-single:a:Hard:9:0:1000\n;";
        let DecodeOutput { chart, warnings } = decode_str(mixed).unwrap();
        assert_eq!(chart.key_count, 4);
        assert_eq!(chart.notes.len(), 1);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn missing_bpms_is_malformed_header() {
        assert!(matches!(
            decode_str("#TITLE:x;#NOTES:dance-single:a:H:1:0:0000;").unwrap_err(),
            DecodeError::MalformedHeader(_)
        ));
    }
}
