//! Decoder for the tick-indexed binary timeline format (`.pt`).
//!
//! A `PTFF` header declares the tick rate (ticks per beat) and the lane
//! count, then each `EZTR` chunk is one track of typed events: notes, tempo
//! changes, scroll changes, and autoplay samples. Tracks are merged in tick
//! order before conversion, so a tempo change in one track governs notes in
//! every other.
//!
//! Two format-local conventions matter here:
//!
//! - A note whose duration is at most [`HOLD_TICK_THRESHOLD`] ticks decodes
//!   as a tap; authoring hardware emits tiny nonzero durations as jitter.
//! - Scroll changes arrive as x100-scaled units with a raw floor of 10
//!   (factor 0.1). That floor differs from the beatmap text format's raw
//!   clamp on purpose; each format keeps its own authoring convention.

use itertools::Itertools;

use crate::{
    DecodeOutput, Resolver,
    assemble::{NoteStart, PendingNote, RawChart, assemble},
    chart::{ChartMeta, SampleRef, TempoPoint},
    decode::{malformed_header, reader::ByteReader},
    diag::{DecodeError, DecodeWarning},
    timing::BeatClock,
};

const MAGIC: &[u8] = b"PTFF";
const TRACK_MAGIC: &[u8] = b"EZTR";
const SUPPORTED_VERSION: u16 = 1;

/// Note durations at or below this many ticks decode as taps.
pub(crate) const HOLD_TICK_THRESHOLD: u32 = 6;
/// Raw floor of x100-scaled scroll units.
const MIN_SCROLL_UNITS: u16 = 10;

#[derive(Debug, Clone, Copy)]
struct TrackEvent {
    tick: u32,
    kind: EventKind,
}

#[derive(Debug, Clone, Copy)]
enum EventKind {
    Note {
        lane: u8,
        sample: u16,
        volume: u8,
        duration: u32,
    },
    Tempo(f64),
    Scroll(f64),
}

pub(crate) fn decode(
    bytes: &[u8],
    _resolver: &mut Resolver<'_>,
) -> Result<DecodeOutput, DecodeError> {
    let mut r = ByteReader::new(bytes);
    r.tag(MAGIC)
        .map_err(|_| malformed_header("missing PTFF magic"))?;
    let version = r.u16().map_err(|_| malformed_header("missing version"))?;
    if version != SUPPORTED_VERSION {
        return Err(DecodeError::UnsupportedVariant(format!(
            "pt version {version}"
        )));
    }
    let tick_rate = r.u16()?;
    if tick_rate == 0 {
        return Err(malformed_header("tick rate is zero"));
    }
    let initial_bpm = f64::from(r.f32()?);
    if !(initial_bpm > 0.0 && initial_bpm.is_finite()) {
        return Err(malformed_header(format!("bad initial BPM {initial_bpm}")));
    }
    let lane_count = r.u8()?;
    if !(1..=18).contains(&lane_count) {
        return Err(malformed_header(format!("bad lane count {lane_count}")));
    }
    let track_count = r.u8()?;
    let title = r.short_string()?;
    let artist = r.short_string()?;

    let mut warnings = Vec::new();
    let mut tracks: Vec<Vec<TrackEvent>> = Vec::with_capacity(usize::from(track_count));
    for track_index in 0..track_count {
        r.tag(TRACK_MAGIC)?;
        let event_count = r.u32()?;
        let mut events = Vec::new();
        for _ in 0..event_count {
            let tick = r.u32()?;
            let kind = r.u8()?;
            match kind {
                0 => {
                    let lane = r.u8()?;
                    let sample = r.u16()?;
                    let mut volume = r.u8()?;
                    let duration = r.u32()?;
                    if volume > 100 {
                        warnings.push(DecodeWarning::ValueClamped {
                            what: "note volume",
                            value: f64::from(volume),
                            min: 0.0,
                            max: 100.0,
                        });
                        volume = 100;
                    }
                    events.push(TrackEvent {
                        tick,
                        kind: EventKind::Note {
                            lane,
                            sample,
                            volume,
                            duration,
                        },
                    });
                }
                1 => {
                    let bpm = f64::from(r.f32()?);
                    r.skip(4)?;
                    if bpm > 0.0 && bpm.is_finite() {
                        events.push(TrackEvent {
                            tick,
                            kind: EventKind::Tempo(bpm),
                        });
                    } else {
                        warnings.push(DecodeWarning::MalformedRecord {
                            context: format!("track {track_index} tick {tick}"),
                            reason: format!("non-positive tempo {bpm}"),
                        });
                    }
                }
                2 => {
                    let mut raw = r.u16()?;
                    r.skip(6)?;
                    if raw < MIN_SCROLL_UNITS {
                        warnings.push(DecodeWarning::ValueClamped {
                            what: "scroll units",
                            value: f64::from(raw),
                            min: f64::from(MIN_SCROLL_UNITS),
                            max: f64::from(u16::MAX),
                        });
                        raw = MIN_SCROLL_UNITS;
                    }
                    events.push(TrackEvent {
                        tick,
                        kind: EventKind::Scroll(f64::from(raw) / 100.0),
                    });
                }
                // Autoplay samples have no lane and nothing to judge.
                3 => r.skip(8)?,
                other => {
                    warnings.push(DecodeWarning::MalformedRecord {
                        context: format!("track {track_index} tick {tick}"),
                        reason: format!("unknown event kind {other}"),
                    });
                    r.skip(8)?;
                }
            }
        }
        events.sort_by_key(|event| event.tick);
        tracks.push(events);
    }

    // One timeline out of all tracks, in tick order.
    let merged: Vec<TrackEvent> = tracks
        .into_iter()
        .kmerge_by(|a, b| a.tick <= b.tick)
        .collect();

    let beat_of = |tick: u32| f64::from(tick) / f64::from(tick_rate);
    let tempo_changes: Vec<(f64, f64)> = merged
        .iter()
        .filter_map(|event| match event.kind {
            EventKind::Tempo(bpm) => Some((beat_of(event.tick), 60_000.0 / bpm)),
            _ => None,
        })
        .collect();
    let initial_mpb = 60_000.0 / initial_bpm;
    let clock = BeatClock::new(0.0, initial_mpb, tempo_changes.clone(), Vec::new());

    let meta = ChartMeta {
        title,
        artist,
        audio: None,
        format: None,
    };
    let mut raw = RawChart::new(lane_count, meta);
    raw.tempo.push(TempoPoint::tempo(0, initial_mpb));
    for &(beat, mpb) in &tempo_changes {
        raw.tempo.push(TempoPoint::tempo(clock.ms_at(beat) as i64, mpb));
    }

    for event in &merged {
        match event.kind {
            EventKind::Scroll(factor) => {
                raw.tempo.push(TempoPoint::scroll(
                    clock.ms_at(beat_of(event.tick)) as i64,
                    factor,
                ));
            }
            EventKind::Note {
                lane,
                sample,
                volume,
                duration,
            } => {
                let start_ms = clock.ms_at(beat_of(event.tick)) as i64;
                let end_ms = (duration > HOLD_TICK_THRESHOLD)
                    .then(|| clock.ms_at(beat_of(event.tick + duration)) as i64);
                raw.notes.push(PendingNote {
                    lane,
                    start: NoteStart::At(start_ms),
                    end_ms,
                    sample: (sample != 0).then(|| SampleRef::Id(u32::from(sample))),
                    volume,
                });
            }
            EventKind::Tempo(_) => {}
        }
    }

    let chart = assemble(raw, &mut warnings);
    Ok(DecodeOutput { chart, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture(Vec<u8>);

    impl Fixture {
        /// 100 ticks per beat at 120 BPM: 5ms per tick.
        fn new(lane_count: u8, track_count: u8) -> Self {
            let mut buf = Vec::from(MAGIC);
            buf.extend_from_slice(&SUPPORTED_VERSION.to_le_bytes());
            buf.extend_from_slice(&100_u16.to_le_bytes());
            buf.extend_from_slice(&120.0_f32.to_le_bytes());
            buf.push(lane_count);
            buf.push(track_count);
            for field in ["Title", "Artist"] {
                buf.extend_from_slice(&(field.len() as u16).to_le_bytes());
                buf.extend_from_slice(field.as_bytes());
            }
            Self(buf)
        }

        fn track(mut self, events: &[(u32, u8, [u8; 8])]) -> Self {
            self.0.extend_from_slice(TRACK_MAGIC);
            self.0.extend_from_slice(&(events.len() as u32).to_le_bytes());
            for &(tick, kind, payload) in events {
                self.0.extend_from_slice(&tick.to_le_bytes());
                self.0.push(kind);
                self.0.extend_from_slice(&payload);
            }
            self
        }
    }

    fn note_payload(lane: u8, sample: u16, volume: u8, duration: u32) -> [u8; 8] {
        let s = sample.to_le_bytes();
        let d = duration.to_le_bytes();
        [lane, s[0], s[1], volume, d[0], d[1], d[2], d[3]]
    }

    fn tempo_payload(bpm: f32) -> [u8; 8] {
        let b = bpm.to_le_bytes();
        [b[0], b[1], b[2], b[3], 0, 0, 0, 0]
    }

    fn scroll_payload(raw: u16) -> [u8; 8] {
        let r = raw.to_le_bytes();
        [r[0], r[1], 0, 0, 0, 0, 0, 0]
    }

    fn run(fixture: Fixture) -> Result<DecodeOutput, DecodeError> {
        decode(&fixture.0, &mut |_| None)
    }

    #[test]
    fn short_durations_are_taps_long_ones_hold() {
        let out = run(Fixture::new(6, 1).track(&[
            (0, 0, note_payload(0, 1, 100, HOLD_TICK_THRESHOLD)),
            (200, 0, note_payload(1, 2, 100, 100)),
        ]))
        .unwrap();
        assert!(out.warnings.is_empty());
        let tap = &out.chart.notes[0];
        assert_eq!(tap.end_ms, None);
        let hold = &out.chart.notes[1];
        // Tick 200 = 1000ms, 100 ticks = one 500ms beat.
        assert_eq!((hold.start_ms, hold.end_ms), (1000, Some(1500)));
    }

    #[test]
    fn tempo_in_one_track_governs_notes_in_another() {
        let out = run(Fixture::new(6, 2)
            .track(&[(100, 1, tempo_payload(240.0))])
            .track(&[(200, 0, note_payload(0, 1, 100, 0))]))
        .unwrap();
        // One beat at 120 then one at 240: 500 + 250.
        assert_eq!(out.chart.notes[0].start_ms, 750);
    }

    #[test]
    fn scroll_units_floor_at_ten_raw() {
        let out = run(Fixture::new(6, 1).track(&[
            (0, 2, scroll_payload(200)),
            (100, 2, scroll_payload(3)),
        ]))
        .unwrap();
        assert!((out.chart.timing.scroll_factor_at(0) - 2.0).abs() < 1e-9);
        assert!((out.chart.timing.scroll_factor_at(500) - 0.1).abs() < 1e-9);
        assert!(matches!(
            out.warnings.as_slice(),
            [DecodeWarning::ValueClamped { what: "scroll units", .. }]
        ));
    }

    #[test]
    fn unknown_event_kind_skips_with_warning() {
        let out = run(Fixture::new(6, 1).track(&[
            (0, 9, [0; 8]),
            (100, 0, note_payload(2, 1, 100, 0)),
        ]))
        .unwrap();
        assert_eq!(out.chart.notes.len(), 1);
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut fixture = Fixture::new(6, 0);
        fixture.0[4..6].copy_from_slice(&2_u16.to_le_bytes());
        assert!(matches!(
            run(fixture).unwrap_err(),
            DecodeError::UnsupportedVariant(_)
        ));
    }

    #[test]
    fn truncated_track_is_a_hard_failure() {
        let mut fixture = Fixture::new(6, 1);
        fixture.0.extend_from_slice(TRACK_MAGIC);
        fixture.0.extend_from_slice(&3_u32.to_le_bytes());
        assert!(matches!(
            run(fixture).unwrap_err(),
            DecodeError::TruncatedData(_)
        ));
    }
}
