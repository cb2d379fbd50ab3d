//! Decoder for the JSON chart format (`.bmson`).
//!
//! The structs mirror the published format object for object; unknown fields
//! are ignored and optional tables default to empty so older files keep
//! loading. Pulses normalize to beats through `info.resolution` (pulses per
//! quarter note), stops flatten through the beat clock, and `l > 0` is the
//! explicit hold-duration encoding.

use serde::Deserialize;

use crate::{
    DecodeOutput, Resolver,
    assemble::{NoteStart, PendingNote, RawChart, assemble},
    chart::{ChartMeta, SampleRef, TempoPoint},
    decode::malformed_header,
    diag::{DecodeError, DecodeWarning},
    timing::BeatClock,
};

/// Top-level bmson object.
#[derive(Debug, Deserialize)]
struct Bmson {
    info: Info,
    #[serde(default)]
    bpm_events: Vec<BpmEvent>,
    #[serde(default)]
    stop_events: Vec<StopEvent>,
    /// Player-side extension; absent from the base format.
    #[serde(default)]
    scroll_events: Vec<ScrollEvent>,
    #[serde(default)]
    sound_channels: Vec<SoundChannel>,
}

/// Header metadata of the chart.
#[derive(Debug, Deserialize)]
struct Info {
    #[serde(default)]
    title: String,
    #[serde(default)]
    artist: String,
    /// Initial BPM; pulse zero starts at this tempo.
    init_bpm: f64,
    /// Pulses per quarter note in 4/4.
    #[serde(default = "default_resolution")]
    resolution: u32,
    /// Lane layout hint, e.g. `beat-7k` or `generic-6keys`.
    #[serde(default = "default_mode_hint")]
    mode_hint: String,
}

fn default_resolution() -> u32 {
    240
}

fn default_mode_hint() -> String {
    "beat-7k".into()
}

#[derive(Debug, Deserialize)]
struct BpmEvent {
    y: u64,
    bpm: f64,
}

#[derive(Debug, Deserialize)]
struct StopEvent {
    y: u64,
    /// Pause length in pulses at the tempo in effect at `y`.
    duration: u64,
}

#[derive(Debug, Deserialize)]
struct ScrollEvent {
    y: u64,
    rate: f64,
}

#[derive(Debug, Deserialize)]
struct SoundChannel {
    name: String,
    #[serde(default)]
    notes: Vec<SoundNote>,
}

#[derive(Debug, Deserialize)]
struct SoundNote {
    /// Lane, 1-based. Zero or absent is a BGM note with no lane.
    #[serde(default)]
    x: Option<u8>,
    y: u64,
    /// Hold length in pulses; zero is a tap.
    #[serde(default)]
    l: u64,
    /// Audio continuation flag; mixing detail with no lane meaning.
    #[serde(default)]
    #[allow(dead_code)]
    c: bool,
}

pub(crate) fn decode(
    bytes: &[u8],
    _resolver: &mut Resolver<'_>,
) -> Result<DecodeOutput, DecodeError> {
    let bmson: Bmson = serde_json::from_slice(bytes)
        .map_err(|err| malformed_header(format!("bmson parse: {err}")))?;
    let mut warnings = Vec::new();

    if !(bmson.info.init_bpm > 0.0 && bmson.info.init_bpm.is_finite()) {
        return Err(malformed_header(format!(
            "bad init_bpm {}",
            bmson.info.init_bpm
        )));
    }
    if bmson.info.resolution == 0 {
        return Err(malformed_header("resolution is zero"));
    }
    let key_count = mode_hint_lanes(&bmson.info.mode_hint).ok_or_else(|| {
        DecodeError::UnsupportedVariant(format!(
            "mode hint {:?} has no lane mapping",
            bmson.info.mode_hint
        ))
    })?;

    let resolution = f64::from(bmson.info.resolution);
    let beat_of = |y: u64| y as f64 / resolution;

    let mut tempo_changes: Vec<(f64, f64)> = Vec::new();
    for event in &bmson.bpm_events {
        if event.bpm > 0.0 && event.bpm.is_finite() {
            tempo_changes.push((beat_of(event.y), 60_000.0 / event.bpm));
        } else {
            warnings.push(DecodeWarning::MalformedRecord {
                context: format!("bpm event at pulse {}", event.y),
                reason: format!("non-positive bpm {}", event.bpm),
            });
        }
    }

    let initial_mpb = 60_000.0 / bmson.info.init_bpm;
    let tempo_only = BeatClock::new(0.0, initial_mpb, tempo_changes.clone(), Vec::new());
    let stops: Vec<(f64, f64)> = bmson
        .stop_events
        .iter()
        .map(|stop| {
            let beat = beat_of(stop.y);
            let pause_beats = stop.duration as f64 / resolution;
            (beat, pause_beats * tempo_only.ms_per_beat_at(beat))
        })
        .collect();
    let clock = BeatClock::new(0.0, initial_mpb, tempo_changes.clone(), stops);

    let meta = ChartMeta {
        title: bmson.info.title.clone(),
        artist: bmson.info.artist.clone(),
        audio: None,
        format: None,
    };
    let mut raw = RawChart::new(key_count, meta);
    raw.tempo.push(TempoPoint::tempo(0, initial_mpb));
    for &(beat, mpb) in &tempo_changes {
        raw.tempo.push(TempoPoint::tempo(clock.ms_at(beat) as i64, mpb));
    }
    for event in &bmson.scroll_events {
        if event.rate.is_finite() {
            raw.tempo.push(TempoPoint::scroll(
                clock.ms_at(beat_of(event.y)) as i64,
                event.rate,
            ));
        } else {
            warnings.push(DecodeWarning::MalformedRecord {
                context: format!("scroll event at pulse {}", event.y),
                reason: "non-finite rate".into(),
            });
        }
    }

    for channel in &bmson.sound_channels {
        for note in &channel.notes {
            // BGM notes have no lane and nothing to judge.
            let Some(x) = note.x.filter(|&x| x > 0) else {
                continue;
            };
            let start_ms = clock.ms_at(beat_of(note.y)) as i64;
            let end_ms = (note.l > 0).then(|| clock.ms_at(beat_of(note.y + note.l)) as i64);
            raw.notes.push(PendingNote {
                lane: x - 1,
                start: NoteStart::At(start_ms),
                end_ms,
                sample: Some(SampleRef::Name(channel.name.clone())),
                volume: 100,
            });
        }
    }

    let chart = assemble(raw, &mut warnings);
    Ok(DecodeOutput { chart, warnings })
}

/// Lane counts per mode hint. `generic-Nkeys` parses its count.
fn mode_hint_lanes(hint: &str) -> Option<u8> {
    match hint {
        "beat-5k" => Some(6),
        "beat-7k" => Some(8),
        "beat-10k" => Some(12),
        "beat-14k" => Some(16),
        "popn-5k" => Some(5),
        "popn-9k" => Some(9),
        _ => {
            let n = hint.strip_prefix("generic-")?.strip_suffix("keys")?;
            n.parse::<u8>().ok().filter(|&n| (1..=18).contains(&n))
        }
    }
}
