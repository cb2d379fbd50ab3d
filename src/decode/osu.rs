//! Decoder for the sectioned beatmap text format (`.osu`).
//!
//! Timing lives in two kinds of points sharing one `[TimingPoints]` table:
//! uninherited ("red") lines carry milliseconds per beat, inherited ("green")
//! lines carry a negative value whose magnitude is an x100-scaled scroll
//! percentage. The raw green value clamps to `[-1000, -10]` before
//! conversion; that bound is this format's own convention and deliberately
//! not unified with other decoders' clamps.
//!
//! Only the mania mode is native here. Standard-mode charts convert
//! positionally, deriving hold durations for sliders from the arc-length
//! formula; taiko and catch have no lane mapping and are rejected.

use std::collections::BTreeMap;

use crate::{
    DecodeOutput, Resolver,
    assemble::{NoteStart, PendingNote, RawChart, assemble},
    chart::{ChartMeta, SampleRef, TempoPoint},
    decode::{malformed_header, text_lossy},
    diag::{DecodeError, DecodeWarning},
    timing::TempoMap,
};

/// Raw inherited beat-length clamp, format-local (x100-scaled percentage).
const RAW_GREEN_MIN: f64 = -1000.0;
const RAW_GREEN_MAX: f64 = -10.0;

const TYPE_CIRCLE: u32 = 1;
const TYPE_SLIDER: u32 = 2;
const TYPE_SPINNER: u32 = 8;
const TYPE_HOLD: u32 = 128;

struct TimingRow {
    time_ms: i64,
    beat_len: f64,
    volume: u8,
    uninherited: bool,
}

pub(crate) fn decode(
    bytes: &[u8],
    _resolver: &mut Resolver<'_>,
) -> Result<DecodeOutput, DecodeError> {
    let text = text_lossy(bytes);
    let mut warnings = Vec::new();

    let version_line = text
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| malformed_header("empty file"))?;
    let version = version_line
        .trim()
        .strip_prefix("osu file format v")
        .ok_or_else(|| malformed_header("missing osu file format line"))?;
    version
        .trim()
        .parse::<u32>()
        .map_err(|_| malformed_header(format!("bad format version {version:?}")))?;

    let mut general: BTreeMap<String, String> = BTreeMap::new();
    let mut metadata: BTreeMap<String, String> = BTreeMap::new();
    let mut difficulty: BTreeMap<String, String> = BTreeMap::new();
    let mut timing_rows: Vec<TimingRow> = Vec::new();
    let mut hit_lines: Vec<(usize, &str)> = Vec::new();

    let mut section = "";
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = match name {
                "General" => "General",
                "Metadata" => "Metadata",
                "Difficulty" => "Difficulty",
                "TimingPoints" => "TimingPoints",
                "HitObjects" => "HitObjects",
                _ => "",
            };
            continue;
        }
        match section {
            "General" | "Metadata" | "Difficulty" => {
                if let Some((key, value)) = line.split_once(':') {
                    let entry = (key.trim().to_owned(), value.trim().to_owned());
                    match section {
                        "General" => general.insert(entry.0, entry.1),
                        "Metadata" => metadata.insert(entry.0, entry.1),
                        _ => difficulty.insert(entry.0, entry.1),
                    };
                }
            }
            "TimingPoints" => match parse_timing_row(line) {
                Ok(row) => timing_rows.push(row),
                Err(reason) => warnings.push(DecodeWarning::MalformedRecord {
                    context: format!("line {}", lineno + 1),
                    reason,
                }),
            },
            "HitObjects" => hit_lines.push((lineno, line)),
            _ => {}
        }
    }

    let mode = general
        .get("Mode")
        .and_then(|m| m.trim().parse::<i32>().ok())
        .unwrap_or(0);
    match mode {
        0 | 3 => {}
        1 => {
            return Err(DecodeError::UnsupportedVariant(
                "osu taiko charts have no lane mapping".into(),
            ));
        }
        2 => {
            return Err(DecodeError::UnsupportedVariant(
                "osu catch charts have no lane mapping".into(),
            ));
        }
        other => {
            return Err(DecodeError::UnsupportedVariant(format!(
                "unknown osu mode {other}"
            )));
        }
    }

    let circle_size = difficulty
        .get("CircleSize")
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(5.0);
    let key_count = (circle_size.round() as i64).clamp(1, 18) as u8;
    let slider_multiplier = difficulty
        .get("SliderMultiplier")
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|&v| v > 0.0)
        .unwrap_or(1.4);

    // Tempo points and the volume timeline come out of one table.
    let mut points = Vec::new();
    let mut volumes: Vec<(i64, u8)> = Vec::new();
    for row in &timing_rows {
        if row.uninherited {
            if row.beat_len > 0.0 {
                points.push(TempoPoint::tempo(row.time_ms, row.beat_len));
            } else {
                warnings.push(DecodeWarning::MalformedRecord {
                    context: format!("timing point at {}ms", row.time_ms),
                    reason: format!("non-positive beat length {}", row.beat_len),
                });
                continue;
            }
        } else if row.beat_len < 0.0 {
            let raw = row.beat_len.clamp(RAW_GREEN_MIN, RAW_GREEN_MAX);
            points.push(TempoPoint::scroll(row.time_ms, -100.0 / raw));
        } else {
            warnings.push(DecodeWarning::MalformedRecord {
                context: format!("timing point at {}ms", row.time_ms),
                reason: format!("inherited point with beat length {}", row.beat_len),
            });
            continue;
        }
        volumes.push((row.time_ms, row.volume));
    }
    volumes.sort_by_key(|&(at, _)| at);

    // The engine this decoder just built; slider durations query it below.
    let timing = TempoMap::new(points.clone());

    let meta = ChartMeta {
        title: metadata.get("Title").cloned().unwrap_or_default(),
        artist: metadata.get("Artist").cloned().unwrap_or_default(),
        audio: general.get("AudioFilename").cloned(),
        format: None,
    };
    let mut raw = RawChart::new(key_count, meta);
    raw.tempo = points;

    for (lineno, line) in hit_lines {
        match parse_hit_object(line, key_count, slider_multiplier, &timing, &volumes) {
            Ok(note) => raw.notes.push(note),
            Err(reason) => warnings.push(DecodeWarning::MalformedRecord {
                context: format!("line {}", lineno + 1),
                reason,
            }),
        }
    }

    let chart = assemble(raw, &mut warnings);
    Ok(DecodeOutput { chart, warnings })
}

fn parse_timing_row(line: &str) -> Result<TimingRow, String> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 2 {
        return Err("timing point needs at least time and beat length".into());
    }
    let time_ms = fields[0]
        .parse::<f64>()
        .map_err(|_| format!("bad time {:?}", fields[0]))? as i64;
    let beat_len = fields[1]
        .parse::<f64>()
        .map_err(|_| format!("bad beat length {:?}", fields[1]))?;
    if !beat_len.is_finite() {
        return Err(format!("non-finite beat length {beat_len}"));
    }
    let volume = fields
        .get(5)
        .and_then(|v| v.parse::<i64>().ok())
        .map_or(100, |v| v.clamp(0, 100) as u8);
    let uninherited = fields
        .get(6)
        .map_or(beat_len > 0.0, |v| *v == "1");
    Ok(TimingRow {
        time_ms,
        beat_len,
        volume,
        uninherited,
    })
}

fn parse_hit_object(
    line: &str,
    key_count: u8,
    slider_multiplier: f64,
    timing: &TempoMap,
    volumes: &[(i64, u8)],
) -> Result<PendingNote, String> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < 5 {
        return Err("hit object needs at least 5 fields".into());
    }
    let x = fields[0]
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("bad x position {:?}", fields[0]))?;
    let time_ms = fields[2]
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("bad time {:?}", fields[2]))? as i64;
    let kind = fields[3]
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("bad type {:?}", fields[3]))?;

    let lane = ((x * f64::from(key_count) / 512.0).floor() as i64)
        .clamp(0, i64::from(key_count) - 1) as u8;

    let end_ms = if kind & TYPE_HOLD != 0 {
        let extras = fields.get(5).ok_or("hold without an end time field")?;
        let end = extras
            .split(':')
            .next()
            .unwrap_or("")
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("bad hold end time {extras:?}"))?;
        Some(end as i64)
    } else if kind & TYPE_SLIDER != 0 {
        let slides = fields
            .get(6)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|&v| v >= 1.0)
            .ok_or("slider without a repeat count")?;
        let length = fields
            .get(7)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|&v| v > 0.0)
            .ok_or("slider without a length")?;
        // Arc length to wall time: the path length times beat duration and
        // repeats, against the chart velocity and the local scroll factor.
        let beat_len = timing.tempo_at(time_ms);
        let factor = timing.scroll_factor_at(time_ms);
        let duration =
            (length * beat_len * slides * 0.01 / (slider_multiplier * factor)).floor() as i64;
        (duration > 0).then(|| time_ms + duration)
    } else if kind & TYPE_SPINNER != 0 {
        let end = fields
            .get(5)
            .and_then(|v| v.split(':').next())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .ok_or("spinner without an end time")?;
        Some(end as i64)
    } else if kind & TYPE_CIRCLE != 0 {
        None
    } else {
        return Err(format!("unknown hit object type {kind}"));
    };

    // A hold's trailing field is `endTime:hitSample`; strip the prefix so the
    // sample parse sees the same shape as every other object kind.
    let sample_src = if kind & TYPE_HOLD != 0 {
        fields
            .get(5)
            .and_then(|f| f.split_once(':'))
            .map_or("", |(_, rest)| rest)
    } else {
        fields.last().copied().unwrap_or("")
    };
    let (sample, volume) = hit_sample(sample_src, volumes, time_ms);

    Ok(PendingNote {
        lane,
        start: NoteStart::At(time_ms),
        end_ms,
        sample,
        volume,
    })
}

/// Per-note keysound and volume: the trailing `set:set:index:volume:file`
/// field overrides the timing-point volume when present.
fn hit_sample(field: &str, volumes: &[(i64, u8)], time_ms: i64) -> (Option<SampleRef>, u8) {
    let timeline_volume = {
        let idx = volumes.partition_point(|&(at, _)| at <= time_ms);
        idx.checked_sub(1).map_or(100, |i| volumes[i].1)
    };
    let parts: Vec<&str> = field.trim().split(':').collect();
    if parts.len() < 5 {
        return (None, timeline_volume);
    }
    let volume = parts[3]
        .parse::<u8>()
        .ok()
        .filter(|&v| (1..=100).contains(&v))
        .unwrap_or(timeline_volume);
    let sample = (!parts[4].is_empty()).then(|| SampleRef::Name(parts[4].to_owned()));
    (sample, volume)
}
