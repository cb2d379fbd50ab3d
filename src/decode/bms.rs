//! Decoder for the measure/column keysound text format (`.bms`/`.bme`/
//! `.bml`/`.pms`).
//!
//! A file is a pile of `#NAME args` headers and `#mmmcc:objects` messages:
//! three-digit measure, two-character channel, then base-36 object id pairs
//! that divide the measure evenly. Tempo state lives in three tables (inline
//! hex BPM, `#BPMxx` definitions, `#STOPxx` definitions in 1/192 whole-note
//! units) plus per-measure length factors, all of which feed the beat clock
//! before any note time is fixed.
//!
//! Long notes arrive two ways, sometimes both in one file: `5x`/`6x` channels
//! alternate start/end per lane, and `#LNOBJ id` turns the most recent
//! visible note in a lane into the start of a hold ending at the marker.
//! Unmatched opens at end of stream are dropped, which is this format's
//! policy (the simfile decoder closes them instead).

use std::collections::BTreeMap;

use num::rational::Ratio;

use crate::{
    DecodeOutput, Resolver,
    assemble::{NoteStart, OpenHold, PendingNote, RawChart, assemble},
    chart::{ChartMeta, SampleRef, TempoPoint},
    decode::{malformed_header, text_lossy},
    diag::{DecodeError, DecodeWarning},
    timing::BeatClock,
};

const DEFAULT_BPM: f64 = 130.0;
/// `#STOPxx` values are 1/192 of a whole note, i.e. 1/48 beat.
const STOP_UNITS_PER_BEAT: f64 = 48.0;

#[derive(Debug, Clone, Copy)]
struct NoteObj {
    measure: u32,
    frac: Ratio<i64>,
    lane: u8,
    obj: u16,
    long_channel: bool,
}

#[derive(Debug, Default)]
struct Defs {
    bpm: BTreeMap<u16, f64>,
    stop: BTreeMap<u16, f64>,
    scroll: BTreeMap<u16, f64>,
    wav: BTreeMap<u16, String>,
}

pub(crate) fn decode(
    bytes: &[u8],
    _resolver: &mut Resolver<'_>,
) -> Result<DecodeOutput, DecodeError> {
    let text = text_lossy(bytes);
    let mut warnings = Vec::new();

    let mut meta = ChartMeta::default();
    let mut initial_bpm = DEFAULT_BPM;
    let mut volume = 100_u8;
    let mut lnobj: Option<u16> = None;
    let mut defs = Defs::default();

    let mut section_lengths: BTreeMap<u32, f64> = BTreeMap::new();
    let mut messages: Vec<(u32, String, String, usize)> = Vec::new();
    let mut saw_command = false;

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('#') else {
            continue;
        };
        saw_command = true;
        if let Some((measure, channel, body)) = split_message(rest) {
            if channel == "02" {
                match body.trim().parse::<f64>() {
                    Ok(len) if len > 0.0 && len.is_finite() => {
                        section_lengths.insert(measure, len);
                    }
                    _ => warnings.push(DecodeWarning::MalformedRecord {
                        context: format!("line {}", lineno + 1),
                        reason: format!("bad measure length {:?}", body.trim()),
                    }),
                }
            } else {
                messages.push((measure, channel, body.to_owned(), lineno));
            }
            continue;
        }
        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };
        parse_header(
            name, args, &mut meta, &mut initial_bpm, &mut volume, &mut lnobj, &mut defs,
            &mut warnings, lineno,
        );
    }

    if !saw_command {
        return Err(malformed_header("no command lines"));
    }

    // Beat offsets per measure, honoring length factors.
    let max_measure = messages.iter().map(|&(m, ..)| m).max().unwrap_or(0);
    let measure_len = |m: u32| section_lengths.get(&m).copied().unwrap_or(1.0);
    let mut beat_starts = Vec::with_capacity(max_measure as usize + 2);
    beat_starts.push(0.0_f64);
    for m in 0..=max_measure {
        let last = *beat_starts.last().unwrap_or(&0.0);
        beat_starts.push(last + 4.0 * measure_len(m));
    }
    let beat_of = |measure: u32, frac: Ratio<i64>| {
        let in_measure = *frac.numer() as f64 / *frac.denom() as f64;
        beat_starts[measure as usize] + 4.0 * measure_len(measure) * in_measure
    };

    let mut tempo_changes: Vec<(f64, f64)> = Vec::new();
    let mut stop_events: Vec<(f64, f64)> = Vec::new();
    let mut scroll_events: Vec<(f64, f64)> = Vec::new();
    let mut note_objs: Vec<NoteObj> = Vec::new();

    for (measure, channel, body, lineno) in &messages {
        for (frac, obj) in message_objects(body, &mut warnings, *lineno) {
            let beat = beat_of(*measure, frac);
            match channel.as_str() {
                // Inline BPM: the object id is a hex byte value.
                "03" => match u16::from_str_radix(&obj_text(obj), 16) {
                    Ok(bpm) if bpm > 0 => {
                        tempo_changes.push((beat, 60_000.0 / f64::from(bpm)));
                    }
                    _ => warnings.push(DecodeWarning::MalformedRecord {
                        context: format!("line {}", lineno + 1),
                        reason: format!("bad inline BPM {:?}", obj_text(obj)),
                    }),
                },
                "08" => match defs.bpm.get(&obj) {
                    Some(&bpm) => tempo_changes.push((beat, 60_000.0 / bpm)),
                    None => warnings.push(DecodeWarning::MalformedRecord {
                        context: format!("line {}", lineno + 1),
                        reason: format!("undefined #BPM{}", obj_text(obj)),
                    }),
                },
                "09" => match defs.stop.get(&obj) {
                    Some(&units) => stop_events.push((beat, units)),
                    None => warnings.push(DecodeWarning::MalformedRecord {
                        context: format!("line {}", lineno + 1),
                        reason: format!("undefined #STOP{}", obj_text(obj)),
                    }),
                },
                "SC" => match defs.scroll.get(&obj) {
                    Some(&factor) => scroll_events.push((beat, factor)),
                    None => warnings.push(DecodeWarning::MalformedRecord {
                        context: format!("line {}", lineno + 1),
                        reason: format!("undefined #SCROLL{}", obj_text(obj)),
                    }),
                },
                // BGM and graphics channels carry no lane data.
                "01" | "04" | "06" | "07" => {}
                _ => {
                    let mut chars = channel.chars();
                    if let (Some(side), Some(key), None) =
                        (chars.next(), chars.next(), chars.next())
                        && let Some((lane, long_channel)) = lane_for(side, key)
                    {
                        note_objs.push(NoteObj {
                            measure: *measure,
                            frac,
                            lane,
                            obj,
                            long_channel,
                        });
                    }
                    // Everything else is a known-but-out-of-model channel.
                }
            }
        }
    }

    // Resolve stop durations against the tempo in effect at each stop.
    let initial_mpb = 60_000.0 / initial_bpm;
    let tempo_only = BeatClock::new(0.0, initial_mpb, tempo_changes.clone(), Vec::new());
    let stops_ms: Vec<(f64, f64)> = stop_events
        .iter()
        .map(|&(beat, units)| {
            (
                beat,
                units / STOP_UNITS_PER_BEAT * tempo_only.ms_per_beat_at(beat),
            )
        })
        .collect();
    let clock = BeatClock::new(0.0, initial_mpb, tempo_changes.clone(), stops_ms);

    let mut raw = RawChart::new(0, meta);
    raw.tempo.push(TempoPoint::tempo(0, initial_mpb));
    for &(beat, mpb) in &tempo_changes {
        raw.tempo.push(TempoPoint::tempo(clock.ms_at(beat) as i64, mpb));
    }
    for &(beat, factor) in &scroll_events {
        raw.tempo
            .push(TempoPoint::scroll(clock.ms_at(beat) as i64, factor));
    }

    // Time order matters for pairing, so sort on exact positions first.
    note_objs.sort_by(|a, b| (a.measure, a.frac).cmp(&(b.measure, b.frac)));

    let mut open_long: [Option<(i64, Option<SampleRef>)>; 16] = Default::default();
    let mut last_tap: [Option<usize>; 16] = [None; 16];
    let mut max_lane = 0_u8;

    for obj in &note_objs {
        max_lane = max_lane.max(obj.lane);
        let ms = clock.ms_at(beat_of(obj.measure, obj.frac)) as i64;
        let slot = usize::from(obj.lane) & 0x0f;
        let sample = defs.wav.get(&obj.obj).cloned().map(SampleRef::Name);
        if obj.long_channel {
            match open_long[slot].take() {
                Some((start_ms, start_sample)) => raw.notes.push(PendingNote {
                    lane: obj.lane,
                    start: NoteStart::At(start_ms),
                    end_ms: Some(ms),
                    sample: start_sample,
                    volume,
                }),
                None => open_long[slot] = Some((ms, sample)),
            }
        } else if lnobj.is_some_and(|id| id == obj.obj) {
            match last_tap[slot].take() {
                Some(idx) => raw.notes[idx].end_ms = Some(ms),
                None => warnings.push(DecodeWarning::UnmatchedHoldEnd { lane: obj.lane }),
            }
        } else {
            raw.notes.push(PendingNote {
                lane: obj.lane,
                start: NoteStart::At(ms),
                end_ms: None,
                sample,
                volume,
            });
            last_tap[slot] = Some(raw.notes.len() - 1);
        }
    }

    for (slot, open) in open_long.into_iter().enumerate() {
        if let Some((start_ms, sample)) = open {
            raw.open_holds.push(OpenHold {
                lane: slot as u8,
                start_ms,
                sample,
                volume,
            });
        }
    }

    raw.key_count = (max_lane + 1).max(5);
    let chart = assemble(raw, &mut warnings);
    Ok(DecodeOutput { chart, warnings })
}

#[allow(clippy::too_many_arguments)]
fn parse_header(
    name: &str,
    args: &str,
    meta: &mut ChartMeta,
    initial_bpm: &mut f64,
    volume: &mut u8,
    lnobj: &mut Option<u16>,
    defs: &mut Defs,
    warnings: &mut Vec<DecodeWarning>,
    lineno: usize,
) {
    let mut warn = |reason: String| {
        warnings.push(DecodeWarning::MalformedRecord {
            context: format!("line {}", lineno + 1),
            reason,
        });
    };
    if name.eq_ignore_ascii_case("TITLE") {
        meta.title = args.to_owned();
    } else if name.eq_ignore_ascii_case("ARTIST") {
        meta.artist = args.to_owned();
    } else if name.eq_ignore_ascii_case("BPM") {
        match args.parse::<f64>() {
            Ok(bpm) if bpm > 0.0 && bpm.is_finite() => *initial_bpm = bpm,
            _ => warn(format!("bad #BPM {args:?}")),
        }
    } else if name.eq_ignore_ascii_case("VOLWAV") {
        match args.parse::<i64>() {
            Ok(v) => *volume = v.clamp(0, 100) as u8,
            Err(_) => warn(format!("bad #VOLWAV {args:?}")),
        }
    } else if name.eq_ignore_ascii_case("LNOBJ") {
        match parse_obj_id(args) {
            Some(id) => *lnobj = Some(id),
            None => warn(format!("bad #LNOBJ id {args:?}")),
        }
    } else if let Some(id) = strip_prefix_ci(name, "BPM").or_else(|| strip_prefix_ci(name, "EXBPM"))
    {
        match (parse_obj_id(id), args.parse::<f64>()) {
            (Some(id), Ok(bpm)) if bpm > 0.0 && bpm.is_finite() => {
                defs.bpm.insert(id, bpm);
            }
            _ => warn(format!("bad #BPMxx definition {name} {args:?}")),
        }
    } else if let Some(id) = strip_prefix_ci(name, "STOP") {
        match (parse_obj_id(id), args.parse::<f64>()) {
            (Some(id), Ok(units)) if units >= 0.0 && units.is_finite() => {
                defs.stop.insert(id, units);
            }
            _ => warn(format!("bad #STOPxx definition {name} {args:?}")),
        }
    } else if let Some(id) = strip_prefix_ci(name, "SCROLL") {
        match (parse_obj_id(id), args.parse::<f64>()) {
            (Some(id), Ok(factor)) if factor.is_finite() => {
                defs.scroll.insert(id, factor);
            }
            _ => warn(format!("bad #SCROLLxx definition {name} {args:?}")),
        }
    } else if let Some(id) = strip_prefix_ci(name, "WAV") {
        match parse_obj_id(id) {
            Some(id) if !args.is_empty() => {
                defs.wav.insert(id, args.to_owned());
            }
            _ => warn(format!("bad #WAVxx definition {name} {args:?}")),
        }
    }
    // The remaining headers (#GENRE, #PLAYER, #RANK, graphics...) carry no
    // canonical-model data.
}

/// `mmmcc:body` message split; `None` when the line is a plain header.
fn split_message(rest: &str) -> Option<(u32, String, &str)> {
    let (head, body) = rest.split_once(':')?;
    let head = head.trim();
    if head.len() != 5 {
        return None;
    }
    let (measure, channel) = head.split_at(3);
    if !measure.bytes().all(|b| b.is_ascii_digit())
        || !channel.bytes().all(|b| b.is_ascii_alphanumeric())
    {
        return None;
    }
    let measure = measure.parse().ok()?;
    Some((measure, channel.to_ascii_uppercase(), body))
}

/// Object id pairs of a message body with their in-measure fractions.
fn message_objects(
    body: &str,
    warnings: &mut Vec<DecodeWarning>,
    lineno: usize,
) -> Vec<(Ratio<i64>, u16)> {
    let body = body.trim();
    let chars: Vec<char> = body.chars().filter(|c| !c.is_whitespace()).collect();
    if chars.len() % 2 != 0 {
        warnings.push(DecodeWarning::MalformedRecord {
            context: format!("line {}", lineno + 1),
            reason: "odd-length message body".into(),
        });
    }
    let count = (chars.len() / 2) as i64;
    let mut objects = Vec::new();
    for i in 0..count {
        let pair: String = chars[i as usize * 2..i as usize * 2 + 2].iter().collect();
        if pair == "00" {
            continue;
        }
        match u16::from_str_radix(&pair, 36) {
            Ok(obj) => objects.push((Ratio::new(i, count), obj)),
            Err(_) => warnings.push(DecodeWarning::MalformedRecord {
                context: format!("line {}", lineno + 1),
                reason: format!("bad object id {pair:?}"),
            }),
        }
    }
    objects
}

/// Two-character base-36 object id.
fn parse_obj_id(s: &str) -> Option<u16> {
    let s = s.trim();
    (s.len() == 2)
        .then(|| u16::from_str_radix(s, 36).ok())
        .flatten()
}

fn obj_text(obj: u16) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let hi = DIGITS[usize::from(obj / 36) % 36] as char;
    let lo = DIGITS[usize::from(obj % 36)] as char;
    format!("{hi}{lo}")
}

fn strip_prefix_ci<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
    (name.len() > prefix.len() && name[..prefix.len()].eq_ignore_ascii_case(prefix))
        .then(|| &name[prefix.len()..])
}

/// Lane for a note channel, plus whether it is a long-note channel.
///
/// Beat layout: keys 1-5 are lanes 0-4, extended keys 8/9 are lanes 5/6, and
/// the scratch channel 6 is lane 7. Side 2 channels shift up by 8.
fn lane_for(side: char, key: char) -> Option<(u8, bool)> {
    let base = match key {
        '1' => 0,
        '2' => 1,
        '3' => 2,
        '4' => 3,
        '5' => 4,
        '8' => 5,
        '9' => 6,
        '6' => 7,
        _ => return None,
    };
    match side {
        '1' => Some((base, false)),
        '2' => Some((base + 8, false)),
        '5' => Some((base, true)),
        '6' => Some((base + 8, true)),
        _ => None,
    }
}
