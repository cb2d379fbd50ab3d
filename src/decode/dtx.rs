//! Decoder for the channel-based drum tracker text format (`.dtx`).
//!
//! Shares the measure/channel message shape of the keysound text family but
//! with colon-separated headers, per-chip `#VOLUMExx` definitions, and drum
//! channels `11`..`1A` mapping to ten lanes. Drum chips are momentary, so
//! this format produces taps only.
//!
//! When the chart declares `#PATH_WAV`, its keysounds live outside the chart
//! directory and each definition is checked through the injected resolver;
//! an unresolvable chip is a warning, never a failure. Without `#PATH_WAV`
//! no checks run.

use std::collections::BTreeMap;

use num::rational::Ratio;

use crate::{
    DecodeOutput, Resolver,
    assemble::{PendingNote, RawChart, assemble},
    chart::{ChartMeta, SampleRef, TempoPoint},
    decode::{malformed_header, text_lossy},
    diag::{DecodeError, DecodeWarning},
    timing::BeatClock,
};

const DEFAULT_BPM: f64 = 120.0;

pub(crate) fn decode(
    bytes: &[u8],
    resolver: &mut Resolver<'_>,
) -> Result<DecodeOutput, DecodeError> {
    let text = text_lossy(bytes);
    let mut warnings = Vec::new();

    let mut meta = ChartMeta::default();
    let mut initial_bpm = DEFAULT_BPM;
    let mut path_wav: Option<String> = None;
    let mut bpm_defs: BTreeMap<u16, f64> = BTreeMap::new();
    let mut wav_defs: BTreeMap<u16, String> = BTreeMap::new();
    let mut volume_defs: BTreeMap<u16, u8> = BTreeMap::new();

    let mut section_lengths: BTreeMap<u32, f64> = BTreeMap::new();
    let mut messages: Vec<(u32, String, String, usize)> = Vec::new();
    let mut saw_command = false;

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('#') else {
            continue;
        };
        saw_command = true;
        let mut warn = |reason: String| {
            warnings.push(DecodeWarning::MalformedRecord {
                context: format!("line {}", lineno + 1),
                reason,
            });
        };
        let (name, value) = match rest.split_once(':') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => match rest.split_once(char::is_whitespace) {
                Some((name, value)) => (name.trim(), value.trim()),
                None => (rest, ""),
            },
        };
        if let Some((measure, channel)) = message_head(name) {
            if channel == "02" {
                match value.parse::<f64>() {
                    Ok(len) if len > 0.0 && len.is_finite() => {
                        section_lengths.insert(measure, len);
                    }
                    _ => warn(format!("bad measure length {value:?}")),
                }
            } else {
                messages.push((measure, channel, value.to_owned(), lineno));
            }
            continue;
        }
        if name.eq_ignore_ascii_case("TITLE") {
            meta.title = value.to_owned();
        } else if name.eq_ignore_ascii_case("ARTIST") {
            meta.artist = value.to_owned();
        } else if name.eq_ignore_ascii_case("PATH_WAV") {
            path_wav = Some(value.trim_end_matches(['/', '\\']).to_owned());
        } else if name.eq_ignore_ascii_case("BPM") {
            match value.parse::<f64>() {
                Ok(bpm) if bpm > 0.0 && bpm.is_finite() => initial_bpm = bpm,
                _ => warn(format!("bad #BPM {value:?}")),
            }
        } else if let Some(id) = strip_id(name, "BPM") {
            match value.parse::<f64>() {
                Ok(bpm) if bpm > 0.0 && bpm.is_finite() => {
                    bpm_defs.insert(id, bpm);
                }
                _ => warn(format!("bad #BPMxx {value:?}")),
            }
        } else if let Some(id) = strip_id(name, "WAV") {
            if value.is_empty() {
                warn("empty #WAVxx definition".into());
            } else {
                wav_defs.insert(id, value.to_owned());
            }
        } else if let Some(id) = strip_id(name, "VOLUME") {
            match value.parse::<i64>() {
                Ok(v) => {
                    volume_defs.insert(id, v.clamp(0, 100) as u8);
                }
                Err(_) => warn(format!("bad #VOLUMExx {value:?}")),
            }
        }
        // Lighting, video and comment headers have no canonical counterpart.
    }

    if !saw_command {
        return Err(malformed_header("no command lines"));
    }

    // Chips declared outside the chart directory are resolver-checked once
    // per definition.
    if let Some(dir) = &path_wav {
        for name in wav_defs.values() {
            let joined = format!("{dir}/{name}");
            if resolver(&joined).is_none() {
                warnings.push(DecodeWarning::MissingCompanion { name: joined });
            }
        }
    }

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
    let mut chips: Vec<(u32, Ratio<i64>, u8, u16)> = Vec::new();

    for (measure, channel, body, lineno) in &messages {
        for (frac, obj) in objects(body, &mut warnings, *lineno) {
            let beat = beat_of(*measure, frac);
            match channel.as_str() {
                "03" => {
                    // Inline BPM object ids are hex byte values.
                    match u32::from_str_radix(&base36(obj), 16) {
                        Ok(bpm) if bpm > 0 => {
                            tempo_changes.push((beat, 60_000.0 / f64::from(bpm)));
                        }
                        _ => warnings.push(DecodeWarning::MalformedRecord {
                            context: format!("line {}", lineno + 1),
                            reason: format!("bad inline BPM {:?}", base36(obj)),
                        }),
                    }
                }
                "08" => match bpm_defs.get(&obj) {
                    Some(&bpm) => tempo_changes.push((beat, 60_000.0 / bpm)),
                    None => warnings.push(DecodeWarning::MalformedRecord {
                        context: format!("line {}", lineno + 1),
                        reason: format!("undefined #BPM{}", base36(obj)),
                    }),
                },
                drum if drum.starts_with('1') => {
                    if let Some(lane) = drum_lane(drum) {
                        chips.push((*measure, frac, lane, obj));
                    }
                }
                // BGM and ambience channels are not lane data.
                _ => {}
            }
        }
    }

    let initial_mpb = 60_000.0 / initial_bpm;
    let clock = BeatClock::new(0.0, initial_mpb, tempo_changes.clone(), Vec::new());

    let mut raw = RawChart::new(0, meta);
    raw.tempo.push(TempoPoint::tempo(0, initial_mpb));
    for &(beat, mpb) in &tempo_changes {
        raw.tempo.push(TempoPoint::tempo(clock.ms_at(beat) as i64, mpb));
    }

    chips.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    let mut max_lane = 0_u8;
    for (measure, frac, lane, obj) in chips {
        max_lane = max_lane.max(lane);
        let start_ms = clock.ms_at(beat_of(measure, frac)) as i64;
        raw.notes.push(PendingNote {
            lane,
            start: crate::assemble::NoteStart::At(start_ms),
            end_ms: None,
            sample: wav_defs.get(&obj).cloned().map(SampleRef::Name),
            volume: volume_defs.get(&obj).copied().unwrap_or(100),
        });
    }

    raw.key_count = if raw.notes.is_empty() { 10 } else { max_lane + 1 };
    let chart = assemble(raw, &mut warnings);
    Ok(DecodeOutput { chart, warnings })
}

/// `mmmcc` message head; `None` for plain headers.
fn message_head(name: &str) -> Option<(u32, String)> {
    if name.len() != 5 {
        return None;
    }
    let (measure, channel) = name.split_at(3);
    if !measure.bytes().all(|b| b.is_ascii_digit())
        || !channel.bytes().all(|b| b.is_ascii_alphanumeric())
    {
        return None;
    }
    Some((measure.parse().ok()?, channel.to_ascii_uppercase()))
}

fn objects(
    body: &str,
    warnings: &mut Vec<DecodeWarning>,
    lineno: usize,
) -> Vec<(Ratio<i64>, u16)> {
    let chars: Vec<char> = body.chars().filter(|c| !c.is_whitespace()).collect();
    if chars.len() % 2 != 0 {
        warnings.push(DecodeWarning::MalformedRecord {
            context: format!("line {}", lineno + 1),
            reason: "odd-length message body".into(),
        });
    }
    let count = (chars.len() / 2) as i64;
    let mut out = Vec::new();
    for i in 0..count {
        let pair: String = chars[i as usize * 2..i as usize * 2 + 2].iter().collect();
        if pair == "00" {
            continue;
        }
        match u16::from_str_radix(&pair, 36) {
            Ok(obj) => out.push((Ratio::new(i, count), obj)),
            Err(_) => warnings.push(DecodeWarning::MalformedRecord {
                context: format!("line {}", lineno + 1),
                reason: format!("bad object id {pair:?}"),
            }),
        }
    }
    out
}

/// Drum channels `11`..`1A` map to lanes 0..9.
fn drum_lane(channel: &str) -> Option<u8> {
    let key = channel.chars().nth(1)?;
    let value = key.to_digit(36)?;
    (1..=10).contains(&value).then(|| (value - 1) as u8)
}

fn base36(obj: u16) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    format!(
        "{}{}",
        DIGITS[usize::from(obj / 36) % 36] as char,
        DIGITS[usize::from(obj % 36)] as char
    )
}

fn strip_id(name: &str, prefix: &str) -> Option<u16> {
    let id = (name.len() == prefix.len() + 2
        && name[..prefix.len()].eq_ignore_ascii_case(prefix))
    .then(|| &name[prefix.len()..])?;
    u16::from_str_radix(id, 36).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_str(source: &str) -> Result<DecodeOutput, DecodeError> {
        decode(source.as_bytes(), &mut |_| None)
    }

    #[test]
    fn chips_land_on_the_grid_with_chip_volume() {
        let source = "#TITLE: Drums\n#BPM: 120\n\
                      #WAV01: kick.wav\n#VOLUME01: 70\n\
                      #00011: 0101\n#00013: 0001\n";
        let DecodeOutput { chart, warnings } = decode_str(source).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(chart.notes.len(), 3);
        assert_eq!(chart.notes[0].volume, 70);
        assert_eq!(
            chart.notes[0].sample,
            Some(SampleRef::Name("kick.wav".into()))
        );
        // Channels 11 and 13 are lanes 0 and 2.
        assert_eq!(chart.key_count, 3);
        let last = chart.notes.last().unwrap();
        assert_eq!((last.lane, last.start_ms), (2, 1000));
    }

    #[test]
    fn bpm_changes_move_later_chips() {
        let source = "#BPM: 120\n#BPM01: 60\n#00008: 01\n#00111: 01\n";
        let DecodeOutput { chart, .. } = decode_str(source).unwrap();
        // Measure 0 runs at 60 BPM, so measure 1 starts at 4000ms.
        assert_eq!(chart.notes[0].start_ms, 4000);
    }

    #[test]
    fn path_wav_checks_go_through_the_resolver() {
        let source = "#BPM: 120\n#PATH_WAV: Sounds\n#WAV01: kick.wav\n#00011: 01\n";
        let mut asked = Vec::new();
        let out = decode(source.as_bytes(), &mut |name: &str| {
            asked.push(name.to_owned());
            Some(Vec::new())
        })
        .unwrap();
        assert!(out.warnings.is_empty());
        assert_eq!(asked, vec!["Sounds/kick.wav".to_owned()]);

        let out = decode_str(source).unwrap();
        assert!(matches!(
            out.warnings.as_slice(),
            [DecodeWarning::MissingCompanion { .. }]
        ));
    }

    #[test]
    fn no_checks_without_path_wav() {
        let source = "#BPM: 120\n#WAV01: kick.wav\n#00011: 01\n";
        let out = decode_str(source).unwrap();
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn empty_input_is_malformed_header() {
        assert!(matches!(
            decode_str("; comment only\n").unwrap_err(),
            DecodeError::MalformedHeader(_)
        ));
    }
}
