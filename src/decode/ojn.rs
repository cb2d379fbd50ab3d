//! Decoder for the o2jam binary note archive (`.ojn`).
//!
//! One file carries three difficulty sections behind a 300-byte little-endian
//! header; the hardest section with a nonzero note count is decoded. A
//! section is a run of packages `{ measure i32, channel i16, events i16 }`
//! followed by `events` four-byte cells; a cell's position inside its measure
//! is `index / events`, the decimal measure offset. Channel 0 changes the
//! measure length, channel 1 changes BPM, channels 2..=8 are the seven key
//! lanes, and anything higher is autoplay keysound data with no lane.
//!
//! Holds are marker-paired per lane: cell kind 2 opens, kind 3 closes.
//! Unmatched opens at end of section are dropped, like the keysound text
//! format and unlike the simfile decoder.

use std::collections::BTreeMap;

use crate::{
    DecodeOutput, Resolver,
    assemble::{NoteStart, OpenHold, PendingNote, RawChart, assemble},
    chart::{ChartMeta, SampleRef, TempoPoint},
    decode::{
        malformed_header,
        reader::{ByteReader, padded_string},
    },
    diag::{DecodeError, DecodeWarning},
    timing::BeatClock,
};

const HEADER_LEN: usize = 300;
const KEY_COUNT: u8 = 7;
/// Cells of kind 4 reference the alternate (OGG) sample bank.
const ALT_SAMPLE_BASE: u32 = 1000;
/// Measures beyond this are treated as corruption, not chart data.
const MAX_MEASURE: i32 = 9999;

struct Header {
    bpm: f64,
    note_count: [i32; 3],
    note_offset: [i32; 3],
    cover_offset: i32,
    title: String,
    artist: String,
    ojm_file: String,
}

pub(crate) fn decode(
    bytes: &[u8],
    _resolver: &mut Resolver<'_>,
) -> Result<DecodeOutput, DecodeError> {
    let header = parse_header(bytes)?;
    let mut warnings = Vec::new();

    // Hardest difficulty that actually has notes.
    let section = (0..3)
        .rev()
        .find(|&i| header.note_count[i] > 0)
        .ok_or_else(|| malformed_header("no difficulty section has notes"))?;
    let start = header.note_offset[section];
    let end = if section < 2 {
        header.note_offset[section + 1]
    } else {
        header.cover_offset
    };
    if start < HEADER_LEN as i32 || end < start || end as usize > bytes.len() {
        return Err(DecodeError::TruncatedData(format!(
            "note section {section} spans {start}..{end} in a {}-byte file",
            bytes.len()
        )));
    }

    let mut section_lengths: BTreeMap<i32, f64> = BTreeMap::new();
    let mut tempo_cells: Vec<(i32, i64, i64, f64)> = Vec::new();
    let mut note_cells: Vec<NoteCell> = Vec::new();

    let mut r = ByteReader::new(&bytes[start as usize..end as usize]);
    while r.remaining() >= 8 {
        let measure = r.i32()?;
        let channel = r.i16()?;
        let events = r.i16()?;
        if !(0..=MAX_MEASURE).contains(&measure) || events < 0 {
            warnings.push(DecodeWarning::MalformedRecord {
                context: format!("package at offset {}", start as usize + r.pos() - 8),
                reason: format!("implausible measure {measure} or event count {events}"),
            });
            break;
        }
        let events = events as i64;
        if r.remaining() < events as usize * 4 {
            warnings.push(DecodeWarning::MalformedRecord {
                context: format!("package at offset {}", start as usize + r.pos() - 8),
                reason: "cell data runs past the section end".into(),
            });
            break;
        }
        for index in 0..events {
            match channel {
                0 => {
                    let factor = r.f32()?;
                    if factor > 0.0 && factor.is_finite() {
                        section_lengths.insert(measure, f64::from(factor));
                    }
                }
                1 => {
                    let bpm = r.f32()?;
                    if bpm > 0.0 && bpm.is_finite() {
                        tempo_cells.push((measure, index, events, f64::from(bpm)));
                    }
                }
                2..=8 => {
                    let sample = r.i16()?;
                    let vol_pan = r.u8()?;
                    let kind = r.u8()?;
                    if sample <= 0 {
                        continue;
                    }
                    match kind {
                        0 | 2 | 3 | 4 => note_cells.push(NoteCell {
                            measure,
                            index,
                            events,
                            lane: (channel - 2) as u8,
                            sample: sample as u32 + if kind == 4 { ALT_SAMPLE_BASE } else { 0 },
                            volume: nibble_volume(vol_pan),
                            kind,
                        }),
                        _ => warnings.push(DecodeWarning::MalformedRecord {
                            context: format!("measure {measure} lane {}", channel - 2),
                            reason: format!("unknown cell kind {kind}"),
                        }),
                    }
                }
                // Autoplay keysounds and unused channels carry no lane data.
                _ => {
                    r.skip(4)?;
                }
            }
        }
    }

    // Beat grid with per-measure length factors.
    let max_measure = note_cells
        .iter()
        .map(|c| c.measure)
        .chain(tempo_cells.iter().map(|&(m, ..)| m))
        .max()
        .unwrap_or(0);
    let measure_len = |m: i32| section_lengths.get(&m).copied().unwrap_or(1.0);
    let mut beat_starts = vec![0.0_f64];
    for m in 0..=max_measure {
        let last = *beat_starts.last().unwrap_or(&0.0);
        beat_starts.push(last + 4.0 * measure_len(m));
    }
    let beat_of = |measure: i32, index: i64, events: i64| {
        beat_starts[measure as usize]
            + 4.0 * measure_len(measure) * (index as f64 / events as f64)
    };

    let tempo_changes: Vec<(f64, f64)> = tempo_cells
        .iter()
        .map(|&(m, i, n, bpm)| (beat_of(m, i, n), 60_000.0 / bpm))
        .collect();
    let initial_mpb = 60_000.0 / header.bpm;
    let clock = BeatClock::new(0.0, initial_mpb, tempo_changes.clone(), Vec::new());

    let meta = ChartMeta {
        title: header.title,
        artist: header.artist,
        audio: (!header.ojm_file.is_empty()).then_some(header.ojm_file),
        format: None,
    };
    let mut raw = RawChart::new(KEY_COUNT, meta);
    raw.tempo.push(TempoPoint::tempo(0, initial_mpb));
    for &(beat, mpb) in &tempo_changes {
        raw.tempo.push(TempoPoint::tempo(clock.ms_at(beat) as i64, mpb));
    }

    note_cells.sort_by(|a, b| {
        (a.measure, a.index * b.events, a.lane).cmp(&(b.measure, b.index * a.events, b.lane))
    });

    let mut open: [Option<(i64, u32, u8)>; KEY_COUNT as usize] = Default::default();
    for cell in &note_cells {
        let ms = clock.ms_at(beat_of(cell.measure, cell.index, cell.events)) as i64;
        let slot = usize::from(cell.lane);
        match cell.kind {
            2 => {
                if let Some((orphan_ms, ..)) = open[slot].replace((ms, cell.sample, cell.volume)) {
                    warnings.push(DecodeWarning::MalformedRecord {
                        context: format!("measure {}", cell.measure),
                        reason: format!(
                            "hold start in lane {} while the hold from {orphan_ms}ms is open",
                            cell.lane
                        ),
                    });
                }
            }
            3 => match open[slot].take() {
                Some((start_ms, sample, volume)) => raw.notes.push(PendingNote {
                    lane: cell.lane,
                    start: NoteStart::At(start_ms),
                    end_ms: Some(ms),
                    sample: Some(SampleRef::Id(sample)),
                    volume,
                }),
                None => warnings.push(DecodeWarning::UnmatchedHoldEnd { lane: cell.lane }),
            },
            _ => raw.notes.push(PendingNote {
                lane: cell.lane,
                start: NoteStart::At(ms),
                end_ms: None,
                sample: Some(SampleRef::Id(cell.sample)),
                volume: cell.volume,
            }),
        }
    }
    for (lane, slot) in open.into_iter().enumerate() {
        if let Some((start_ms, sample, volume)) = slot {
            raw.open_holds.push(OpenHold {
                lane: lane as u8,
                start_ms,
                sample: Some(SampleRef::Id(sample)),
                volume,
            });
        }
    }

    let chart = assemble(raw, &mut warnings);
    Ok(DecodeOutput { chart, warnings })
}

struct NoteCell {
    measure: i32,
    index: i64,
    events: i64,
    lane: u8,
    sample: u32,
    volume: u8,
    kind: u8,
}

/// High nibble is volume in fifteenths; zero means full volume.
fn nibble_volume(vol_pan: u8) -> u8 {
    let vol = (vol_pan >> 4) & 0x0f;
    if vol == 0 {
        100
    } else {
        (u16::from(vol) * 100 / 15) as u8
    }
}

fn parse_header(bytes: &[u8]) -> Result<Header, DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(malformed_header(format!(
            "{} bytes is too short for the 300-byte header",
            bytes.len()
        )));
    }
    let mut r = ByteReader::new(bytes);
    let _song_id = r.i32()?;
    r.tag(b"ojn\0")
        .map_err(|_| malformed_header("missing ojn magic"))?;
    let _encode_version = r.f32()?;
    let _genre = r.i32()?;
    let bpm = f64::from(r.f32()?);
    if !(bpm > 0.0 && bpm.is_finite()) {
        return Err(malformed_header(format!("bad header BPM {bpm}")));
    }
    r.skip(8)?; // level[4]
    r.skip(12)?; // event_count[3]
    let note_count = [r.i32()?, r.i32()?, r.i32()?];
    r.skip(12)?; // measure_count[3]
    r.skip(12)?; // package_count[3]
    r.skip(4)?; // old encode version / song id
    r.skip(20)?; // old genre
    r.skip(4)?; // cover art size
    r.skip(4)?; // old file version
    let title = padded_string(r.take(64)?);
    let artist = padded_string(r.take(32)?);
    let _noter = padded_string(r.take(32)?);
    let ojm_file = padded_string(r.take(32)?);
    r.skip(4)?; // cover size
    r.skip(12)?; // time[3]
    let note_offset = [r.i32()?, r.i32()?, r.i32()?];
    let cover_offset = r.i32()?;
    Ok(Header {
        bpm,
        note_count,
        note_offset,
        cover_offset,
        title,
        artist,
        ojm_file,
    })
}
