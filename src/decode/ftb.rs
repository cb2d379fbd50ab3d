//! Decoder for the float-offset binary note dump (`.ftb`).
//!
//! Little-endian throughout. Offsets are f64 seconds, truncated to integer
//! milliseconds on storage. The format uses NaN as a field sentinel twice
//! over: a NaN end time marks a tap, and a NaN *start* time marks a fake
//! note, a visual-only marker whose start resolves to its end time minus a
//! fixed lead-in window.

use crate::{
    DecodeOutput, Resolver,
    assemble::{NoteStart, PendingNote, RawChart, assemble},
    chart::{ChartMeta, SampleRef, TempoPoint},
    decode::{malformed_header, reader::ByteReader},
    diag::{DecodeError, DecodeWarning},
};

const MAGIC: &[u8] = b"FTB1";

/// Window subtracted from a fake note's end time to place its start.
pub(crate) const FAKE_NOTE_LEAD_IN_MS: i64 = 10_000;

pub(crate) fn decode(
    bytes: &[u8],
    _resolver: &mut Resolver<'_>,
) -> Result<DecodeOutput, DecodeError> {
    let mut r = ByteReader::new(bytes);
    r.tag(MAGIC)
        .map_err(|_| malformed_header("missing FTB1 magic"))?;

    let key_count = r.u8().map_err(|_| malformed_header("missing key count"))?;
    if !(1..=18).contains(&key_count) {
        return Err(malformed_header(format!("bad key count {key_count}")));
    }
    let title = r
        .short_string()
        .map_err(|_| malformed_header("truncated title"))?;
    let artist = r
        .short_string()
        .map_err(|_| malformed_header("truncated artist"))?;

    let meta = ChartMeta {
        title,
        artist,
        audio: None,
        format: None,
    };
    let mut raw = RawChart::new(key_count, meta);
    raw.fake_lead_in_ms = FAKE_NOTE_LEAD_IN_MS;
    let mut warnings = Vec::new();

    let tempo_count = r.u32()?;
    for index in 0..tempo_count {
        let at_ms = r.f64()?;
        let ms_per_beat = r.f64()?;
        if !at_ms.is_finite() || !ms_per_beat.is_finite() || ms_per_beat <= 0.0 {
            warnings.push(DecodeWarning::MalformedRecord {
                context: format!("tempo entry {index}"),
                reason: format!("non-finite or non-positive entry ({at_ms}, {ms_per_beat})"),
            });
            continue;
        }
        raw.tempo.push(TempoPoint::tempo(at_ms as i64, ms_per_beat));
    }

    let scroll_count = r.u32()?;
    for index in 0..scroll_count {
        let at_ms = r.f64()?;
        let factor = r.f64()?;
        if !at_ms.is_finite() || !factor.is_finite() {
            warnings.push(DecodeWarning::MalformedRecord {
                context: format!("scroll entry {index}"),
                reason: format!("non-finite entry ({at_ms}, {factor})"),
            });
            continue;
        }
        raw.tempo.push(TempoPoint::scroll(at_ms as i64, factor));
    }

    let note_count = r.u32()?;
    for index in 0..note_count {
        let lane = r.u8()?;
        let start_s = r.f64()?;
        let end_s = r.f64()?;
        let sample = r.u16()?;
        let volume = r.u8()?;

        let start = if start_s.is_nan() {
            None
        } else if start_s.is_finite() {
            Some(to_ms(start_s))
        } else {
            warnings.push(DecodeWarning::MalformedRecord {
                context: format!("note {index}"),
                reason: format!("infinite start offset {start_s}"),
            });
            continue;
        };
        let end = if end_s.is_nan() {
            None
        } else if end_s.is_finite() {
            Some(to_ms(end_s))
        } else {
            warnings.push(DecodeWarning::MalformedRecord {
                context: format!("note {index}"),
                reason: format!("infinite end offset {end_s}"),
            });
            continue;
        };

        let (start, end_ms) = match (start, end) {
            // Both sentinels at once leaves nothing to anchor the note to.
            (None, None) => {
                warnings.push(DecodeWarning::MalformedRecord {
                    context: format!("note {index}"),
                    reason: "start and end are both sentinels".into(),
                });
                continue;
            }
            (None, Some(end_ms)) => (NoteStart::FakeLeadIn, Some(end_ms)),
            (Some(start_ms), end_ms) => (NoteStart::At(start_ms), end_ms),
        };

        raw.notes.push(PendingNote {
            lane,
            start,
            end_ms,
            sample: (sample != 0).then(|| SampleRef::Id(u32::from(sample))),
            volume: volume.min(100),
        });
    }

    let chart = assemble(raw, &mut warnings);
    Ok(DecodeOutput { chart, warnings })
}

/// Seconds to milliseconds, truncated toward zero like the source runtime.
fn to_ms(seconds: f64) -> i64 {
    (seconds * 1000.0).clamp(-8.0e18, 8.0e18) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-assembled fixture builder; field order mirrors the wire layout.
    struct Fixture(Vec<u8>);

    impl Fixture {
        fn new(key_count: u8) -> Self {
            let mut buf = Vec::from(MAGIC);
            buf.push(key_count);
            for field in ["Title", "Artist"] {
                buf.extend_from_slice(&(field.len() as u16).to_le_bytes());
                buf.extend_from_slice(field.as_bytes());
            }
            Self(buf)
        }

        fn tempo(mut self, entries: &[(f64, f64)]) -> Self {
            self.0.extend_from_slice(&(entries.len() as u32).to_le_bytes());
            for &(at, mpb) in entries {
                self.0.extend_from_slice(&at.to_le_bytes());
                self.0.extend_from_slice(&mpb.to_le_bytes());
            }
            self
        }

        fn scroll(mut self, entries: &[(f64, f64)]) -> Self {
            self.0.extend_from_slice(&(entries.len() as u32).to_le_bytes());
            for &(at, factor) in entries {
                self.0.extend_from_slice(&at.to_le_bytes());
                self.0.extend_from_slice(&factor.to_le_bytes());
            }
            self
        }

        fn notes(mut self, entries: &[(u8, f64, f64, u16, u8)]) -> Self {
            self.0.extend_from_slice(&(entries.len() as u32).to_le_bytes());
            for &(lane, start, end, sample, volume) in entries {
                self.0.push(lane);
                self.0.extend_from_slice(&start.to_le_bytes());
                self.0.extend_from_slice(&end.to_le_bytes());
                self.0.extend_from_slice(&sample.to_le_bytes());
                self.0.push(volume);
            }
            self
        }
    }

    fn run(fixture: Fixture) -> Result<DecodeOutput, DecodeError> {
        decode(&fixture.0, &mut |_| None)
    }

    #[test]
    fn decodes_taps_and_holds() {
        let out = run(Fixture::new(4)
            .tempo(&[(0.0, 500.0)])
            .scroll(&[])
            .notes(&[
                (0, 1.5, f64::NAN, 3, 90),
                (1, 2.0, 2.75, 0, 100),
            ]))
        .unwrap();
        assert!(out.warnings.is_empty());
        assert_eq!(out.chart.meta.title, "Title");
        let tap = &out.chart.notes[0];
        assert_eq!((tap.start_ms, tap.end_ms), (1500, None));
        assert_eq!(tap.sample, Some(SampleRef::Id(3)));
        let hold = &out.chart.notes[1];
        assert_eq!((hold.start_ms, hold.end_ms), (2000, Some(2750)));
        assert_eq!(hold.sample, None);
    }

    #[test]
    fn nan_start_makes_a_fake_note() {
        let out = run(Fixture::new(4)
            .tempo(&[])
            .scroll(&[])
            .notes(&[(2, f64::NAN, 5.0, 0, 100)]))
        .unwrap();
        let fake = &out.chart.notes[0];
        assert_eq!(fake.start_ms, 5000 - FAKE_NOTE_LEAD_IN_MS);
        assert_eq!(fake.end_ms, Some(5000));
        assert!(fake.visual_only);
    }

    #[test]
    fn double_sentinel_is_skipped_with_warning() {
        let out = run(Fixture::new(4)
            .tempo(&[])
            .scroll(&[])
            .notes(&[(0, f64::NAN, f64::NAN, 0, 100)]))
        .unwrap();
        assert!(out.chart.notes.is_empty());
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn truncated_note_table_is_a_hard_failure() {
        let mut fixture = Fixture::new(4).tempo(&[]).scroll(&[]);
        fixture.0.extend_from_slice(&5_u32.to_le_bytes());
        let err = run(fixture).unwrap_err();
        assert!(matches!(err, DecodeError::TruncatedData(_)));
    }

    #[test]
    fn bad_magic_is_malformed_header() {
        let err = decode(b"NOPE", &mut |_| None).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedHeader(_)));
    }
}
