//! The chart assembler: raw decoder output to a finalized [`Chart`].
//!
//! Every decoder ends here. The assembler owns the cross-format invariants so
//! the decoders only have to get their own format right: stable note order,
//! lane range, hold sanity, the defensive tempo clamps, still-open hold
//! resolution, and fake-note start substitution.

use itertools::Itertools;

use crate::{
    chart::{Chart, ChartMeta, Note, SampleRef, TempoPoint},
    diag::DecodeWarning,
    timing::{
        MAX_MS_PER_BEAT, MAX_SCROLL_FACTOR, MIN_MS_PER_BEAT, MIN_SCROLL_FACTOR, TempoMap,
    },
};

/// Start time of a note still waiting for assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NoteStart {
    /// Resolved absolute milliseconds.
    At(i64),
    /// Fake-note sentinel: the real start is `end - lead_in`, computed after
    /// every other note is time-resolved.
    FakeLeadIn,
}

/// A decoded note before assembly.
#[derive(Debug, Clone)]
pub(crate) struct PendingNote {
    pub lane: u8,
    pub start: NoteStart,
    pub end_ms: Option<i64>,
    pub sample: Option<SampleRef>,
    pub volume: u8,
}

impl PendingNote {
    /// A tap with no keysound, the simplest possible note.
    pub(crate) const fn tap(lane: u8, start_ms: i64) -> Self {
        Self {
            lane,
            start: NoteStart::At(start_ms),
            end_ms: None,
            sample: None,
            volume: 100,
        }
    }
}

/// A hold whose end never arrived before end of stream.
#[derive(Debug, Clone)]
pub(crate) struct OpenHold {
    pub lane: u8,
    pub start_ms: i64,
    pub sample: Option<SampleRef>,
    pub volume: u8,
}

/// What to do with holds still open at end of stream. A deliberate per-format
/// choice, not a global rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpenHoldPolicy {
    /// Drop the open hold with a warning.
    Drop,
    /// Close it this many milliseconds after its start, with a warning.
    CloseAfterMs(i64),
}

/// Everything a decoder hands to [`assemble`].
#[derive(Debug, Clone)]
pub(crate) struct RawChart {
    pub key_count: u8,
    pub meta: ChartMeta,
    pub notes: Vec<PendingNote>,
    pub open_holds: Vec<OpenHold>,
    pub tempo: Vec<TempoPoint>,
    pub open_hold_policy: OpenHoldPolicy,
    /// Lead-in window subtracted from a fake note's end time.
    pub fake_lead_in_ms: i64,
}

impl RawChart {
    pub(crate) fn new(key_count: u8, meta: ChartMeta) -> Self {
        Self {
            key_count,
            meta,
            notes: Vec::new(),
            open_holds: Vec::new(),
            tempo: Vec::new(),
            open_hold_policy: OpenHoldPolicy::Drop,
            fake_lead_in_ms: 0,
        }
    }
}

/// Finalize a decoded chart.
pub(crate) fn assemble(raw: RawChart, warnings: &mut Vec<DecodeWarning>) -> Chart {
    let RawChart {
        key_count,
        meta,
        notes: pending,
        open_holds,
        tempo,
        open_hold_policy,
        fake_lead_in_ms,
    } = raw;

    let mut notes: Vec<Note> = Vec::with_capacity(pending.len() + open_holds.len());

    for note in pending {
        let start_ms = match note.start {
            NoteStart::At(at) => at,
            NoteStart::FakeLeadIn => {
                // Lead-in windows are computed against final end times, which
                // are already absolute by this point.
                let Some(end_ms) = note.end_ms else {
                    warnings.push(DecodeWarning::MalformedRecord {
                        context: "fake note".into(),
                        reason: "no end time to derive the lead-in from".into(),
                    });
                    continue;
                };
                notes.push(Note {
                    lane: note.lane,
                    start_ms: end_ms - fake_lead_in_ms,
                    end_ms: Some(end_ms),
                    sample: note.sample,
                    volume: note.volume,
                    visual_only: true,
                });
                continue;
            }
        };
        notes.push(Note {
            lane: note.lane,
            start_ms,
            end_ms: note.end_ms,
            sample: note.sample,
            volume: note.volume,
            visual_only: false,
        });
    }

    for open in open_holds {
        match open_hold_policy {
            OpenHoldPolicy::Drop => {
                warnings.push(DecodeWarning::DroppedOpenHold {
                    lane: open.lane,
                    start_ms: open.start_ms,
                });
            }
            OpenHoldPolicy::CloseAfterMs(extend_ms) => {
                warnings.push(DecodeWarning::ClosedOpenHold {
                    lane: open.lane,
                    start_ms: open.start_ms,
                    extend_ms,
                });
                notes.push(Note {
                    lane: open.lane,
                    start_ms: open.start_ms,
                    end_ms: Some(open.start_ms + extend_ms.max(1)),
                    sample: open.sample,
                    volume: open.volume,
                    visual_only: false,
                });
            }
        }
    }

    // Lane range and hold sanity, then the deterministic order every consumer
    // (including replay hashing) relies on.
    let mut notes: Vec<Note> = notes
        .into_iter()
        .filter_map(|mut note| {
            if note.lane >= key_count {
                warnings.push(DecodeWarning::LaneOutOfRange {
                    lane: note.lane,
                    start_ms: note.start_ms,
                    key_count,
                });
                return None;
            }
            if let Some(end_ms) = note.end_ms
                && end_ms <= note.start_ms
                && !note.visual_only
            {
                warnings.push(DecodeWarning::DegenerateHold {
                    lane: note.lane,
                    start_ms: note.start_ms,
                });
                note.end_ms = None;
            }
            Some(note)
        })
        .collect();
    notes.sort_by_key(|note| (note.start_ms, note.lane));

    let timing = TempoMap::new(clamp_tempo_points(tempo, warnings));

    Chart {
        key_count,
        notes,
        timing,
        meta,
    }
}

/// Defense in depth: clamp every tempo point regardless of what the decoder
/// already enforced, warning per offending point.
fn clamp_tempo_points(
    points: Vec<TempoPoint>,
    warnings: &mut Vec<DecodeWarning>,
) -> Vec<TempoPoint> {
    points
        .into_iter()
        .map(|point| match point.effect {
            crate::chart::TempoEffect::Tempo { ms_per_beat } => {
                let clamped = if ms_per_beat.is_finite() {
                    ms_per_beat.clamp(MIN_MS_PER_BEAT, MAX_MS_PER_BEAT)
                } else {
                    MIN_MS_PER_BEAT
                };
                if clamped.to_bits() != ms_per_beat.to_bits() {
                    warnings.push(DecodeWarning::ValueClamped {
                        what: "ms per beat",
                        value: ms_per_beat,
                        min: MIN_MS_PER_BEAT,
                        max: MAX_MS_PER_BEAT,
                    });
                }
                TempoPoint::tempo(point.time_ms(), clamped)
            }
            crate::chart::TempoEffect::ScrollFactor { factor } => {
                let clamped = if factor.is_finite() {
                    factor.clamp(MIN_SCROLL_FACTOR, MAX_SCROLL_FACTOR)
                } else {
                    MIN_SCROLL_FACTOR
                };
                if clamped.to_bits() != factor.to_bits() {
                    warnings.push(DecodeWarning::ValueClamped {
                        what: "scroll factor",
                        value: factor,
                        min: MIN_SCROLL_FACTOR,
                        max: MAX_SCROLL_FACTOR,
                    });
                }
                TempoPoint::scroll(point.time_ms(), clamped)
            }
        })
        .collect_vec()
}
