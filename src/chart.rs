//! The canonical chart model.
//!
//! Every decoder in this crate produces the same in-memory shape: a [`Chart`]
//! holding an ordered note stream in absolute milliseconds, a finalized
//! [`crate::timing::TempoMap`], and passthrough metadata. Downstream consumers
//! (judging, scrolling, keysound playback) read only this model and never the
//! source format.

use crate::{detect::FormatKind, timing::TempoMap};

/// Reference to the keysound a note should trigger.
///
/// Source ecosystems address samples either by a numeric slot (binary formats)
/// or by file name (text formats). Resolution to actual audio bytes happens
/// outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SampleRef {
    /// Numeric sample slot, e.g. an o2jam sample id.
    Id(u32),
    /// Sample file name, e.g. a `#WAVxx` definition.
    Name(String),
}

/// One playable or visual-only event on the chart.
///
/// Fields are immutable once the assembler has sorted the stream; the `Chart`
/// owns its notes and hands them out read-only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Note {
    /// 0-based lane index, always less than the chart's key count.
    pub lane: u8,
    /// Absolute start time in milliseconds. Negative only for visual-only
    /// notes whose lead-in window starts before the audio.
    pub start_ms: i64,
    /// End time for hold notes. `None` for taps. Always greater than
    /// `start_ms` when present.
    pub end_ms: Option<i64>,
    /// Keysound to trigger, if the source format provides one.
    pub sample: Option<SampleRef>,
    /// Playback volume of the keysound, 0–100.
    pub volume: u8,
    /// `true` for notes that only drive a scroll-speed visual effect and must
    /// never be judged.
    pub visual_only: bool,
}

impl Note {
    /// Whether this note is a hold requiring sustained input.
    #[must_use]
    pub const fn is_long(&self) -> bool {
        self.end_ms.is_some()
    }

    /// Hold duration in milliseconds, `0` for taps.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        self.end_ms.map_or(0, |end| end - self.start_ms)
    }
}

/// The effect a tempo-map breakpoint applies from its time onward.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TempoEffect {
    /// Changes the underlying beat duration.
    Tempo {
        /// Milliseconds per beat, always positive after finalization.
        ms_per_beat: f64,
    },
    /// Changes the visual scroll factor without affecting musical tempo.
    ScrollFactor {
        /// Dimensionless multiplier applied to the scroll rate.
        factor: f64,
    },
}

/// One tempo-map breakpoint, effective from `time_ms` until the next point of
/// the same kind.
///
/// Fields are intentionally not public: consumers query timing exclusively
/// through [`crate::timing::TempoMap`], which keeps the representation free to
/// change.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TempoPoint {
    pub(crate) time_ms: i64,
    pub(crate) effect: TempoEffect,
}

impl TempoPoint {
    /// A tempo breakpoint: `ms_per_beat` milliseconds per beat from `time_ms`.
    #[must_use]
    pub const fn tempo(time_ms: i64, ms_per_beat: f64) -> Self {
        Self {
            time_ms,
            effect: TempoEffect::Tempo { ms_per_beat },
        }
    }

    /// A scroll-factor breakpoint effective from `time_ms`.
    #[must_use]
    pub const fn scroll(time_ms: i64, factor: f64) -> Self {
        Self {
            time_ms,
            effect: TempoEffect::ScrollFactor { factor },
        }
    }

    pub(crate) const fn time_ms(&self) -> i64 {
        self.time_ms
    }
}

/// Passthrough metadata not involved in timing or judging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChartMeta {
    /// Song title as written in the source file.
    pub title: String,
    /// Artist as written in the source file.
    pub artist: String,
    /// Backing audio file name, for formats that have a single one.
    pub audio: Option<String>,
    /// The source format the chart was decoded from.
    pub format: Option<FormatKind>,
}

/// The canonical decoded chart.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Chart {
    /// Number of lanes. Every note's `lane` is below this.
    pub key_count: u8,
    /// Notes sorted by `(start_ms, lane)`.
    pub notes: Vec<Note>,
    /// Finalized tempo map; all timing queries go through it.
    pub timing: TempoMap,
    /// Passthrough metadata.
    pub meta: ChartMeta,
}

impl Chart {
    /// Notes that take part in judging, excluding visual-only markers.
    pub fn judgeable_notes(&self) -> impl Iterator<Item = &Note> {
        self.notes.iter().filter(|note| !note.visual_only)
    }
}
