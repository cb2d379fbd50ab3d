//! Error and warning taxonomy for chart decoding.
//!
//! Decoding is best effort: only the four [`DecodeError`] variants abort a
//! file. Everything recoverable becomes a [`DecodeWarning`] accumulated beside
//! the successful chart in [`crate::DecodeOutput`], so decoding stays a pure
//! function of its input bytes.

use thiserror::Error;

/// A fatal decoding failure. The input produced no chart.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DecodeError {
    /// No decoder recognizes the input's magic bytes or extension.
    #[error("no decoder recognizes this input")]
    UnrecognizedFormat,
    /// The file's header is missing, unreadable, or self-contradictory.
    #[error("malformed header: {0}")]
    MalformedHeader(String),
    /// The file ends before a structure it promised.
    #[error("truncated data: {0}")]
    TruncatedData(String),
    /// A recognized format family, but a game mode this crate does not map to
    /// lanes (e.g. an osu! taiko chart).
    #[error("unsupported variant: {0}")]
    UnsupportedVariant(String),
}

/// A non-fatal decoding event. Warnings never abort a file.
///
/// Serialization is one way only: warnings go out to logs and reports, they
/// are never read back.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DecodeWarning {
    /// A single record could not be parsed and was skipped.
    #[error("skipped malformed record at {context}: {reason}")]
    MalformedRecord {
        /// Where the record sits in the source (line, package, chunk).
        context: String,
        /// What went wrong with it.
        reason: String,
    },
    /// A hold-end marker appeared with no open hold in its lane.
    #[error("hold end marker in lane {lane} without an open hold")]
    UnmatchedHoldEnd {
        /// Lane of the stray marker.
        lane: u8,
    },
    /// A hold was still open at end of stream and the format's policy drops it.
    #[error("hold in lane {lane} opened at {start_ms}ms was never closed; dropped")]
    DroppedOpenHold {
        /// Lane of the dropped hold.
        lane: u8,
        /// Resolved start time of the dropped hold.
        start_ms: i64,
    },
    /// A hold was still open at end of stream and the format's policy closes
    /// it after a trailing duration.
    #[error("hold in lane {lane} opened at {start_ms}ms was never closed; closed {extend_ms}ms later")]
    ClosedOpenHold {
        /// Lane of the closed hold.
        lane: u8,
        /// Resolved start time of the hold.
        start_ms: i64,
        /// Trailing duration appended by the policy.
        extend_ms: i64,
    },
    /// A note addressed a lane outside the chart's key count and was dropped.
    #[error("note at {start_ms}ms targets lane {lane} outside the {key_count}-key layout; dropped")]
    LaneOutOfRange {
        /// Offending lane index.
        lane: u8,
        /// Start time of the dropped note.
        start_ms: i64,
        /// Declared key count of the chart.
        key_count: u8,
    },
    /// A hold ended at or before its start and was demoted to a tap.
    #[error("hold at {start_ms}ms in lane {lane} ends at or before its start; demoted to a tap")]
    DegenerateHold {
        /// Lane of the demoted hold.
        lane: u8,
        /// Start time of the demoted hold.
        start_ms: i64,
    },
    /// A numeric field fell outside its documented range and was clamped.
    #[error("{what} {value} clamped into [{min}, {max}]")]
    ValueClamped {
        /// Which quantity was clamped.
        what: &'static str,
        /// The raw out-of-range value.
        value: f64,
        /// Lower clamp bound.
        min: f64,
        /// Upper clamp bound.
        max: f64,
    },
    /// A whole block (e.g. an extra simfile difficulty) was skipped.
    #[error("skipped {what}: {reason}")]
    SkippedBlock {
        /// What kind of block was skipped.
        what: &'static str,
        /// Why it was skipped.
        reason: String,
    },
    /// A companion file the chart references could not be resolved.
    #[error("companion file {name} could not be resolved")]
    MissingCompanion {
        /// Basename handed to the resolver.
        name: String,
    },
}
