//! Decoders for rhythm-game chart files from nine unrelated authoring
//! ecosystems, producing one canonical in-memory chart: an ordered note
//! stream plus a tempo map in absolute milliseconds.
//!
//! The pipeline is `detect` → one per-format decoder → chart assembler, and
//! the result is a [`Chart`] whose timing is queried exclusively through
//! [`timing::TempoMap`]. Decoding is best effort: unparseable records are
//! skipped and reported as [`DecodeWarning`]s beside the successful chart,
//! while structural failures abort with a [`DecodeError`].
//!
//! In detail, our policies are:
//!
//! - Decoding is a pure function of the input bytes (plus the injected
//!   companion-file resolver); there is no global state and no log sink.
//! - Malformed input never panics; it either warns or fails typed.
//! - The same bytes always produce the same note order and tempo map.
//! - Charts decode independently, so distinct charts may decode concurrently
//!   on distinct threads.
//!
//! ```
//! use std::path::Path;
//! use omnichart::{DecodeOutput, decode_chart};
//!
//! let source = "#TSC 1\nkeys\t4\ntitle\tExample\n\nnote\t1000\t0\n";
//! let DecodeOutput { chart, warnings } = decode_chart(Path::new("example.tsc"), source.as_bytes())?;
//! assert_eq!(chart.key_count, 4);
//! assert_eq!(chart.notes.len(), 1);
//! assert!(warnings.is_empty());
//! # Ok::<(), omnichart::DecodeError>(())
//! ```

use std::path::Path;

pub mod chart;
pub mod detect;
pub mod diag;
pub mod prelude;
pub mod timing;

pub(crate) mod assemble;
pub(crate) mod decode;

pub use chart::{Chart, ChartMeta, Note, SampleRef, TempoEffect, TempoPoint};
pub use detect::{FormatKind, SNIFF_LEN, detect};
pub use diag::{DecodeError, DecodeWarning};
pub use timing::TempoMap;

/// Companion-file lookup injected by the caller.
///
/// Formats with sibling files (keysound indexes and the like) receive their
/// bytes through this callback instead of scanning directories themselves,
/// keeping the core decoupled from any filesystem layout policy. Returning
/// `None` means the file is unavailable; decoders treat that as a warning at
/// most.
pub type Resolver<'r> = dyn FnMut(&str) -> Option<Vec<u8>> + 'r;

/// A successfully decoded chart plus everything non-fatal that happened on
/// the way.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DecodeOutput {
    /// The canonical chart.
    pub chart: Chart,
    /// Non-fatal events accumulated during decoding, in occurrence order.
    pub warnings: Vec<DecodeWarning>,
}

/// Detect the format of `bytes` and decode them into a canonical chart.
///
/// The path contributes only its extension; the bytes are the file contents.
/// Formats with companion files see them as unavailable; use
/// [`decode_chart_with`] to supply a resolver.
///
/// # Errors
///
/// [`DecodeError::UnrecognizedFormat`] when no decoder claims the input, or
/// whatever the selected decoder reports.
pub fn decode_chart(path: &Path, bytes: &[u8]) -> Result<DecodeOutput, DecodeError> {
    decode_chart_with(path, bytes, |_| None)
}

/// [`decode_chart`] with an injected companion-file resolver.
///
/// # Errors
///
/// Same as [`decode_chart`].
pub fn decode_chart_with(
    path: &Path,
    bytes: &[u8],
    mut resolver: impl FnMut(&str) -> Option<Vec<u8>>,
) -> Result<DecodeOutput, DecodeError> {
    let sniff = &bytes[..bytes.len().min(SNIFF_LEN)];
    let kind = detect(path, sniff).ok_or(DecodeError::UnrecognizedFormat)?;
    decode_as(kind, bytes, &mut resolver)
}

/// Decode `bytes` with a specific format's decoder, bypassing detection.
///
/// Callers that already know the format (e.g. after trying a companion index
/// file) can skip the sniffing step.
///
/// # Errors
///
/// Whatever the selected decoder reports.
pub fn decode_as(
    kind: FormatKind,
    bytes: &[u8],
    resolver: &mut Resolver<'_>,
) -> Result<DecodeOutput, DecodeError> {
    let mut output = (kind.decoder())(bytes, resolver)?;
    output.chart.meta.format = Some(kind);
    Ok(output)
}
