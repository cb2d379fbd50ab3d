//! Per-format decoders.
//!
//! Each submodule is an independent leaf conforming to one contract:
//! `decode(bytes, resolver) -> Result<DecodeOutput, DecodeError>`. Decoders
//! depend only on the canonical model, the tempo machinery, and the assembler;
//! none knows another exists, so each is replaceable on its own.

pub(crate) mod reader;

pub(crate) mod bms;
#[cfg(feature = "bmson")]
pub(crate) mod bmson;
pub(crate) mod dtx;
pub(crate) mod ftb;
pub(crate) mod ojn;
pub(crate) mod osu;
pub(crate) mod pt;
pub(crate) mod sm;
pub(crate) mod tsc;

use crate::diag::DecodeError;

/// Decode the input as UTF-8, lossily.
///
/// Legacy text charts are often in platform encodings; titles degrade to
/// replacement characters rather than failing the whole decode.
pub(crate) fn text_lossy(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Shorthand for the hard header failure every decoder needs.
pub(crate) fn malformed_header(what: impl Into<String>) -> DecodeError {
    DecodeError::MalformedHeader(what.into())
}
