//! Format detection and the decoder registry.
//!
//! Detection inspects a sniff buffer (the first bytes of the file) and the
//! path extension, never the full file. Magic-byte signatures take precedence
//! over extensions, because a text and a binary ecosystem can share an
//! extension. Unrecognized input yields `None`; the top-level API maps that to
//! [`crate::DecodeError::UnrecognizedFormat`].

use std::path::Path;

use crate::{DecodeOutput, Resolver, decode, diag::DecodeError};

/// How many leading bytes [`detect`] needs at most.
pub const SNIFF_LEN: usize = 64;

/// A recognized source chart format.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FormatKind {
    /// Measure/column keysound text format (`.bms`/`.bme`/`.bml`/`.pms`).
    Bms,
    /// Channel-based drum tracker text format (`.dtx`).
    Dtx,
    /// JSON chart format (`.bmson`).
    #[cfg(feature = "bmson")]
    Bmson,
    /// Sectioned beatmap text format (`.osu`).
    Osu,
    /// Simfile text format (`.sm`/`.ssc`).
    Sm,
    /// o2jam binary note archive (`.ojn`).
    Ojn,
    /// Tick-indexed binary timeline of typed events (`.pt`).
    Pt,
    /// Float-offset binary note dump (`.ftb`).
    Ftb,
    /// Tab-separated interchange chart (`.tsc`).
    Tsc,
}

type DecodeFn = fn(&[u8], &mut Resolver<'_>) -> Result<DecodeOutput, DecodeError>;

/// The open decoder table: detector outcome to decoding function. Adding a
/// format is one new module plus one row here.
const REGISTRY: &[(FormatKind, DecodeFn)] = &[
    (FormatKind::Bms, decode::bms::decode),
    (FormatKind::Dtx, decode::dtx::decode),
    #[cfg(feature = "bmson")]
    (FormatKind::Bmson, decode::bmson::decode),
    (FormatKind::Osu, decode::osu::decode),
    (FormatKind::Sm, decode::sm::decode),
    (FormatKind::Ojn, decode::ojn::decode),
    (FormatKind::Pt, decode::pt::decode),
    (FormatKind::Ftb, decode::ftb::decode),
    (FormatKind::Tsc, decode::tsc::decode),
];

impl FormatKind {
    /// Short lowercase name, matching the conventional file extension.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bms => "bms",
            Self::Dtx => "dtx",
            #[cfg(feature = "bmson")]
            Self::Bmson => "bmson",
            Self::Osu => "osu",
            Self::Sm => "sm",
            Self::Ojn => "ojn",
            Self::Pt => "pt",
            Self::Ftb => "ftb",
            Self::Tsc => "tsc",
        }
    }

    pub(crate) fn decoder(self) -> DecodeFn {
        // The registry covers every variant; a miss is a defect, not input.
        REGISTRY
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|&(_, decode)| decode)
            .expect("decoder registry covers every FormatKind")
    }
}

impl std::fmt::Display for FormatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Select a decoder from a path and a sniff buffer of the file's first bytes.
///
/// `sniff` may be shorter than [`SNIFF_LEN`] (small files); magic checks that
/// need more bytes than provided simply fail over to the extension.
#[must_use]
pub fn detect(path: &Path, sniff: &[u8]) -> Option<FormatKind> {
    if let Some(kind) = detect_magic(sniff) {
        return Some(kind);
    }
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    detect_extension(&ext)
}

fn detect_magic(sniff: &[u8]) -> Option<FormatKind> {
    if sniff.len() >= 8 && &sniff[4..8] == b"ojn\0" {
        return Some(FormatKind::Ojn);
    }
    if sniff.starts_with(b"PTFF") {
        return Some(FormatKind::Pt);
    }
    if sniff.starts_with(b"FTB1") {
        return Some(FormatKind::Ftb);
    }
    if sniff.starts_with(b"#TSC") {
        return Some(FormatKind::Tsc);
    }
    // Text magic; tolerate a UTF-8 BOM.
    let text = sniff.strip_prefix(b"\xef\xbb\xbf").unwrap_or(sniff);
    if text.starts_with(b"osu file format v") {
        return Some(FormatKind::Osu);
    }
    None
}

fn detect_extension(ext: &str) -> Option<FormatKind> {
    match ext {
        "bms" | "bme" | "bml" | "pms" => Some(FormatKind::Bms),
        "dtx" => Some(FormatKind::Dtx),
        #[cfg(feature = "bmson")]
        "bmson" => Some(FormatKind::Bmson),
        "osu" => Some(FormatKind::Osu),
        "sm" | "ssc" => Some(FormatKind::Sm),
        "ojn" => Some(FormatKind::Ojn),
        "pt" => Some(FormatKind::Pt),
        "ftb" => Some(FormatKind::Ftb),
        "tsc" => Some(FormatKind::Tsc),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_beats_extension() {
        // An o2jam archive renamed to a text extension still decodes as ojn.
        let mut sniff = vec![0x2a, 0x00, 0x00, 0x00];
        sniff.extend_from_slice(b"ojn\0");
        assert_eq!(
            detect(Path::new("renamed.bms"), &sniff),
            Some(FormatKind::Ojn)
        );
    }

    #[test]
    fn extension_is_the_fallback() {
        assert_eq!(
            detect(Path::new("song.BME"), b"#TITLE x"),
            Some(FormatKind::Bms)
        );
        assert_eq!(detect(Path::new("drum.dtx"), b""), Some(FormatKind::Dtx));
        assert_eq!(detect(Path::new("steps.ssc"), b"#TITLE:x;"), Some(FormatKind::Sm));
    }

    #[test]
    fn osu_magic_with_bom() {
        let sniff = b"\xef\xbb\xbfosu file format v14";
        assert_eq!(detect(Path::new("map.txt"), sniff), Some(FormatKind::Osu));
    }

    #[test]
    fn unknown_input_yields_none() {
        assert_eq!(detect(Path::new("file.xyz"), b"garbage"), None);
        assert_eq!(detect(Path::new("noext"), b""), None);
    }
}
