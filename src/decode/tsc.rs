//! Decoder for the tab-separated interchange chart format (`.tsc`).
//!
//! The format is exporter-friendly: a `#TSC <version>` magic line, a header
//! block of `key<TAB>value` pairs terminated by a blank line, then one typed
//! record per line. Times are already absolute milliseconds, so this decoder
//! needs no beat clock at all.

use crate::{
    DecodeOutput, Resolver,
    assemble::{NoteStart, PendingNote, RawChart, assemble},
    chart::{ChartMeta, SampleRef, TempoPoint},
    decode::{malformed_header, text_lossy},
    diag::{DecodeError, DecodeWarning},
};

pub(crate) fn decode(
    bytes: &[u8],
    _resolver: &mut Resolver<'_>,
) -> Result<DecodeOutput, DecodeError> {
    let text = text_lossy(bytes);
    let mut lines = text.lines().enumerate();

    let (_, magic_line) = lines
        .next()
        .ok_or_else(|| malformed_header("empty file"))?;
    let version = magic_line
        .strip_prefix("#TSC")
        .ok_or_else(|| malformed_header("missing #TSC magic line"))?
        .trim();
    if !version.is_empty() && version != "1" {
        return Err(DecodeError::UnsupportedVariant(format!(
            "tsc version {version}"
        )));
    }

    let mut meta = ChartMeta::default();
    let mut key_count: Option<u8> = None;
    let mut warnings = Vec::new();

    for (lineno, line) in lines.by_ref() {
        if line.trim().is_empty() {
            break;
        }
        let Some((key, value)) = line.split_once('\t') else {
            warnings.push(DecodeWarning::MalformedRecord {
                context: format!("line {}", lineno + 1),
                reason: "header line without a tab separator".into(),
            });
            continue;
        };
        match key.trim() {
            "title" => meta.title = value.trim().to_owned(),
            "artist" => meta.artist = value.trim().to_owned(),
            "audio" => meta.audio = Some(value.trim().to_owned()),
            "keys" => match value.trim().parse::<u8>() {
                Ok(keys @ 1..=18) => key_count = Some(keys),
                _ => return Err(malformed_header(format!("bad key count {value:?}"))),
            },
            // Unknown header keys are reserved for future revisions.
            _ => {}
        }
    }
    let key_count = key_count.ok_or_else(|| malformed_header("missing keys header"))?;

    let mut raw = RawChart::new(key_count, meta);

    for (lineno, line) in lines {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let context = || format!("line {}", lineno + 1);
        let mut fields = line.split('\t');
        match fields.next().unwrap_or("") {
            "note" => match parse_note(fields) {
                Ok(note) => raw.notes.push(note),
                Err(reason) => warnings.push(DecodeWarning::MalformedRecord {
                    context: context(),
                    reason,
                }),
            },
            "tempo" => match parse_pair(fields) {
                Ok((at_ms, ms_per_beat)) if ms_per_beat > 0.0 => {
                    raw.tempo.push(TempoPoint::tempo(at_ms, ms_per_beat));
                }
                Ok((_, ms_per_beat)) => warnings.push(DecodeWarning::MalformedRecord {
                    context: context(),
                    reason: format!("non-positive ms per beat {ms_per_beat}"),
                }),
                Err(reason) => warnings.push(DecodeWarning::MalformedRecord {
                    context: context(),
                    reason,
                }),
            },
            "scroll" => match parse_pair(fields) {
                Ok((at_ms, factor)) => raw.tempo.push(TempoPoint::scroll(at_ms, factor)),
                Err(reason) => warnings.push(DecodeWarning::MalformedRecord {
                    context: context(),
                    reason,
                }),
            },
            tag => warnings.push(DecodeWarning::MalformedRecord {
                context: context(),
                reason: format!("unknown record tag {tag:?}"),
            }),
        }
    }

    let chart = assemble(raw, &mut warnings);
    Ok(DecodeOutput { chart, warnings })
}

fn parse_note<'a>(mut fields: impl Iterator<Item = &'a str>) -> Result<PendingNote, String> {
    let start_ms = parse_field::<i64>(fields.next(), "start")?;
    let lane = parse_field::<u8>(fields.next(), "lane")?;
    let end_ms = match fields.next().map(str::trim) {
        None | Some("") | Some("-") => None,
        Some(end) => {
            let end_ms = end
                .parse::<i64>()
                .map_err(|_| format!("bad end time {end:?}"))?;
            Some(end_ms)
        }
    };
    let sample = match fields.next().map(str::trim) {
        None | Some("") | Some("-") => None,
        Some(sample) => Some(
            sample
                .parse::<u32>()
                .map_or_else(|_| SampleRef::Name(sample.to_owned()), SampleRef::Id),
        ),
    };
    let volume = match fields.next().map(str::trim) {
        None | Some("") => 100,
        Some(volume) => volume
            .parse::<u8>()
            .ok()
            .filter(|&v| v <= 100)
            .ok_or_else(|| format!("bad volume {volume:?}"))?,
    };
    Ok(PendingNote {
        lane,
        start: NoteStart::At(start_ms),
        end_ms,
        sample,
        volume,
    })
}

fn parse_pair<'a>(mut fields: impl Iterator<Item = &'a str>) -> Result<(i64, f64), String> {
    let at_ms = parse_field::<i64>(fields.next(), "time")?;
    let value = parse_field::<f64>(fields.next(), "value")?;
    if value.is_finite() {
        Ok((at_ms, value))
    } else {
        Err(format!("non-finite value {value}"))
    }
}

fn parse_field<T: std::str::FromStr>(field: Option<&str>, what: &str) -> Result<T, String> {
    let field = field.map(str::trim).filter(|f| !f.is_empty());
    let field = field.ok_or_else(|| format!("missing {what} field"))?;
    field.parse().map_err(|_| format!("bad {what} field {field:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_str(source: &str) -> Result<DecodeOutput, DecodeError> {
        decode(source.as_bytes(), &mut |_| None)
    }

    #[test]
    fn decodes_notes_and_timing_records() {
        let source = "#TSC 1\n\
                      title\tTest\n\
                      artist\tSomeone\n\
                      keys\t6\n\
                      \n\
                      tempo\t0\t500\n\
                      scroll\t1000\t2.0\n\
                      note\t250\t3\n\
                      note\t500\t0\t900\tkick.wav\t80\n";
        let DecodeOutput { chart, warnings } = decode_str(source).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(chart.key_count, 6);
        assert_eq!(chart.notes.len(), 2);
        assert_eq!(chart.notes[0].start_ms, 250);
        let hold = &chart.notes[1];
        assert_eq!(hold.end_ms, Some(900));
        assert_eq!(hold.sample, Some(SampleRef::Name("kick.wav".into())));
        assert_eq!(hold.volume, 80);
        assert!((chart.timing.scroll_factor_at(1000) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn malformed_records_skip_with_warnings() {
        let source = "#TSC 1\nkeys\t4\n\n\
                      note\tabc\t0\n\
                      wibble\t0\t0\n\
                      note\t100\t1\n";
        let DecodeOutput { chart, warnings } = decode_str(source).unwrap();
        assert_eq!(chart.notes.len(), 1);
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn missing_keys_is_a_hard_failure() {
        let err = decode_str("#TSC 1\ntitle\tx\n\n").unwrap_err();
        assert!(matches!(err, DecodeError::MalformedHeader(_)));
    }

    #[test]
    fn unknown_version_is_unsupported() {
        let err = decode_str("#TSC 9\nkeys\t4\n\n").unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedVariant(_)));
    }

    #[test]
    fn numeric_samples_become_ids() {
        let source = "#TSC 1\nkeys\t4\n\nnote\t0\t0\t-\t17\n";
        let DecodeOutput { chart, .. } = decode_str(source).unwrap();
        assert_eq!(chart.notes[0].sample, Some(SampleRef::Id(17)));
    }
}
