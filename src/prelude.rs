//! Prelude re-exporting the whole public surface.
//!
//! `use omnichart::prelude::*;` brings in the chart model, the detector, the
//! timing engine, and the top-level decode entry points at once.

pub use crate::{
    DecodeOutput, Resolver, decode_as, decode_chart, decode_chart_with,
    chart::{Chart, ChartMeta, Note, SampleRef, TempoEffect, TempoPoint},
    detect::{FormatKind, SNIFF_LEN, detect},
    diag::{DecodeError, DecodeWarning},
    timing::{
        DEFAULT_MS_PER_BEAT, MAX_MS_PER_BEAT, MAX_SCROLL_FACTOR, MIN_MS_PER_BEAT,
        MIN_SCROLL_FACTOR, TempoMap,
    },
};
