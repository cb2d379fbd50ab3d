//! The tempo map query engine and the shared beat clock.
//!
//! [`TempoMap`] answers the three timing questions every consumer needs:
//! effective tempo at an instant, scroll factor at an instant, and the scroll
//! distance integrated between two instants under a piecewise-constant rate.
//! [`BeatClock`] is the crate-internal walk that converts beat-domain
//! positions (measures, rows, ticks, pulses) into milliseconds while tracking
//! tempo changes and stops; every decoder that does not already have
//! millisecond coordinates goes through it instead of reimplementing the loop.

use crate::chart::{TempoEffect, TempoPoint};

/// Tempo assumed when a chart defines none: 120 BPM.
pub const DEFAULT_MS_PER_BEAT: f64 = 500.0;
/// Lower clamp for `ms_per_beat`, protecting downstream division.
pub const MIN_MS_PER_BEAT: f64 = 1.0;
/// Upper clamp for `ms_per_beat`.
pub const MAX_MS_PER_BEAT: f64 = 10_000_000.0;
/// Lower clamp for scroll factors; keeps integrals finite on hostile charts.
pub const MIN_SCROLL_FACTOR: f64 = 0.001;
/// Upper clamp for scroll factors.
pub const MAX_SCROLL_FACTOR: f64 = 100.0;

/// The finalized tempo map of one chart.
///
/// Internally two sorted breakpoint lists (tempo and scroll factor), because
/// the two effects are independent: a tempo change and a scroll change may
/// share a timestamp without conflict. Queries binary-search for the last
/// breakpoint at or before the instant and degrade to documented defaults on
/// an empty map, never to an error.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TempoMap {
    tempo: Vec<(i64, f64)>,
    scroll: Vec<(i64, f64)>,
}

impl TempoMap {
    /// Build a map from raw breakpoints.
    ///
    /// Points are stably sorted by time; duplicate timestamps resolve
    /// last-write-wins per effect kind. Values are clamped into the documented
    /// ranges as a final defensive pass.
    #[must_use]
    pub fn new(points: Vec<TempoPoint>) -> Self {
        let mut tempo = Vec::new();
        let mut scroll = Vec::new();
        for point in points {
            match point.effect {
                TempoEffect::Tempo { ms_per_beat } => {
                    let ms_per_beat = sanitize(
                        ms_per_beat,
                        MIN_MS_PER_BEAT,
                        MAX_MS_PER_BEAT,
                        DEFAULT_MS_PER_BEAT,
                    );
                    tempo.push((point.time_ms, ms_per_beat));
                }
                TempoEffect::ScrollFactor { factor } => {
                    let factor = sanitize(factor, MIN_SCROLL_FACTOR, MAX_SCROLL_FACTOR, 1.0);
                    scroll.push((point.time_ms, factor));
                }
            }
        }
        dedup_last_wins(&mut tempo);
        dedup_last_wins(&mut scroll);
        Self { tempo, scroll }
    }

    /// Total number of breakpoints of both kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tempo.len() + self.scroll.len()
    }

    /// Whether the map has no breakpoints at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tempo.is_empty() && self.scroll.is_empty()
    }

    /// Effective tempo at `at_ms` in milliseconds per beat.
    ///
    /// The last tempo breakpoint at or before `at_ms` wins; with none, the
    /// 120 BPM default applies. The result is always inside
    /// `[MIN_MS_PER_BEAT, MAX_MS_PER_BEAT]`.
    #[must_use]
    pub fn tempo_at(&self, at_ms: i64) -> f64 {
        last_at_or_before(&self.tempo, at_ms).unwrap_or(DEFAULT_MS_PER_BEAT)
    }

    /// Effective scroll factor at `at_ms`, default `1.0`.
    #[must_use]
    pub fn scroll_factor_at(&self, at_ms: i64) -> f64 {
        last_at_or_before(&self.scroll, at_ms).unwrap_or(1.0)
    }

    /// Scroll distance accumulated between `from_ms` and `to_ms`.
    ///
    /// The rate is piecewise constant: `speed * factor(t) / ms_per_beat(t)`,
    /// so distance is measured in speed-scaled beats. A reversed interval
    /// yields the negated integral, and splitting an interval at any midpoint
    /// sums to the direct integral within floating-point tolerance; the
    /// renderer depends on that additivity for drift-free scrolling.
    #[must_use]
    pub fn integrate(&self, from_ms: i64, to_ms: i64, speed: f64) -> f64 {
        if from_ms == to_ms {
            return 0.0;
        }
        if from_ms > to_ms {
            return -self.integrate(to_ms, from_ms, speed);
        }
        let mut distance = 0.0;
        let mut cursor = from_ms;
        let mut next_tempo = self.tempo.partition_point(|&(at, _)| at <= from_ms);
        let mut next_scroll = self.scroll.partition_point(|&(at, _)| at <= from_ms);
        loop {
            let tempo_at = self.tempo.get(next_tempo).map(|&(at, _)| at);
            let scroll_at = self.scroll.get(next_scroll).map(|&(at, _)| at);
            let Some(at) = merge_min(tempo_at, scroll_at) else {
                break;
            };
            if at >= to_ms {
                break;
            }
            if at > cursor {
                distance += self.rate_at(cursor, speed) * (at - cursor) as f64;
                cursor = at;
            }
            if tempo_at == Some(at) {
                next_tempo += 1;
            }
            if scroll_at == Some(at) {
                next_scroll += 1;
            }
        }
        distance + self.rate_at(cursor, speed) * (to_ms - cursor) as f64
    }

    fn rate_at(&self, at_ms: i64, speed: f64) -> f64 {
        speed * self.scroll_factor_at(at_ms) / self.tempo_at(at_ms)
    }
}

/// Clamp with a NaN escape hatch; `f64::clamp` would propagate the NaN.
fn sanitize(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

const fn merge_min(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(if x < y { x } else { y }),
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (None, None) => None,
    }
}

fn last_at_or_before(points: &[(i64, f64)], at_ms: i64) -> Option<f64> {
    let idx = points.partition_point(|&(at, _)| at <= at_ms);
    idx.checked_sub(1).map(|i| points[i].1)
}

/// Collapse equal timestamps so the later entry wins, preserving order.
fn dedup_last_wins(points: &mut Vec<(i64, f64)>) {
    points.sort_by_key(|&(at, _)| at);
    // sort_by_key is stable, so the last of an equal-time run is the last
    // written by the decoder.
    let mut write = 0;
    for read in 0..points.len() {
        if read + 1 < points.len() && points[read + 1].0 == points[read].0 {
            continue;
        }
        points[write] = points[read];
        write += 1;
    }
    points.truncate(write);
}

/// Converts beat positions to milliseconds under piecewise-constant tempo.
///
/// `segments` carries the pure tempo integral from beat zero; stop pauses are
/// added separately so a position exactly at a stop resolves to the pre-pause
/// instant, matching how the source formats schedule notes that share a
/// timestamp with a stop.
#[derive(Debug, Clone)]
pub(crate) struct BeatClock {
    origin_ms: f64,
    initial_ms_per_beat: f64,
    segments: Vec<ClockSegment>,
    stops: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, Copy)]
struct ClockSegment {
    beat: f64,
    at_ms: f64,
    ms_per_beat: f64,
}

impl BeatClock {
    /// Build a clock from tempo changes `(beat, ms_per_beat)` and stops
    /// `(beat, pause_ms)`. Beat zero maps to `origin_ms`. Non-positive tempo
    /// entries must be filtered by the caller beforehand.
    pub(crate) fn new(
        origin_ms: f64,
        initial_ms_per_beat: f64,
        mut changes: Vec<(f64, f64)>,
        mut stops: Vec<(f64, f64)>,
    ) -> Self {
        changes.sort_by(|a, b| a.0.total_cmp(&b.0));
        stops.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut segments: Vec<ClockSegment> = Vec::with_capacity(changes.len());
        let mut at_ms = origin_ms;
        let mut beat = 0.0_f64;
        let mut ms_per_beat = initial_ms_per_beat;
        for (change_beat, change_mpb) in changes {
            at_ms += (change_beat - beat) * ms_per_beat;
            beat = change_beat;
            ms_per_beat = change_mpb;
            // Same-beat runs collapse to the last write.
            if let Some(last) = segments.last_mut()
                && last.beat == beat
            {
                last.ms_per_beat = ms_per_beat;
            } else {
                segments.push(ClockSegment {
                    beat,
                    at_ms,
                    ms_per_beat,
                });
            }
        }

        Self {
            origin_ms,
            initial_ms_per_beat,
            segments,
            stops,
        }
    }

    /// Milliseconds at `beat`, including every stop strictly before it.
    pub(crate) fn ms_at(&self, beat: f64) -> f64 {
        let paused: f64 = self
            .stops
            .iter()
            .take_while(|&&(stop_beat, _)| stop_beat < beat)
            .map(|&(_, pause_ms)| pause_ms)
            .sum();
        self.raw_ms_at(beat) + paused
    }

    /// Tempo in effect at `beat`.
    pub(crate) fn ms_per_beat_at(&self, beat: f64) -> f64 {
        let idx = self.segments.partition_point(|seg| seg.beat <= beat);
        idx.checked_sub(1)
            .map_or(self.initial_ms_per_beat, |i| self.segments[i].ms_per_beat)
    }

    fn raw_ms_at(&self, beat: f64) -> f64 {
        let idx = self.segments.partition_point(|seg| seg.beat <= beat);
        match idx.checked_sub(1) {
            Some(i) => {
                let seg = self.segments[i];
                seg.at_ms + (beat - seg.beat) * seg.ms_per_beat
            }
            None => self.origin_ms + beat * self.initial_ms_per_beat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn empty_map_degrades_to_defaults() {
        let map = TempoMap::default();
        assert!(map.is_empty());
        assert!((map.tempo_at(0) - DEFAULT_MS_PER_BEAT).abs() < EPS);
        assert!((map.scroll_factor_at(12_345) - 1.0).abs() < EPS);
        // 1000 ms at 500 ms/beat and factor 1.0 is two speed-scaled beats.
        assert!((map.integrate(0, 1000, 1.0) - 2.0).abs() < EPS);
    }

    #[test]
    fn last_breakpoint_at_or_before_wins() {
        let map = TempoMap::new(vec![
            TempoPoint::tempo(0, 500.0),
            TempoPoint::tempo(1000, 250.0),
            TempoPoint::scroll(500, 2.0),
        ]);
        assert!((map.tempo_at(999) - 500.0).abs() < EPS);
        assert!((map.tempo_at(1000) - 250.0).abs() < EPS);
        assert!((map.scroll_factor_at(499) - 1.0).abs() < EPS);
        assert!((map.scroll_factor_at(500) - 2.0).abs() < EPS);
    }

    #[test]
    fn duplicate_timestamps_resolve_last_write_wins_per_kind() {
        let map = TempoMap::new(vec![
            TempoPoint::tempo(100, 400.0),
            TempoPoint::scroll(100, 3.0),
            TempoPoint::tempo(100, 600.0),
        ]);
        assert!((map.tempo_at(100) - 600.0).abs() < EPS);
        // The scroll point at the same instant is independent and survives.
        assert!((map.scroll_factor_at(100) - 3.0).abs() < EPS);
    }

    #[test]
    fn construction_clamps_hostile_values() {
        let map = TempoMap::new(vec![
            TempoPoint::tempo(0, -5.0),
            TempoPoint::scroll(0, 50_000.0),
            TempoPoint::scroll(10, 0.0),
        ]);
        assert!((map.tempo_at(0) - MIN_MS_PER_BEAT).abs() < EPS);
        assert!((map.scroll_factor_at(0) - MAX_SCROLL_FACTOR).abs() < EPS);
        assert!((map.scroll_factor_at(10) - MIN_SCROLL_FACTOR).abs() < EPS);
    }

    #[test]
    fn integrate_is_additive_across_breakpoints() {
        let map = TempoMap::new(vec![
            TempoPoint::tempo(0, 500.0),
            TempoPoint::tempo(750, 250.0),
            TempoPoint::scroll(300, 2.0),
            TempoPoint::scroll(1200, 0.5),
        ]);
        for (t1, t2, t3) in [(0, 750, 1500), (-100, 300, 301), (250, 750, 1200)] {
            let split = map.integrate(t1, t2, 1.0) + map.integrate(t2, t3, 1.0);
            let direct = map.integrate(t1, t3, 1.0);
            assert!(
                (split - direct).abs() < 1e-9,
                "split {split} != direct {direct} for ({t1},{t2},{t3})"
            );
        }
    }

    #[test]
    fn integrate_reversed_interval_negates() {
        let map = TempoMap::new(vec![
            TempoPoint::tempo(0, 500.0),
            TempoPoint::scroll(400, 3.0),
        ]);
        let forward = map.integrate(100, 900, 2.5);
        let backward = map.integrate(900, 100, 2.5);
        assert!((forward + backward).abs() < EPS);
    }

    #[test]
    fn beat_clock_tracks_tempo_changes() {
        // 120 BPM for two beats, then 240 BPM.
        let clock = BeatClock::new(0.0, 500.0, vec![(2.0, 250.0)], vec![]);
        assert!((clock.ms_at(0.0) - 0.0).abs() < EPS);
        assert!((clock.ms_at(2.0) - 1000.0).abs() < EPS);
        assert!((clock.ms_at(4.0) - 1500.0).abs() < EPS);
        assert!((clock.ms_per_beat_at(1.9) - 500.0).abs() < EPS);
        assert!((clock.ms_per_beat_at(2.0) - 250.0).abs() < EPS);
    }

    #[test]
    fn beat_clock_applies_stops_after_their_beat() {
        let clock = BeatClock::new(0.0, 500.0, vec![], vec![(2.0, 300.0)]);
        // The note sharing the stop's beat sounds before the pause.
        assert!((clock.ms_at(2.0) - 1000.0).abs() < EPS);
        assert!((clock.ms_at(2.5) - 1550.0).abs() < EPS);
    }

    #[test]
    fn beat_clock_respects_origin_shift() {
        let clock = BeatClock::new(-120.0, 500.0, vec![], vec![]);
        assert!((clock.ms_at(0.0) + 120.0).abs() < EPS);
        assert!((clock.ms_at(1.0) - 380.0).abs() < EPS);
    }
}
