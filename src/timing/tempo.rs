use midly::{MetaMessage, Track, TrackEventKind};

use crate::events::DEFAULT_TEMPO_MICROSECONDS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempoChange {
    pub at_tick: u64,
    pub microseconds_per_beat: u32,
}

/// Collects every tempo message across all tracks, keyed by absolute tick.
///
/// The result is sorted by tick. Changes sharing a tick keep the order in
/// which they were encountered (track order, then event order).
pub fn build_tempo_map(tracks: &[Track<'_>]) -> Vec<TempoChange> {
    let mut changes = Vec::new();

    for track in tracks {
        let mut absolute_tick: u64 = 0;
        for event in track {
            absolute_tick += u64::from(event.delta.as_int());
            if let TrackEventKind::Meta(MetaMessage::Tempo(tempo)) = event.kind {
                changes.push(TempoChange {
                    at_tick: absolute_tick,
                    microseconds_per_beat: tempo.as_int(),
                });
            }
        }
    }

    changes.sort_by_key(|c| c.at_tick);
    changes
}

/// Milliseconds elapsed from tick 0 to `target_tick`.
///
/// Segments before the first change run at `default_tempo`. A change placed
/// exactly on `target_tick` does not affect the result, which keeps the
/// function continuous across breakpoints.
pub fn ticks_to_ms(
    target_tick: u64,
    ticks_per_beat: u32,
    tempo_map: &[TempoChange],
    default_tempo: u32,
) -> f64 {
    let ticks_per_beat = f64::from(ticks_per_beat.max(1));
    let mut elapsed_us = 0.0;
    let mut segment_start = 0u64;
    let mut tempo = default_tempo;

    for change in tempo_map {
        if change.at_tick >= target_tick {
            break;
        }
        let span = change.at_tick.saturating_sub(segment_start);
        elapsed_us += span as f64 * f64::from(tempo) / ticks_per_beat;
        segment_start = segment_start.max(change.at_tick);
        tempo = change.microseconds_per_beat;
    }

    let remaining = target_tick - segment_start;
    elapsed_us += remaining as f64 * f64::from(tempo) / ticks_per_beat;
    elapsed_us / 1000.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct TempoMap {
    changes: Vec<TempoChange>,
    ticks_per_beat: u32,
    default_tempo: u32,
    /// Set for timecode files, whose ticks are wall-clock time.
    ticks_per_second: Option<f64>,
}

impl TempoMap {
    pub fn new(changes: Vec<TempoChange>, ticks_per_beat: u32) -> Self {
        Self {
            changes,
            ticks_per_beat,
            default_tempo: DEFAULT_TEMPO_MICROSECONDS,
            ticks_per_second: None,
        }
    }

    /// A map that ignores tempo messages and runs at a fixed tick rate.
    pub fn fixed_rate(ticks_per_second: f64) -> Self {
        Self {
            changes: Vec::new(),
            ticks_per_beat: ticks_per_second.round().max(1.0) as u32,
            default_tempo: 1_000_000,
            ticks_per_second: Some(ticks_per_second),
        }
    }

    pub fn changes(&self) -> &[TempoChange] {
        &self.changes
    }

    pub fn ticks_per_beat(&self) -> u32 {
        self.ticks_per_beat
    }

    /// Tempo in effect at tick 0.
    pub fn initial_tempo(&self) -> u32 {
        self.changes
            .iter()
            .take_while(|c| c.at_tick == 0)
            .last()
            .map_or(self.default_tempo, |c| c.microseconds_per_beat)
    }

    pub fn ticks_to_ms(&self, tick: u64) -> f64 {
        match self.ticks_per_second {
            Some(rate) if rate > 0.0 => tick as f64 * 1000.0 / rate,
            _ => ticks_to_ms(tick, self.ticks_per_beat, &self.changes, self.default_tempo),
        }
    }
}
