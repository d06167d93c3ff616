use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use midly::{MetaMessage, MidiMessage, Smf, Timing, Track, TrackEventKind};
use tracing::{debug, info, warn};

use crate::config::ParserConfig;
use crate::error::ParseError;
use crate::events::{ChordNote, Metadata, NoteEvent, tempo_to_bpm};
use crate::timing::{TempoMap, build_tempo_map};

#[derive(Debug, Clone)]
pub struct ParsedSong {
    pub events: Vec<NoteEvent>,
    pub metadata: Metadata,
    /// Set when the source could not be read and the canned run was used.
    pub is_fallback: bool,
}

/// Bookkeeping for a note-on still waiting for its note-off.
#[derive(Debug, Clone, Copy)]
struct RawNoteSpan {
    velocity: u8,
    start_tick: u64,
}

#[derive(Debug, Clone, Copy)]
struct CompletedNote {
    note: u8,
    velocity: u8,
    start_ms: f64,
    duration_ms: f64,
}

#[derive(Debug, Clone, Default)]
pub struct NoteEventParser {
    config: ParserConfig,
}

impl NoteEventParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    /// Never fails: unreadable sources yield [`fallback_song`].
    pub fn parse_file(&self, path: &Path) -> ParsedSong {
        match self.try_parse_file(path) {
            Ok(song) => song,
            Err(e) => {
                warn!(path = %path.display(), "using fallback sequence: {e}");
                fallback_song()
            }
        }
    }

    pub fn try_parse_file(&self, path: &Path) -> Result<ParsedSong, ParseError> {
        if path.as_os_str().is_empty() {
            return Err(ParseError::EmptyPath);
        }
        let bytes = fs::read(path)?;
        info!(path = %path.display(), "parsing MIDI file");
        self.parse_bytes(&bytes)
    }

    pub fn parse_bytes(&self, bytes: &[u8]) -> Result<ParsedSong, ParseError> {
        let smf = Smf::parse(bytes)?;

        let tempo = match smf.header.timing {
            Timing::Metrical(ticks_per_beat) => TempoMap::new(
                build_tempo_map(&smf.tracks),
                u32::from(ticks_per_beat.as_int()),
            ),
            Timing::Timecode(fps, subframes) => {
                TempoMap::fixed_rate(f64::from(fps.as_f32()) * f64::from(subframes))
            }
        };
        if !tempo.changes().is_empty() {
            debug!(changes = tempo.changes().len(), "tempo map built");
        }

        let notes = collect_notes(&smf.tracks, &tempo);
        let events = group_chords(&notes);
        let metadata = extract_metadata(&smf.tracks, &tempo);
        log_statistics(&events, &notes);

        let events = match self.config.max_events {
            Some(ceiling) if events.len() > ceiling.max(2) => {
                let before = events.len();
                let kept = downsample(events, ceiling);
                info!(before, after = kept.len(), "event list down-sampled");
                kept
            }
            _ => events,
        };

        info!(
            events = events.len(),
            tracks = metadata.track_count,
            bpm = metadata.bpm,
            duration_ms = metadata.total_duration_ms,
            "MIDI parsed"
        );
        Ok(ParsedSong {
            events,
            metadata,
            is_fallback: false,
        })
    }
}

/// Pairs note-ons with note-offs per track. Spans left open at the end of a
/// track produce nothing.
fn collect_notes(tracks: &[Track<'_>], tempo: &TempoMap) -> Vec<CompletedNote> {
    let mut completed = Vec::new();

    for (index, track) in tracks.iter().enumerate() {
        let mut active: HashMap<u8, RawNoteSpan> = HashMap::new();
        let mut tick: u64 = 0;
        let mut opened = 0usize;

        for event in track {
            tick += u64::from(event.delta.as_int());
            let TrackEventKind::Midi { message, .. } = event.kind else {
                continue;
            };

            match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                    active.insert(
                        key.as_int(),
                        RawNoteSpan {
                            velocity: vel.as_int(),
                            start_tick: tick,
                        },
                    );
                    opened += 1;
                }
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                    if let Some(span) = active.remove(&key.as_int()) {
                        let start_ms = tempo.ticks_to_ms(span.start_tick);
                        let end_ms = tempo.ticks_to_ms(tick);
                        completed.push(CompletedNote {
                            note: key.as_int(),
                            velocity: span.velocity,
                            start_ms,
                            duration_ms: (end_ms - start_ms).max(0.0),
                        });
                    }
                }
                _ => {}
            }
        }

        if opened > 0 {
            debug!(track = index, notes = opened, "track scanned");
        }
        if !active.is_empty() {
            debug!(track = index, open = active.len(), "unterminated note-ons dropped");
        }
    }

    completed
}

/// One event per distinct millisecond, first occurrence of a note number wins.
fn group_chords(notes: &[CompletedNote]) -> Vec<NoteEvent> {
    let mut by_time: BTreeMap<u64, NoteEvent> = BTreeMap::new();
    let mut merged = 0usize;

    for completed in notes {
        let timestamp_ms = completed.start_ms as u64;
        let event = by_time
            .entry(timestamp_ms)
            .or_insert_with(|| NoteEvent::new(timestamp_ms, []));
        if !event.push(ChordNote::new(completed.note, completed.velocity)) {
            merged += 1;
        }
    }

    if merged > 0 {
        debug!(merged, "duplicate notes at the same timestamp dropped");
    }
    by_time.into_values().collect()
}

/// Keeps at most `ceiling` events picked with a fixed stride.
///
/// The final slot always holds the original last event so the kept list spans
/// the same time range as the input.
pub fn downsample(events: Vec<NoteEvent>, ceiling: usize) -> Vec<NoteEvent> {
    let ceiling = ceiling.max(2);
    let total = events.len();
    if total <= ceiling {
        return events;
    }

    let stride = total / ceiling;
    let last = events[total - 1].clone();
    let mut kept: Vec<NoteEvent> = events.into_iter().step_by(stride).take(ceiling).collect();
    if let Some(slot) = kept.last_mut() {
        *slot = last;
    }
    kept
}

fn extract_metadata(tracks: &[Track<'_>], tempo: &TempoMap) -> Metadata {
    let default_tempo = tempo.initial_tempo();
    let mut metadata = Metadata {
        ticks_per_beat: tempo.ticks_per_beat(),
        default_tempo_microseconds: default_tempo,
        bpm: tempo_to_bpm(default_tempo),
        track_count: tracks.len() as u32,
        track_names: tracks.iter().map(track_name).collect(),
        ..Metadata::default()
    };

    if let Some(first) = tracks.first() {
        let mut time_signature = None;
        let mut key_signature = None;
        for event in first {
            match event.kind {
                TrackEventKind::Meta(MetaMessage::TimeSignature(numerator, denominator_pow, _, _)) => {
                    time_signature.get_or_insert((numerator, 1u8 << denominator_pow.min(7)));
                }
                TrackEventKind::Meta(MetaMessage::KeySignature(sharps, minor)) => {
                    key_signature.get_or_insert_with(|| key_name(sharps, minor));
                }
                _ => {}
            }
        }
        if let Some(time_signature) = time_signature {
            metadata.time_signature = time_signature;
        }
        if let Some(key_signature) = key_signature {
            metadata.key_signature = key_signature;
        }
    }

    let last_tick = tracks
        .iter()
        .map(|track| {
            track
                .iter()
                .map(|event| u64::from(event.delta.as_int()))
                .sum::<u64>()
        })
        .max()
        .unwrap_or(0);
    metadata.total_duration_ms = tempo.ticks_to_ms(last_tick).round() as u64;

    metadata
}

fn track_name(track: &Track<'_>) -> String {
    track
        .iter()
        .find_map(|event| match event.kind {
            TrackEventKind::Meta(MetaMessage::TrackName(name)) => {
                Some(String::from_utf8_lossy(name).trim().to_string())
            }
            _ => None,
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "Unnamed".to_string())
}

/// Key name from a key-signature meta event, e.g. `Bb` or `F#m`.
pub fn key_name(sharps: i8, minor: bool) -> String {
    const MAJOR: [&str; 15] = [
        "Cb", "Gb", "Db", "Ab", "Eb", "Bb", "F", "C", "G", "D", "A", "E", "B", "F#", "C#",
    ];
    const MINOR: [&str; 15] = [
        "Ab", "Eb", "Bb", "F", "C", "G", "D", "A", "E", "B", "F#", "C#", "G#", "D#", "A#",
    ];

    let Some(index) = usize::try_from(i16::from(sharps) + 7)
        .ok()
        .filter(|i| *i < MAJOR.len())
    else {
        return "C".to_string();
    };
    if minor {
        format!("{}m", MINOR[index])
    } else {
        MAJOR[index].to_string()
    }
}

fn log_statistics(events: &[NoteEvent], notes: &[CompletedNote]) {
    let (Some(first), Some(last)) = (events.first(), events.last()) else {
        debug!("no complete notes found");
        return;
    };
    let distinct: BTreeSet<u8> = events
        .iter()
        .flat_map(|e| e.notes().iter().map(|n| n.note))
        .collect();
    let longest_ms = notes.iter().map(|n| n.duration_ms).fold(0.0, f64::max);

    debug!(
        events = events.len(),
        distinct_notes = distinct.len(),
        lowest = distinct.first().copied(),
        highest = distinct.last().copied(),
        first_ms = first.timestamp_ms,
        last_ms = last.timestamp_ms,
        longest_ms,
        "note statistics"
    );
}

/// Ascending C major run used when no file can be read.
pub fn fallback_song() -> ParsedSong {
    const RUN: [(u64, u8, u8); 8] = [
        (0, 60, 80),
        (500, 62, 70),
        (1000, 64, 90),
        (1500, 65, 60),
        (2000, 67, 85),
        (2500, 69, 75),
        (3000, 71, 95),
        (3500, 72, 100),
    ];

    ParsedSong {
        events: RUN
            .iter()
            .map(|&(timestamp_ms, note, velocity)| {
                NoteEvent::new(timestamp_ms, [ChordNote::new(note, velocity)])
            })
            .collect(),
        metadata: Metadata {
            total_duration_ms: 4000,
            ..Metadata::default()
        },
        is_fallback: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use midly::Fps;

    use crate::midi::testing::{TrackBuilder, smf, smf_timecode};

    fn parse(bytes: &[u8]) -> ParsedSong {
        NoteEventParser::default().parse_bytes(bytes).unwrap()
    }

    fn shape(events: &[NoteEvent]) -> Vec<(u64, Vec<(u8, u8)>)> {
        events
            .iter()
            .map(|e| {
                (
                    e.timestamp_ms,
                    e.notes().iter().map(|n| (n.note, n.velocity)).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn groups_simultaneous_notes_into_chords() {
        let track = TrackBuilder::new()
            .note_on(0, 60, 80)
            .note_off(240, 60)
            .note_on(240, 62, 70)
            .note_off(240, 62)
            .note_on(240, 64, 90)
            .note_on(0, 67, 85)
            .note_off(240, 64)
            .note_off(0, 67)
            .finish();
        let song = parse(&smf(480, vec![track]));

        assert!(!song.is_fallback);
        assert_eq!(
            shape(&song.events),
            vec![
                (0, vec![(60, 80)]),
                (500, vec![(62, 70)]),
                (1000, vec![(64, 90), (67, 85)]),
            ]
        );
    }

    #[test]
    fn orphan_note_on_produces_nothing() {
        let track = TrackBuilder::new()
            .note_on(100, 60, 80)
            .note_on(380, 62, 70)
            .note_off(480, 62)
            .finish();
        let song = parse(&smf(480, vec![track]));

        assert_eq!(shape(&song.events), vec![(500, vec![(62, 70)])]);
    }

    #[test]
    fn zero_velocity_note_on_closes_span() {
        let track = TrackBuilder::new()
            .note_on(0, 60, 80)
            .note_on(480, 60, 0)
            .note_on(0, 60, 40)
            .note_on(480, 60, 0)
            .finish();
        let song = parse(&smf(480, vec![track]));

        assert_eq!(
            shape(&song.events),
            vec![(0, vec![(60, 80)]), (500, vec![(60, 40)])]
        );
    }

    #[test]
    fn later_note_on_replaces_unmatched_span() {
        let track = TrackBuilder::new()
            .note_on(0, 60, 50)
            .note_on(480, 60, 90)
            .note_off(480, 60)
            .finish();
        let song = parse(&smf(480, vec![track]));

        assert_eq!(shape(&song.events), vec![(500, vec![(60, 90)])]);
    }

    #[test]
    fn duplicate_across_tracks_keeps_first() {
        let first = TrackBuilder::new().note_on(0, 60, 80).note_off(480, 60).finish();
        let second = TrackBuilder::new()
            .note_on(0, 60, 30)
            .note_on(0, 64, 55)
            .note_off(480, 60)
            .note_off(0, 64)
            .finish();
        let song = parse(&smf(480, vec![first, second]));

        assert_eq!(shape(&song.events), vec![(0, vec![(60, 80), (64, 55)])]);
    }

    #[test]
    fn timestamps_follow_tempo_changes() {
        let conductor = TrackBuilder::new()
            .tempo(0, 1_000_000)
            .tempo(480, 250_000)
            .finish();
        let notes = TrackBuilder::new()
            .note_on(480, 60, 80)
            .note_off(240, 60)
            .note_on(240, 62, 80)
            .note_off(480, 62)
            .finish();
        let song = parse(&smf(480, vec![conductor, notes]));

        let timestamps: Vec<u64> = song.events.iter().map(|e| e.timestamp_ms).collect();
        // 480 ticks at 1s per beat, then 250ms per beat
        assert_eq!(timestamps, vec![1000, 1250]);
        assert_eq!(song.metadata.default_tempo_microseconds, 1_000_000);
        assert!((song.metadata.bpm - 60.0).abs() < 1e-9);
        assert_eq!(song.metadata.total_duration_ms, 1500);
    }

    #[test]
    fn extracts_metadata() {
        let conductor = TrackBuilder::new()
            .track_name(0, "Conductor")
            .tempo(0, 600_000)
            .time_signature(0, 3, 2)
            .key_signature(0, -1, false)
            .finish();
        let piano = TrackBuilder::new()
            .track_name(0, "Piano RH")
            .note_on(0, 72, 100)
            .note_off(960, 72)
            .finish();
        let song = parse(&smf(480, vec![conductor, piano, TrackBuilder::new().finish()]));
        let metadata = &song.metadata;

        assert_eq!(metadata.ticks_per_beat, 480);
        assert_eq!(metadata.time_signature, (3, 4));
        assert_eq!(metadata.key_signature, "F");
        assert_eq!(metadata.track_count, 3);
        assert_eq!(metadata.track_names, vec!["Conductor", "Piano RH", "Unnamed"]);
        assert!((metadata.bpm - 100.0).abs() < 1e-9);
        assert_eq!(metadata.total_duration_ms, 1200);
    }

    #[test]
    fn names_keys() {
        assert_eq!(key_name(0, false), "C");
        assert_eq!(key_name(0, true), "Am");
        assert_eq!(key_name(2, false), "D");
        assert_eq!(key_name(-3, true), "Cm");
        assert_eq!(key_name(6, false), "F#");
        assert_eq!(key_name(-7, false), "Cb");
        assert_eq!(key_name(7, true), "A#m");
        assert_eq!(key_name(12, false), "C");
    }

    #[test]
    fn smpte_timing_runs_at_fixed_rate() {
        // 25 fps, 40 ticks per frame: 1000 ticks per second
        let track = TrackBuilder::new()
            .tempo(0, 250_000)
            .note_on(500, 60, 80)
            .note_off(500, 60)
            .finish();
        let song = parse(&smf_timecode(Fps::Fps25, 40, vec![track]));

        assert_eq!(shape(&song.events), vec![(500, vec![(60, 80)])]);
    }

    #[test]
    fn drop_frame_timing_does_not_drift() {
        // ten seconds of 29.97 fps frames, 100 ticks each
        let track = TrackBuilder::new()
            .note_on(2997 * 10, 60, 80)
            .note_off(100, 60)
            .finish();
        let song = parse(&smf_timecode(Fps::Fps29, 100, vec![track]));

        assert_eq!(shape(&song.events), vec![(10_000, vec![(60, 80)])]);
    }

    #[test]
    fn output_is_sorted_and_chords_are_unique() {
        let mut tracks = Vec::new();
        for t in 0..3u8 {
            let mut track = TrackBuilder::new();
            for i in 0..40u8 {
                let note = 48 + ((u32::from(i) * 7 + u32::from(t) * 5) % 36) as u8;
                track = track.note_on(u32::from(i % 3) * 60, note, 64 + t).note_off(120, note);
            }
            tracks.push(track.finish());
        }
        let song = parse(&smf(96, tracks));

        assert!(!song.events.is_empty());
        assert!(song.events.windows(2).all(|w| w[0].timestamp_ms < w[1].timestamp_ms));
        for event in &song.events {
            let distinct: BTreeSet<u8> = event.notes().iter().map(|n| n.note).collect();
            assert_eq!(distinct.len(), event.len());
        }
    }

    #[test]
    fn downsample_preserves_first_and_last() {
        let events: Vec<NoteEvent> = (0..1200u64)
            .map(|i| NoteEvent::new(i * 10, [ChordNote::new(60, 80)]))
            .collect();
        let kept = downsample(events, 500);

        assert_eq!(kept.len(), 500);
        assert_eq!(kept.first().map(|e| e.timestamp_ms), Some(0));
        assert_eq!(kept.last().map(|e| e.timestamp_ms), Some(11_990));
        assert!(kept.windows(2).all(|w| w[0].timestamp_ms < w[1].timestamp_ms));
        // stride of two
        assert_eq!(kept[1].timestamp_ms, 20);
    }

    #[test]
    fn downsample_leaves_short_lists_alone() {
        let events: Vec<NoteEvent> = (0..10u64)
            .map(|i| NoteEvent::new(i, [ChordNote::new(60, 80)]))
            .collect();
        assert_eq!(downsample(events.clone(), 500), events);
        assert_eq!(downsample(events.clone(), 0).len(), 2);
    }

    #[test]
    fn parser_ceiling_is_configurable() {
        let mut track = TrackBuilder::new();
        for _ in 0..30 {
            track = track.note_on(0, 60, 80).note_off(48, 60);
        }
        let bytes = smf(48, vec![track.finish()]);

        let capped = NoteEventParser::new(ParserConfig { max_events: Some(10) })
            .parse_bytes(&bytes)
            .unwrap();
        let uncapped = NoteEventParser::new(ParserConfig { max_events: None })
            .parse_bytes(&bytes)
            .unwrap();

        assert_eq!(capped.events.len(), 10);
        assert_eq!(uncapped.events.len(), 30);
        assert_eq!(capped.events.last(), uncapped.events.last());
    }

    #[test]
    fn unreadable_sources_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("garbage.mid");
        fs::write(&garbage, b"definitely not midi").unwrap();
        let missing = dir.path().join("missing.mid");
        let parser = NoteEventParser::default();

        let paths: [&Path; 3] = [Path::new(""), &missing, &garbage];
        for path in paths {
            let song = parser.parse_file(path);
            assert!(song.is_fallback);
            assert_eq!(song.events.len(), 8);
            assert_eq!(shape(&song.events[..1]), vec![(0, vec![(60, 80)])]);
            assert_eq!(song.metadata.total_duration_ms, 4000);
        }

        assert!(matches!(parser.try_parse_file(Path::new("")), Err(ParseError::EmptyPath)));
        assert!(matches!(parser.try_parse_file(&missing), Err(ParseError::Io(_))));
        assert!(matches!(parser.try_parse_file(&garbage), Err(ParseError::Midi(_))));
    }

    #[test]
    fn reads_files_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scale.mid");
        let track = TrackBuilder::new().note_on(0, 60, 80).note_off(480, 60).finish();
        fs::write(&path, smf(480, vec![track])).unwrap();

        let song = NoteEventParser::default().parse_file(&path);
        assert!(!song.is_fallback);
        assert_eq!(shape(&song.events), vec![(0, vec![(60, 80)])]);
    }
}
