use serde::{Deserialize, Serialize};

pub const DEFAULT_TEMPO_MICROSECONDS: u32 = 500_000;
pub const DEFAULT_TICKS_PER_BEAT: u32 = 480;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChordNote {
    pub note: u8,
    pub velocity: u8,
}

impl ChordNote {
    pub fn new(note: u8, velocity: u8) -> Self {
        Self { note, velocity }
    }
}

/// One or more notes sounding at the same millisecond.
///
/// Note numbers are unique within an event. When a duplicate is offered the
/// first occurrence is kept and its velocity preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteEvent {
    pub timestamp_ms: u64,
    notes: Vec<ChordNote>,
}

impl NoteEvent {
    pub fn new(timestamp_ms: u64, notes: impl IntoIterator<Item = ChordNote>) -> Self {
        let mut event = Self {
            timestamp_ms,
            notes: Vec::new(),
        };
        for note in notes {
            event.push(note);
        }
        event
    }

    /// Returns false when the note number is already present.
    pub fn push(&mut self, note: ChordNote) -> bool {
        if self.notes.iter().any(|n| n.note == note.note) {
            return false;
        }
        self.notes.push(note);
        true
    }

    pub fn notes(&self) -> &[ChordNote] {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub ticks_per_beat: u32,
    pub default_tempo_microseconds: u32,
    pub bpm: f64,
    pub time_signature: (u8, u8),
    pub key_signature: String,
    pub track_count: u32,
    pub total_duration_ms: u64,
    pub track_names: Vec<String>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            ticks_per_beat: DEFAULT_TICKS_PER_BEAT,
            default_tempo_microseconds: DEFAULT_TEMPO_MICROSECONDS,
            bpm: tempo_to_bpm(DEFAULT_TEMPO_MICROSECONDS),
            time_signature: (4, 4),
            key_signature: "C".to_string(),
            track_count: 1,
            total_duration_ms: 0,
            track_names: Vec::new(),
        }
    }
}

pub fn tempo_to_bpm(microseconds_per_beat: u32) -> f64 {
    60_000_000.0 / f64::from(microseconds_per_beat.max(1))
}
