use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

const NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// Which MIDI notes a physical keyboard covers, in key order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyboardLayout {
    /// A0..C8
    #[default]
    Piano88,
    /// C2..C7
    Keyboard61,
    /// C2..C6
    Keyboard49,
    /// C3..C5
    Keyboard25,
    Custom { first_note: u8, last_note: u8 },
}

impl KeyboardLayout {
    pub fn notes(self) -> RangeInclusive<u8> {
        match self {
            Self::Piano88 => 21..=108,
            Self::Keyboard61 => 36..=96,
            Self::Keyboard49 => 36..=84,
            Self::Keyboard25 => 48..=72,
            Self::Custom {
                first_note,
                last_note,
            } => first_note..=last_note,
        }
    }

    pub fn len(self) -> usize {
        let notes = self.notes();
        usize::from(notes.end().saturating_sub(*notes.start())) + usize::from(!notes.is_empty())
    }

    pub fn is_empty(self) -> bool {
        self.notes().is_empty()
    }

    /// Position of `note` on this keyboard, `None` when it falls off either end.
    pub fn index_of(self, note: u8) -> Option<usize> {
        let notes = self.notes();
        notes
            .contains(&note)
            .then(|| usize::from(note - notes.start()))
    }
}

/// Scientific pitch name with middle C as `C4`.
pub fn note_name(note: u8) -> String {
    let octave = i16::from(note / 12) - 1;
    format!("{}{octave}", NAMES[usize::from(note % 12)])
}

pub fn is_black(note: u8) -> bool {
    matches!(note % 12, 1 | 3 | 6 | 8 | 10)
}
