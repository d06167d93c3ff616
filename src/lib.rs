pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod indicator;
pub mod library;
pub mod midi;
pub mod sink;
pub mod timing;
pub mod ui;

pub use config::PlayerConfig;
pub use error::{AudioError, ConfigError, ParseError, PlaybackError, SinkError};
pub use events::{ChordNote, Metadata, NoteEvent};
pub use library::{Library, Song};
pub use midi::{NoteEventParser, ParsedSong};
pub use sink::{AutoRelease, Sink, SinkSet};
pub use timing::{PlaybackStatus, PlaybackUpdate, Scheduler};
