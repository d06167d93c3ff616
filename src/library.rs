use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::info;

use crate::events::{Metadata, NoteEvent};
use crate::midi::{NoteEventParser, ParsedSong, fallback_song};

/// A parsed file, ready to hand to the scheduler.
#[derive(Debug, Clone)]
pub struct Song {
    pub events: Arc<[NoteEvent]>,
    pub metadata: Metadata,
    pub is_fallback: bool,
    pub path: Option<PathBuf>,
}

impl Song {
    fn from_parsed(parsed: ParsedSong, path: Option<PathBuf>) -> Self {
        Self {
            events: Arc::from(parsed.events),
            metadata: parsed.metadata,
            is_fallback: parsed.is_fallback,
            path,
        }
    }

    pub fn title(&self) -> String {
        self.path
            .as_deref()
            .and_then(Path::file_stem)
            .map_or_else(|| "fallback".to_string(), |s| s.to_string_lossy().into_owned())
    }
}

/// Holds the current song. Loading swaps it atomically; a running session
/// keeps its own `Arc` to the previous event list.
pub struct Library {
    parser: NoteEventParser,
    current: ArcSwap<Song>,
}

impl Library {
    /// Starts out with the fallback run loaded.
    pub fn new(parser: NoteEventParser) -> Self {
        Self {
            parser,
            current: ArcSwap::from_pointee(Song::from_parsed(fallback_song(), None)),
        }
    }

    pub fn load(&self, path: &Path) -> Arc<Song> {
        let parsed = self.parser.parse_file(path);
        let song = Arc::new(Song::from_parsed(parsed, Some(path.to_path_buf())));
        info!(
            title = %song.title(),
            events = song.events.len(),
            fallback = song.is_fallback,
            "song loaded"
        );
        self.current.store(Arc::clone(&song));
        song
    }

    pub fn current(&self) -> Arc<Song> {
        self.current.load_full()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::midi::testing::{TrackBuilder, smf};

    #[test]
    fn starts_with_fallback() {
        let library = Library::new(NoteEventParser::default());
        let song = library.current();
        assert!(song.is_fallback);
        assert_eq!(song.events.len(), 8);
        assert_eq!(song.title(), "fallback");
    }

    #[test]
    fn load_replaces_current_and_keeps_old_readers_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("duet.mid");
        let track = TrackBuilder::new()
            .note_on(0, 60, 80)
            .note_on(0, 64, 80)
            .note_off(480, 60)
            .note_off(0, 64)
            .finish();
        fs::write(&path, smf(480, vec![track])).unwrap();

        let library = Library::new(NoteEventParser::default());
        let before = library.current();
        let loaded = library.load(&path);

        assert!(!loaded.is_fallback);
        assert_eq!(loaded.title(), "duet");
        assert_eq!(library.current().events.len(), 1);
        assert_eq!(before.events.len(), 8);
    }

    #[test]
    fn unreadable_file_still_loads_fallback() {
        let library = Library::new(NoteEventParser::default());
        let song = library.load(Path::new("/nonexistent/song.mid"));
        assert!(song.is_fallback);
        assert_eq!(song.title(), "song");
    }
}
