mod parser;
#[cfg(test)]
pub(crate) mod testing;

pub use parser::{NoteEventParser, ParsedSong, downsample, fallback_song, key_name};
