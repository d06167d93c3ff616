mod scheduler;
mod session;
mod tempo;

pub use scheduler::{PlaybackUpdate, Scheduler};
pub use session::{PlaybackSession, PlaybackStatus};
pub use tempo::{TempoChange, TempoMap, build_tempo_map, ticks_to_ms};
