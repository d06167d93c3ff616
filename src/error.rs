use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no MIDI file path given")]
    EmptyPath,
    #[error("failed to read MIDI file: {0}")]
    Io(#[from] io::Error),
    #[error("malformed MIDI file: {0}")]
    Midi(#[from] midly::Error),
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("playback is already running")]
    AlreadyPlaying,
    #[error("playback is not running")]
    NotPlaying,
    #[error("speed factor must be a positive finite number, got {0}")]
    InvalidSpeed(f64),
    #[error("failed to spawn playback thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("playback thread panicked")]
    WorkerPanicked,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("{0} sink is disconnected")]
    Disconnected(&'static str),
    #[error("failed to spawn {0} thread: {1}")]
    Spawn(&'static str, #[source] io::Error),
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] ron::Error),
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio output device")]
    NoOutputDevice,
    #[error(transparent)]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),
    #[error(transparent)]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error(transparent)]
    PlayStream(#[from] cpal::PlayStreamError),
    #[error("MIDI output: {0}")]
    MidiOut(String),
}
