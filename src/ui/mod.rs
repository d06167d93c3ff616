//! Host-owned display state and the sinks that feed it.
//!
//! Sinks never touch the views directly. They push [`UiCommand`]s and the
//! host applies them on its own thread once per frame with [`UiState::drain`].

mod keyboard;
mod notation;

pub use keyboard::KeyboardView;
pub use notation::ScrollCursor;

use crossbeam::channel::{self, Receiver, Sender};

use crate::error::SinkError;
use crate::indicator::KeyboardLayout;
use crate::sink::Sink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiCommand {
    KeyDown { note: u8, velocity: u8 },
    KeyUp { note: u8 },
    ReleaseAll,
    Progress(u8),
    NotationAdvance { timestamp_ms: u64 },
}

pub fn ui_channel() -> (Sender<UiCommand>, Receiver<UiCommand>) {
    channel::unbounded()
}

fn push(tx: &Sender<UiCommand>, sink: &'static str, command: UiCommand) -> Result<(), SinkError> {
    tx.send(command).map_err(|_| SinkError::Disconnected(sink))
}

/// Highlights keys on the on-screen keyboard.
pub struct KeyboardSink {
    tx: Sender<UiCommand>,
}

impl KeyboardSink {
    pub fn new(tx: Sender<UiCommand>) -> Self {
        Self { tx }
    }
}

impl Sink for KeyboardSink {
    fn name(&self) -> &'static str {
        "keyboard"
    }

    fn on_note_begin(&self, note: u8, velocity: u8, _timestamp_ms: u64) -> Result<(), SinkError> {
        push(&self.tx, self.name(), UiCommand::KeyDown { note, velocity })
    }

    fn on_note_end(&self, note: u8) -> Result<(), SinkError> {
        push(&self.tx, self.name(), UiCommand::KeyUp { note })
    }

    fn on_progress(&self, percent: u8) -> Result<(), SinkError> {
        push(&self.tx, self.name(), UiCommand::Progress(percent))
    }

    fn on_all_notes_off(&self) -> Result<(), SinkError> {
        push(&self.tx, self.name(), UiCommand::ReleaseAll)
    }
}

/// Moves the notation scroll target to each dispatched event.
pub struct NotationSink {
    tx: Sender<UiCommand>,
}

impl NotationSink {
    pub fn new(tx: Sender<UiCommand>) -> Self {
        Self { tx }
    }
}

impl Sink for NotationSink {
    fn name(&self) -> &'static str {
        "notation"
    }

    fn on_note_begin(&self, _note: u8, _velocity: u8, timestamp_ms: u64) -> Result<(), SinkError> {
        push(&self.tx, self.name(), UiCommand::NotationAdvance { timestamp_ms })
    }

    fn on_note_end(&self, _note: u8) -> Result<(), SinkError> {
        Ok(())
    }

    fn on_all_notes_off(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct UiState {
    pub keyboard: KeyboardView,
    pub scroll: ScrollCursor,
    pub progress: u8,
}

impl UiState {
    pub fn new(layout: KeyboardLayout) -> Self {
        Self {
            keyboard: KeyboardView::new(layout),
            scroll: ScrollCursor::default(),
            progress: 0,
        }
    }

    pub fn apply(&mut self, command: UiCommand) {
        match command {
            UiCommand::KeyDown { note, velocity } => self.keyboard.press(note, velocity),
            UiCommand::KeyUp { note } => self.keyboard.release(note),
            UiCommand::ReleaseAll => self.keyboard.release_all(),
            UiCommand::Progress(percent) => self.progress = percent.min(100),
            UiCommand::NotationAdvance { timestamp_ms } => self.scroll.set_target(timestamp_ms),
        }
    }

    /// Applies everything queued so far and returns how many commands that was.
    pub fn drain(&mut self, rx: &Receiver<UiCommand>) -> usize {
        let mut applied = 0;
        while let Ok(command) = rx.try_recv() {
            self.apply(command);
            applied += 1;
        }
        applied
    }
}
