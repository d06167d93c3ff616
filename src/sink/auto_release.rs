use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::{DeferredTasks, Sink};
use crate::error::SinkError;

/// Ends every note a fixed time after it begins.
///
/// `on_all_notes_off` cancels the pending ends as a group before forwarding,
/// so nothing lights up again once playback has stopped.
pub struct AutoRelease<S> {
    inner: Arc<S>,
    hold: Duration,
    timers: DeferredTasks,
}

impl<S: Sink + 'static> AutoRelease<S> {
    pub fn new(inner: S, hold: Duration) -> Result<Self, SinkError> {
        Ok(Self {
            timers: DeferredTasks::new(inner.name())?,
            inner: Arc::new(inner),
            hold,
        })
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: Sink + 'static> Sink for AutoRelease<S> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn on_note_begin(&self, note: u8, velocity: u8, timestamp_ms: u64) -> Result<(), SinkError> {
        self.inner.on_note_begin(note, velocity, timestamp_ms)?;

        let inner = Arc::clone(&self.inner);
        self.timers.schedule(self.hold, move || {
            if let Err(e) = inner.on_note_end(note) {
                warn!(sink = inner.name(), note, "deferred note end failed: {e}");
            }
        });
        Ok(())
    }

    fn on_note_end(&self, note: u8) -> Result<(), SinkError> {
        self.inner.on_note_end(note)
    }

    fn on_progress(&self, percent: u8) -> Result<(), SinkError> {
        self.inner.on_progress(percent)
    }

    fn on_all_notes_off(&self) -> Result<(), SinkError> {
        self.timers.cancel_all();
        self.inner.on_all_notes_off()
    }
}
