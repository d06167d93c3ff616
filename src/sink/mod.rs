//! The consumer side of playback.
//!
//! The scheduler only ever talks to `dyn Sink`. Concrete adapters (audio,
//! keyboard highlight, indicator strip, notation) are responsible for moving
//! work onto whatever thread owns their state.

mod auto_release;
mod deferred;

pub use auto_release::AutoRelease;
pub use deferred::DeferredTasks;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::sync::WaitGroup;
use tracing::{trace, warn};

use crate::error::SinkError;
use crate::events::NoteEvent;

pub trait Sink: Send + Sync {
    fn name(&self) -> &'static str;

    fn on_note_begin(&self, note: u8, velocity: u8, timestamp_ms: u64) -> Result<(), SinkError>;

    fn on_note_end(&self, note: u8) -> Result<(), SinkError>;

    fn on_progress(&self, _percent: u8) -> Result<(), SinkError> {
        Ok(())
    }

    fn on_all_notes_off(&self) -> Result<(), SinkError>;
}

#[derive(Debug)]
pub struct SinkFault {
    pub sink: &'static str,
    pub error: SinkError,
}

impl std::fmt::Display for SinkFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} sink failed: {}", self.sink, self.error)
    }
}

#[derive(Clone, Default)]
pub struct SinkSet {
    sinks: Arc<Vec<Arc<dyn Sink>>>,
}

impl SinkSet {
    pub fn new(sinks: Vec<Arc<dyn Sink>>) -> Self {
        Self {
            sinks: Arc::new(sinks),
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Hands every note of `event` to its own thread.
    ///
    /// Returns once each thread has started issuing its begin calls, without
    /// waiting for any sink to finish. Failures are reported through
    /// `dispatch`, which also tracks the threads until they return.
    pub fn begin_chord(&self, event: &NoteEvent, dispatch: &ChordDispatch) -> Result<(), SinkFault> {
        let issued = WaitGroup::new();

        for chord_note in event.notes() {
            let (note, velocity) = (chord_note.note, chord_note.velocity);
            let timestamp_ms = event.timestamp_ms;
            let sinks = Arc::clone(&self.sinks);
            let faults = dispatch.fault_tx.clone();
            let cancelled = Arc::clone(&dispatch.cancelled);
            let in_flight = dispatch.in_flight.clone();
            let issued = issued.clone();

            thread::Builder::new()
                .name("note-begin".to_string())
                .spawn(move || {
                    drop(issued);
                    for sink in sinks.iter() {
                        if cancelled.load(Ordering::Acquire) {
                            break;
                        }
                        if let Err(error) = sink.on_note_begin(note, velocity, timestamp_ms) {
                            warn!(sink = sink.name(), note, "note begin failed: {error}");
                            let _ = faults.send(SinkFault {
                                sink: sink.name(),
                                error,
                            });
                        }
                    }
                    drop(in_flight);
                })
                .map_err(|e| SinkFault {
                    sink: "dispatch",
                    error: SinkError::Spawn("note-begin", e),
                })?;
        }

        issued.wait();
        trace!(timestamp_ms = event.timestamp_ms, notes = event.len(), "chord issued");
        Ok(())
    }

    /// Calls every sink, returning the first failure.
    pub fn progress(&self, percent: u8) -> Result<(), SinkFault> {
        self.each(|sink| sink.on_progress(percent))
    }

    /// Calls every sink even when some fail, returning the first failure.
    pub fn all_notes_off(&self) -> Result<(), SinkFault> {
        self.each(|sink| sink.on_all_notes_off())
    }

    fn each(&self, mut call: impl FnMut(&dyn Sink) -> Result<(), SinkError>) -> Result<(), SinkFault> {
        let mut first = None;
        for sink in self.sinks.iter() {
            if let Err(error) = call(sink.as_ref()) {
                warn!(sink = sink.name(), "sink call failed: {error}");
                first.get_or_insert(SinkFault {
                    sink: sink.name(),
                    error,
                });
            }
        }
        first.map_or(Ok(()), Err)
    }
}

/// Note-begin threads of one playback run, plus the faults they report.
pub struct ChordDispatch {
    in_flight: WaitGroup,
    cancelled: Arc<AtomicBool>,
    fault_tx: Sender<SinkFault>,
    fault_rx: Receiver<SinkFault>,
}

impl ChordDispatch {
    pub fn new() -> Self {
        let (fault_tx, fault_rx) = channel::unbounded();
        Self {
            in_flight: WaitGroup::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
            fault_tx,
            fault_rx,
        }
    }

    /// First fault reported so far, if any.
    pub fn fault(&self) -> Option<SinkFault> {
        self.fault_rx.try_recv().ok()
    }

    /// Begin calls not yet issued are skipped.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Blocks until every begin thread has returned, then reports the first
    /// fault any of them raised.
    pub fn settle(self) -> Option<SinkFault> {
        self.in_flight.wait();
        self.fault_rx.try_recv().ok()
    }
}

impl Default for ChordDispatch {
    fn default() -> Self {
        Self::new()
    }
}
