//! Per-key light strip that mirrors playback.

mod layout;
mod strip;

pub use layout::{KeyboardLayout, is_black, note_name};
pub use strip::{IndicatorDriver, Rgb, SimulatedStrip};

use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, trace, warn};

use crate::config::IndicatorConfig;
use crate::error::SinkError;
use crate::sink::Sink;

enum IndicatorCommand {
    On(u8),
    Off(u8),
    AllOff,
    Shutdown,
}

/// Drives an [`IndicatorDriver`] from its own thread.
///
/// Sink calls only enqueue; a slow strip never holds up the scheduler.
pub struct IndicatorSink {
    tx: Sender<IndicatorCommand>,
    driver: Option<JoinHandle<()>>,
}

impl IndicatorSink {
    pub fn new<D>(driver: D, config: &IndicatorConfig) -> Result<Self, SinkError>
    where
        D: IndicatorDriver + 'static,
    {
        let (tx, rx) = channel::unbounded();
        let state = DriverState {
            driver,
            layout: config.layout,
            on_color: Rgb::NOTE_ON.scaled(config.brightness),
            standby_color: Rgb::STANDBY.scaled(config.brightness),
        };
        let handle = thread::Builder::new()
            .name("indicator".to_string())
            .spawn(move || state.run(rx))
            .map_err(|e| SinkError::Spawn("indicator", e))?;

        Ok(Self {
            tx,
            driver: Some(handle),
        })
    }

    fn send(&self, command: IndicatorCommand) -> Result<(), SinkError> {
        self.tx
            .send(command)
            .map_err(|_| SinkError::Disconnected("indicator"))
    }
}

impl Sink for IndicatorSink {
    fn name(&self) -> &'static str {
        "indicator"
    }

    fn on_note_begin(&self, note: u8, _velocity: u8, _timestamp_ms: u64) -> Result<(), SinkError> {
        self.send(IndicatorCommand::On(note))
    }

    fn on_note_end(&self, note: u8) -> Result<(), SinkError> {
        self.send(IndicatorCommand::Off(note))
    }

    fn on_all_notes_off(&self) -> Result<(), SinkError> {
        self.send(IndicatorCommand::AllOff)
    }
}

impl Drop for IndicatorSink {
    fn drop(&mut self) {
        let _ = self.tx.send(IndicatorCommand::Shutdown);
        if let Some(handle) = self.driver.take() {
            let _ = handle.join();
        }
    }
}

struct DriverState<D> {
    driver: D,
    layout: KeyboardLayout,
    on_color: Rgb,
    standby_color: Rgb,
}

impl<D: IndicatorDriver> DriverState<D> {
    fn run(mut self, rx: Receiver<IndicatorCommand>) {
        if self.layout.len() > self.driver.len() {
            warn!(
                keys = self.layout.len(),
                pixels = self.driver.len(),
                "strip is shorter than the keyboard layout"
            );
        }
        if let Err(e) = self.standby() {
            warn!("indicator standby failed: {e}");
        }

        while let Ok(command) = rx.recv() {
            let result = match command {
                IndicatorCommand::On(note) => self.light(note, self.on_color),
                IndicatorCommand::Off(note) => self.light(note, Rgb::OFF),
                IndicatorCommand::AllOff => self.clear(),
                IndicatorCommand::Shutdown => break,
            };
            if let Err(e) = result {
                warn!("indicator update failed: {e}");
            }
        }

        if let Err(e) = self.clear() {
            warn!("indicator shutdown clear failed: {e}");
        }
        debug!("indicator driver stopped");
    }

    fn light(&mut self, note: u8, color: Rgb) -> Result<(), SinkError> {
        let Some(index) = self.layout.index_of(note) else {
            trace!(note, "note outside keyboard layout");
            return Ok(());
        };
        if index >= self.driver.len() {
            return Ok(());
        }
        self.driver.set(index, color)?;
        self.driver.show()
    }

    fn standby(&mut self) -> Result<(), SinkError> {
        for index in 0..self.driver.len().min(self.layout.len()) {
            self.driver.set(index, self.standby_color)?;
        }
        self.driver.show()
    }

    fn clear(&mut self) -> Result<(), SinkError> {
        self.driver.clear_all()?;
        self.driver.show()
    }
}
