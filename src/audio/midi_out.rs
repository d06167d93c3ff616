use std::collections::BTreeSet;

use midir::{MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{AudioError, SinkError};
use crate::sink::Sink;

const CLIENT_NAME: &str = "keyglow";

const NOTE_ON: u8 = 0x90;
const NOTE_OFF: u8 = 0x80;
const CONTROL_CHANGE: u8 = 0xB0;
const ALL_NOTES_OFF: u8 = 123;

pub fn list_midi_ports() -> Result<Vec<String>, AudioError> {
    let output = MidiOutput::new(CLIENT_NAME).map_err(|e| AudioError::MidiOut(e.to_string()))?;
    Ok(output
        .ports()
        .iter()
        .filter_map(|port| output.port_name(port).ok())
        .collect())
}

struct Connection {
    out: MidiOutputConnection,
    held: BTreeSet<u8>,
}

impl Connection {
    fn send(&mut self, message: &[u8]) -> Result<(), SinkError> {
        self.out
            .send(message)
            .map_err(|e| SinkError::Failed(format!("MIDI send failed: {e}")))
    }
}

/// Plays notes on an external synth, channel 1.
pub struct MidiOutSink {
    connection: Mutex<Connection>,
}

impl MidiOutSink {
    /// Connects to the first port whose name contains `port_filter`.
    pub fn connect(port_filter: &str) -> Result<Self, AudioError> {
        let output =
            MidiOutput::new(CLIENT_NAME).map_err(|e| AudioError::MidiOut(e.to_string()))?;
        let ports = output.ports();
        let port = ports
            .iter()
            .find(|port| {
                output
                    .port_name(port)
                    .is_ok_and(|name| name.contains(port_filter))
            })
            .ok_or_else(|| AudioError::MidiOut(format!("no output port matching {port_filter:?}")))?;
        let name = output.port_name(port).unwrap_or_default();

        let out = output
            .connect(port, "keyglow-out")
            .map_err(|e| AudioError::MidiOut(e.to_string()))?;
        info!(port = %name, "MIDI output connected");

        Ok(Self {
            connection: Mutex::new(Connection {
                out,
                held: BTreeSet::new(),
            }),
        })
    }
}

impl Sink for MidiOutSink {
    fn name(&self) -> &'static str {
        "midi-out"
    }

    fn on_note_begin(&self, note: u8, velocity: u8, _timestamp_ms: u64) -> Result<(), SinkError> {
        let mut connection = self.connection.lock();
        connection.send(&[NOTE_ON, note & 0x7f, velocity & 0x7f])?;
        connection.held.insert(note);
        Ok(())
    }

    fn on_note_end(&self, note: u8) -> Result<(), SinkError> {
        let mut connection = self.connection.lock();
        connection.send(&[NOTE_OFF, note & 0x7f, 0])?;
        connection.held.remove(&note);
        Ok(())
    }

    fn on_all_notes_off(&self) -> Result<(), SinkError> {
        let mut connection = self.connection.lock();
        let held = std::mem::take(&mut connection.held);
        debug!(held = held.len(), "releasing MIDI notes");
        for note in held {
            connection.send(&[NOTE_OFF, note, 0])?;
        }
        // some synths ignore note-offs for notes they consider stuck
        connection.send(&[CONTROL_CHANGE, ALL_NOTES_OFF, 0])
    }
}
