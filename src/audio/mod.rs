//! Sound output: a built-in sine synth and an external MIDI port.

mod midi_out;
mod output;
mod voice;

pub use midi_out::{MidiOutSink, list_midi_ports};
pub use output::AudioOutput;
pub use voice::{ADSRConfig, EnvelopeState, Voice, VoiceBank};

use parking_lot::Mutex;
use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Producer, Split},
};
use tracing::warn;

use crate::error::SinkError;
use crate::sink::Sink;

const COMMAND_CAPACITY: usize = 1024;

pub fn midi_to_freq(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((f32::from(note) - 69.0) / 12.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceCommand {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    AllOff,
}

/// Forwards notes to the audio callback through a lock-free ring.
pub struct AudioSink {
    producer: Mutex<HeapProd<VoiceCommand>>,
}

pub(crate) fn command_queue() -> (AudioSink, HeapCons<VoiceCommand>) {
    let (producer, consumer) = HeapRb::<VoiceCommand>::new(COMMAND_CAPACITY).split();
    (
        AudioSink {
            producer: Mutex::new(producer),
        },
        consumer,
    )
}

impl AudioSink {
    fn push(&self, command: VoiceCommand) -> Result<(), SinkError> {
        self.producer.lock().try_push(command).map_err(|_| {
            warn!(?command, "audio command queue full");
            SinkError::Failed("audio command queue is full".to_string())
        })
    }
}

impl Sink for AudioSink {
    fn name(&self) -> &'static str {
        "audio"
    }

    fn on_note_begin(&self, note: u8, velocity: u8, _timestamp_ms: u64) -> Result<(), SinkError> {
        self.push(VoiceCommand::NoteOn { note, velocity })
    }

    fn on_note_end(&self, note: u8) -> Result<(), SinkError> {
        self.push(VoiceCommand::NoteOff { note })
    }

    fn on_all_notes_off(&self) -> Result<(), SinkError> {
        self.push(VoiceCommand::AllOff)
    }
}
