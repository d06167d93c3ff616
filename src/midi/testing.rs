//! Builds Standard MIDI Files for tests through midly's writer.

use midly::num::{u4, u7, u15, u24, u28};
use midly::{
    Format, Fps, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
};

const CHANNEL: u8 = 0;

pub(crate) struct TrackBuilder<'a> {
    events: Track<'a>,
}

impl<'a> TrackBuilder<'a> {
    pub(crate) fn new() -> Self {
        Self { events: Vec::new() }
    }

    fn push(mut self, delta: u32, kind: TrackEventKind<'a>) -> Self {
        self.events.push(TrackEvent {
            delta: u28::new(delta),
            kind,
        });
        self
    }

    fn midi(self, delta: u32, message: MidiMessage) -> Self {
        self.push(
            delta,
            TrackEventKind::Midi {
                channel: u4::new(CHANNEL),
                message,
            },
        )
    }

    pub(crate) fn note_on(self, delta: u32, note: u8, velocity: u8) -> Self {
        self.midi(
            delta,
            MidiMessage::NoteOn {
                key: u7::new(note),
                vel: u7::new(velocity),
            },
        )
    }

    pub(crate) fn note_off(self, delta: u32, note: u8) -> Self {
        self.midi(
            delta,
            MidiMessage::NoteOff {
                key: u7::new(note),
                vel: u7::new(64),
            },
        )
    }

    pub(crate) fn tempo(self, delta: u32, microseconds_per_beat: u32) -> Self {
        self.push(
            delta,
            TrackEventKind::Meta(MetaMessage::Tempo(u24::new(microseconds_per_beat))),
        )
    }

    pub(crate) fn time_signature(self, delta: u32, numerator: u8, denominator_pow: u8) -> Self {
        self.push(
            delta,
            TrackEventKind::Meta(MetaMessage::TimeSignature(numerator, denominator_pow, 24, 8)),
        )
    }

    pub(crate) fn key_signature(self, delta: u32, sharps: i8, minor: bool) -> Self {
        self.push(
            delta,
            TrackEventKind::Meta(MetaMessage::KeySignature(sharps, minor)),
        )
    }

    pub(crate) fn track_name(self, delta: u32, name: &'a str) -> Self {
        self.push(
            delta,
            TrackEventKind::Meta(MetaMessage::TrackName(name.as_bytes())),
        )
    }

    pub(crate) fn finish(self) -> Track<'a> {
        self.push(0, TrackEventKind::Meta(MetaMessage::EndOfTrack))
            .events
    }
}

fn write(timing: Timing, tracks: Vec<Track<'_>>) -> Vec<u8> {
    let format = if tracks.len() == 1 {
        Format::SingleTrack
    } else {
        Format::Parallel
    };
    let smf = Smf {
        header: Header::new(format, timing),
        tracks,
    };

    let mut bytes = Vec::new();
    smf.write_std(&mut bytes).unwrap();
    bytes
}

/// A file with metrical timing.
pub(crate) fn smf(ticks_per_beat: u16, tracks: Vec<Track<'_>>) -> Vec<u8> {
    write(Timing::Metrical(u15::new(ticks_per_beat)), tracks)
}

/// A file whose ticks count subdivisions of SMPTE frames.
pub(crate) fn smf_timecode(fps: Fps, ticks_per_frame: u8, tracks: Vec<Track<'_>>) -> Vec<u8> {
    write(Timing::Timecode(fps, ticks_per_frame), tracks)
}
