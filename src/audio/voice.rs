use std::f32::consts::TAU;

use serde::{Deserialize, Serialize};

use super::{VoiceCommand, midi_to_freq};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ADSRConfig {
    /// Seconds
    pub attack: f32,
    /// Seconds
    pub decay: f32,
    /// 0.0 -> 1.0
    pub sustain: f32,
    /// Seconds
    pub release: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnvelopeState {
    Attack { time: f32 },
    Decay { time: f32 },
    Sustain,
    /// `from` is the level the release started at.
    Release { time: f32, from: f32 },
}

fn progress(time: f32, length: f32) -> f32 {
    if length <= 0.0 {
        1.0
    } else {
        (time / length).min(1.0)
    }
}

/// A single sine voice.
#[derive(Debug, Clone)]
pub struct Voice {
    pub note: u8,
    pub velocity: u8,
    pub envelope: EnvelopeState,
    level: f32,
    phase: f32,
    freq: f32,
}

impl Voice {
    pub fn new(note: u8, velocity: u8) -> Self {
        Self {
            note,
            velocity,
            envelope: EnvelopeState::Attack { time: 0.0 },
            level: 0.0,
            phase: 0.0,
            freq: midi_to_freq(note),
        }
    }

    pub fn release(&mut self) {
        if !matches!(self.envelope, EnvelopeState::Release { .. }) {
            self.envelope = EnvelopeState::Release {
                time: 0.0,
                from: self.level,
            };
        }
    }

    pub fn is_finished(&self, adsr: &ADSRConfig) -> bool {
        matches!(self.envelope, EnvelopeState::Release { time, .. } if time >= adsr.release)
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    fn advance_envelope(&mut self, adsr: &ADSRConfig, dt: f32) {
        match &mut self.envelope {
            EnvelopeState::Attack { time } => {
                *time += dt;
                if *time >= adsr.attack {
                    self.envelope = EnvelopeState::Decay { time: 0.0 };
                    self.level = 1.0;
                } else {
                    self.level = progress(*time, adsr.attack);
                }
            }
            EnvelopeState::Decay { time } => {
                *time += dt;
                if *time >= adsr.decay {
                    self.envelope = EnvelopeState::Sustain;
                    self.level = adsr.sustain;
                } else {
                    self.level = 1.0 - (1.0 - adsr.sustain) * progress(*time, adsr.decay);
                }
            }
            EnvelopeState::Sustain => {
                self.level = adsr.sustain;
            }
            EnvelopeState::Release { time, from } => {
                *time += dt;
                self.level = *from * (1.0 - progress(*time, adsr.release));
            }
        }
    }

    pub fn next_sample(&mut self, adsr: &ADSRConfig, sample_rate: f32) -> f32 {
        self.advance_envelope(adsr, 1.0 / sample_rate);

        let sample = (self.phase * TAU).sin() * self.level * (f32::from(self.velocity) / 127.0);
        self.phase += self.freq / sample_rate;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        sample
    }
}

/// Every sounding voice, mixed to mono. Lives on the audio callback thread.
#[derive(Debug, Clone)]
pub struct VoiceBank {
    voices: Vec<Voice>,
    adsr: ADSRConfig,
    sample_rate: f32,
    volume: f32,
}

impl VoiceBank {
    pub fn new(adsr: ADSRConfig, sample_rate: f32, volume: f32) -> Self {
        Self {
            voices: Vec::with_capacity(32),
            adsr,
            sample_rate,
            volume,
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn apply(&mut self, command: VoiceCommand) {
        match command {
            VoiceCommand::NoteOn { note, velocity } => {
                // retrigger replaces a voice still held on the same key
                self.voices
                    .retain(|v| v.note != note || matches!(v.envelope, EnvelopeState::Release { .. }));
                self.voices.push(Voice::new(note, velocity));
            }
            VoiceCommand::NoteOff { note } => {
                self.voices
                    .iter_mut()
                    .filter(|v| v.note == note)
                    .for_each(Voice::release);
            }
            VoiceCommand::AllOff => self.voices.iter_mut().for_each(Voice::release),
        }
    }

    pub fn active(&self) -> usize {
        self.voices.len()
    }

    pub fn next_sample(&mut self) -> f32 {
        let mut mix = 0.0;
        for voice in &mut self.voices {
            mix += voice.next_sample(&self.adsr, self.sample_rate);
        }
        let adsr = &self.adsr;
        self.voices.retain(|v| !v.is_finished(adsr));
        mix * self.volume
    }

    /// Fills an interleaved buffer, copying the mono mix to every channel.
    pub fn render(&mut self, output: &mut [f32], channels: usize) {
        for frame in output.chunks_mut(channels.max(1)) {
            let sample = self.next_sample();
            frame.fill(sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adsr() -> ADSRConfig {
        ADSRConfig {
            attack: 0.01,
            decay: 0.01,
            sustain: 0.5,
            release: 0.01,
        }
    }

    const RATE: f32 = 1000.0;

    #[test]
    fn envelope_walks_through_stages() {
        let adsr = adsr();
        let mut voice = Voice::new(69, 127);

        for _ in 0..5 {
            voice.next_sample(&adsr, RATE);
        }
        assert!(matches!(voice.envelope, EnvelopeState::Attack { .. }));
        assert!((voice.level() - 0.5).abs() < 1e-3);

        for _ in 0..30 {
            voice.next_sample(&adsr, RATE);
        }
        assert_eq!(voice.envelope, EnvelopeState::Sustain);
        assert_eq!(voice.level(), 0.5);

        voice.release();
        for _ in 0..11 {
            voice.next_sample(&adsr, RATE);
        }
        assert!(voice.is_finished(&adsr));
        assert!(voice.level().abs() < 1e-6);
    }

    #[test]
    fn bank_drops_released_voices() {
        let mut bank = VoiceBank::new(adsr(), RATE, 1.0);
        bank.apply(VoiceCommand::NoteOn { note: 60, velocity: 100 });
        bank.apply(VoiceCommand::NoteOn { note: 64, velocity: 100 });
        assert_eq!(bank.active(), 2);

        let mut buffer = vec![0.0; 40];
        bank.render(&mut buffer, 2);
        assert!(buffer.iter().any(|s| *s != 0.0));
        assert!(buffer.chunks(2).all(|f| f[0] == f[1]));

        bank.apply(VoiceCommand::NoteOff { note: 60 });
        bank.render(&mut buffer, 2);
        assert_eq!(bank.active(), 1);

        bank.apply(VoiceCommand::AllOff);
        bank.render(&mut buffer, 2);
        assert_eq!(bank.active(), 0);
    }

    #[test]
    fn retrigger_replaces_held_voice() {
        let mut bank = VoiceBank::new(adsr(), RATE, 1.0);
        bank.apply(VoiceCommand::NoteOn { note: 60, velocity: 100 });
        bank.apply(VoiceCommand::NoteOn { note: 60, velocity: 50 });
        assert_eq!(bank.active(), 1);
    }

    #[test]
    fn silent_bank_renders_zeros() {
        let mut bank = VoiceBank::new(adsr(), RATE, 1.0);
        let mut buffer = vec![1.0; 16];
        bank.render(&mut buffer, 2);
        assert!(buffer.iter().all(|s| *s == 0.0));
    }
}
