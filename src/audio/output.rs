use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::{HeapCons, traits::Consumer};
use tracing::{error, info};

use super::{AudioSink, VoiceBank, VoiceCommand, command_queue};
use crate::config::AudioConfig;
use crate::error::AudioError;

/// Keeps the output stream alive. Not `Send`: it stays on the thread that
/// opened it, while the paired [`AudioSink`] goes to the scheduler.
pub struct AudioOutput {
    _stream: cpal::Stream,
    channels: usize,
}

impl AudioOutput {
    pub fn open(config: &AudioConfig) -> Result<(Self, AudioSink), AudioError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoOutputDevice)?;
        let stream_config: cpal::StreamConfig = device.default_output_config()?.into();
        let channels = usize::from(stream_config.channels);
        let sample_rate = stream_config.sample_rate;

        let (sink, consumer) = command_queue();
        let mut state = CallbackState::new(&stream_config, config, consumer);

        let stream = device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| state.fill(data),
            |err| error!("audio stream error: {err}"),
            None,
        )?;
        stream.play()?;

        info!(channels, sample_rate, "audio output open");
        Ok((
            Self {
                _stream: stream,
                channels,
            },
            sink,
        ))
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

struct CallbackState {
    bank: VoiceBank,
    commands: HeapCons<VoiceCommand>,
    channels: usize,
}

impl CallbackState {
    /// Voices render at the rate the device actually runs at.
    fn new(
        stream_config: &cpal::StreamConfig,
        config: &AudioConfig,
        commands: HeapCons<VoiceCommand>,
    ) -> Self {
        Self {
            bank: VoiceBank::new(
                config.adsr.clone(),
                stream_config.sample_rate as f32,
                config.volume,
            ),
            commands,
            channels: usize::from(stream_config.channels),
        }
    }

    fn fill(&mut self, data: &mut [f32]) {
        while let Some(command) = self.commands.try_pop() {
            self.bank.apply(command);
        }
        self.bank.render(data, self.channels);
    }
}
