use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::SinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb::new(0, 0, 0);
    pub const NOTE_ON: Rgb = Rgb::new(255, 100, 0);
    pub const STANDBY: Rgb = Rgb::new(0, 40, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// `brightness` is clamped to 0.0 -> 1.0
    pub fn scaled(self, brightness: f32) -> Self {
        let brightness = brightness.clamp(0.0, 1.0);
        let channel = |c: u8| (f32::from(c) * brightness).round() as u8;
        Self::new(channel(self.r), channel(self.g), channel(self.b))
    }
}

/// A strip of addressable lights, one per key.
///
/// `set` and `clear_all` only touch the back buffer; nothing is visible until
/// `show`.
pub trait IndicatorDriver: Send {
    fn len(&self) -> usize;

    fn set(&mut self, index: usize, color: Rgb) -> Result<(), SinkError>;

    fn clear_all(&mut self) -> Result<(), SinkError>;

    fn show(&mut self) -> Result<(), SinkError>;
}

/// In-memory strip for running without hardware.
pub struct SimulatedStrip {
    pending: Vec<Rgb>,
    shown: Arc<Mutex<Vec<Rgb>>>,
}

impl SimulatedStrip {
    pub fn new(len: usize) -> Self {
        Self {
            pending: vec![Rgb::OFF; len],
            shown: Arc::new(Mutex::new(vec![Rgb::OFF; len])),
        }
    }

    /// Handle on the last shown frame; stays valid after the strip moves to
    /// its driver thread.
    pub fn frame(&self) -> Arc<Mutex<Vec<Rgb>>> {
        Arc::clone(&self.shown)
    }
}

impl IndicatorDriver for SimulatedStrip {
    fn len(&self) -> usize {
        self.pending.len()
    }

    fn set(&mut self, index: usize, color: Rgb) -> Result<(), SinkError> {
        let len = self.pending.len();
        let pixel = self
            .pending
            .get_mut(index)
            .ok_or_else(|| SinkError::Failed(format!("pixel {index} out of range for strip of {len}")))?;
        *pixel = color;
        Ok(())
    }

    fn clear_all(&mut self) -> Result<(), SinkError> {
        self.pending.fill(Rgb::OFF);
        Ok(())
    }

    fn show(&mut self) -> Result<(), SinkError> {
        self.shown.lock().clone_from(&self.pending);
        Ok(())
    }
}
