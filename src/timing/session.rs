use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use crate::events::NoteEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlaybackStatus {
    Idle,
    Playing,
    Seeking,
    Stopped,
    Completed,
}

impl PlaybackStatus {
    /// Playing or in the middle of a seek.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Playing | Self::Seeking)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Playing,
            2 => Self::Seeking,
            3 => Self::Stopped,
            4 => Self::Completed,
            _ => Self::Idle,
        }
    }
}

#[derive(Debug)]
pub(crate) struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    pub(crate) fn new(status: PlaybackStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    pub(crate) fn load(&self) -> PlaybackStatus {
        PlaybackStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, status: PlaybackStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

/// Cursor state of one playback run. Only the worker thread mutates it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSession {
    pub status: PlaybackStatus,
    pub cursor_index: usize,
    pub current_time_ms: u64,
    pub speed_factor: f64,
    pub last_dispatched_timestamp_ms: u64,
}

impl PlaybackSession {
    pub fn new(speed_factor: f64) -> Self {
        Self {
            status: PlaybackStatus::Playing,
            cursor_index: 0,
            current_time_ms: 0,
            speed_factor,
            last_dispatched_timestamp_ms: 0,
        }
    }

    /// Moves the cursor to the first event at or after `target_ms`.
    pub fn seek(&mut self, events: &[NoteEvent], target_ms: u64) {
        self.cursor_index = events.partition_point(|e| e.timestamp_ms < target_ms);
        self.current_time_ms = target_ms;
        self.last_dispatched_timestamp_ms = target_ms;
    }

    /// Wait before dispatching an event at `timestamp_ms`, scaled by speed and
    /// capped at `max_silence`.
    pub fn delay_until(&self, timestamp_ms: u64, max_silence: Duration) -> Duration {
        let gap_ms = timestamp_ms.saturating_sub(self.last_dispatched_timestamp_ms) as f64;
        Duration::try_from_secs_f64(gap_ms / self.speed_factor / 1000.0)
            .map_or(max_silence, |scaled| scaled.min(max_silence))
    }

    pub fn mark_dispatched(&mut self, timestamp_ms: u64) {
        self.last_dispatched_timestamp_ms = timestamp_ms;
        self.current_time_ms = timestamp_ms;
        self.cursor_index += 1;
    }

    pub fn progress_percent(&self, total: usize) -> u8 {
        if total == 0 {
            return 100;
        }
        (self.cursor_index.min(total) * 100 / total) as u8
    }
}
