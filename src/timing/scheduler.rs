use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use super::session::{AtomicStatus, PlaybackSession, PlaybackStatus};
use crate::config::PlaybackConfig;
use crate::error::PlaybackError;
use crate::events::NoteEvent;
use crate::sink::{ChordDispatch, SinkFault, SinkSet};

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackUpdate {
    Started { events: usize, speed: f64 },
    Seeked { time_ms: u64 },
    Completed,
    Stopped,
    Failed { message: String },
}

#[derive(Debug, Default)]
struct Control {
    cancel: bool,
    seek: Option<u64>,
}

enum Interrupt {
    Cancel,
    Seek(u64),
}

impl Control {
    /// Cancellation sticks until the next start; a seek is consumed.
    fn take(&mut self) -> Option<Interrupt> {
        if self.cancel {
            return Some(Interrupt::Cancel);
        }
        self.seek.take().map(Interrupt::Seek)
    }
}

#[derive(Debug)]
struct Shared {
    status: AtomicStatus,
    current_time_ms: AtomicU64,
    progress: AtomicU8,
    speed_bits: AtomicU64,
    control: Mutex<Control>,
    wake: Condvar,
}

impl Shared {
    fn speed(&self) -> f64 {
        f64::from_bits(self.speed_bits.load(Ordering::Relaxed))
    }

    fn interrupt(&self, update: impl FnOnce(&mut Control)) {
        update(&mut *self.control.lock());
        self.wake.notify_all();
    }

    fn take_interrupt(&self) -> Option<Interrupt> {
        self.control.lock().take()
    }

    /// Blocks until `delay` has passed or `stop`/`seek` interrupts.
    fn wait(&self, delay: Duration) -> Option<Interrupt> {
        let deadline = Instant::now() + delay;
        let mut control = self.control.lock();
        loop {
            if let Some(interrupt) = control.take() {
                return Some(interrupt);
            }
            if Instant::now() >= deadline {
                return None;
            }
            self.wake.wait_until(&mut control, deadline);
        }
    }

    fn publish(&self, session: &PlaybackSession, total: usize) {
        self.current_time_ms
            .store(session.current_time_ms, Ordering::Relaxed);
        self.progress
            .store(session.progress_percent(total), Ordering::Relaxed);
    }
}

/// Real-time playback of a parsed event list.
///
/// At most one session runs at a time, on its own thread. All control calls
/// are safe from any thread; readers of `status`, `current_time_ms` and
/// `progress` may observe slightly stale values.
pub struct Scheduler {
    sinks: SinkSet,
    max_silence: Duration,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    update_tx: Sender<PlaybackUpdate>,
    update_rx: Receiver<PlaybackUpdate>,
}

impl Scheduler {
    pub fn new(sinks: SinkSet, config: &PlaybackConfig) -> Self {
        let (update_tx, update_rx) = channel::unbounded();
        Self {
            sinks,
            max_silence: config.max_silence(),
            shared: Arc::new(Shared {
                status: AtomicStatus::new(PlaybackStatus::Idle),
                current_time_ms: AtomicU64::new(0),
                progress: AtomicU8::new(0),
                speed_bits: AtomicU64::new(config.default_speed.to_bits()),
                control: Mutex::new(Control::default()),
                wake: Condvar::new(),
            }),
            worker: Mutex::new(None),
            update_tx,
            update_rx,
        }
    }

    pub fn start(&self, events: Arc<[NoteEvent]>, speed_factor: f64) -> Result<(), PlaybackError> {
        validate_speed(speed_factor)?;

        let mut worker = self.worker.lock();
        if self.status().is_active() && worker.as_ref().is_some_and(JoinHandle::is_finished) {
            if let Some(dead) = worker.take() {
                if dead.join().is_err() {
                    error!("previous playback thread panicked");
                }
            }
            self.shared.status.store(PlaybackStatus::Stopped);
        }
        if self.status().is_active() {
            warn!("start rejected, playback already running");
            return Err(PlaybackError::AlreadyPlaying);
        }
        if let Some(finished) = worker.take() {
            let _ = finished.join();
        }

        {
            let mut control = self.shared.control.lock();
            control.cancel = false;
            self.shared
                .current_time_ms
                .store(control.seek.unwrap_or(0), Ordering::Relaxed);
        }
        self.shared
            .speed_bits
            .store(speed_factor.to_bits(), Ordering::Relaxed);
        self.shared.progress.store(0, Ordering::Relaxed);
        self.shared.status.store(PlaybackStatus::Playing);

        let total = events.len();
        let _ = self.update_tx.send(PlaybackUpdate::Started {
            events: total,
            speed: speed_factor,
        });

        let run = Worker {
            events,
            sinks: self.sinks.clone(),
            shared: Arc::clone(&self.shared),
            max_silence: self.max_silence,
            updates: self.update_tx.clone(),
        };
        let handle = thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || run.run())
            .map_err(|e| {
                self.shared.status.store(PlaybackStatus::Idle);
                PlaybackError::Spawn(e)
            })?;
        *worker = Some(handle);

        info!(events = total, speed = speed_factor, "playback started");
        Ok(())
    }

    /// Cancels the running session and waits for its thread to finish.
    pub fn stop(&self) -> Result<(), PlaybackError> {
        let handle = {
            let mut worker = self.worker.lock();
            if !self.status().is_active() {
                return Err(PlaybackError::NotPlaying);
            }
            self.shared.interrupt(|control| control.cancel = true);
            worker.take()
        };

        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return Ok(());
            }
            handle.join().map_err(|_| {
                self.shared.status.store(PlaybackStatus::Stopped);
                PlaybackError::WorkerPanicked
            })?;
        }
        Ok(())
    }

    /// Repositions the cursor. When idle the position is kept for the next
    /// `start`.
    pub fn seek(&self, target_ms: u64) {
        self.shared
            .interrupt(|control| control.seek = Some(target_ms));
        self.shared
            .current_time_ms
            .store(target_ms, Ordering::Relaxed);
        debug!(target_ms, "seek requested");
    }

    /// Takes effect from the next inter-event wait; a wait in progress keeps
    /// the duration it started with.
    pub fn set_speed(&self, speed_factor: f64) -> Result<(), PlaybackError> {
        validate_speed(speed_factor)?;
        self.shared
            .speed_bits
            .store(speed_factor.to_bits(), Ordering::Relaxed);
        debug!(speed = speed_factor, "speed changed");
        Ok(())
    }

    pub fn reset(&self) -> Result<(), PlaybackError> {
        match self.stop() {
            Ok(()) | Err(PlaybackError::NotPlaying) => {}
            Err(e) => return Err(e),
        }

        self.shared.control.lock().seek = None;
        self.shared.current_time_ms.store(0, Ordering::Relaxed);
        self.shared.progress.store(0, Ordering::Relaxed);
        self.shared.status.store(PlaybackStatus::Idle);
        if let Err(fault) = self.sinks.all_notes_off() {
            warn!("{fault}");
        }
        Ok(())
    }

    pub fn status(&self) -> PlaybackStatus {
        self.shared.status.load()
    }

    pub fn current_time_ms(&self) -> u64 {
        self.shared.current_time_ms.load(Ordering::Relaxed)
    }

    pub fn progress(&self) -> u8 {
        self.shared.progress.load(Ordering::Relaxed)
    }

    pub fn speed(&self) -> f64 {
        self.shared.speed()
    }

    pub fn updates(&self) -> Receiver<PlaybackUpdate> {
        self.update_rx.clone()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn validate_speed(speed_factor: f64) -> Result<(), PlaybackError> {
    if speed_factor.is_finite() && speed_factor > 0.0 {
        Ok(())
    } else {
        Err(PlaybackError::InvalidSpeed(speed_factor))
    }
}

enum Outcome {
    Completed,
    Stopped,
    Failed(SinkFault),
}

struct Worker {
    events: Arc<[NoteEvent]>,
    sinks: SinkSet,
    shared: Arc<Shared>,
    max_silence: Duration,
    updates: Sender<PlaybackUpdate>,
}

impl Worker {
    fn run(self) {
        let mut session = PlaybackSession::new(self.shared.speed());
        let dispatch = ChordDispatch::new();
        let outcome = self.play(&mut session, &dispatch);
        let outcome = self.settle(dispatch, outcome);
        self.finish(&mut session, outcome);
    }

    /// Waits out every in-flight note begin so none lands after the final
    /// all-notes-off. A late fault turns a completed run into a failed one.
    fn settle(&self, dispatch: ChordDispatch, outcome: Outcome) -> Outcome {
        match outcome {
            Outcome::Completed => match dispatch.settle() {
                Some(fault) => Outcome::Failed(fault),
                None => Outcome::Completed,
            },
            outcome => {
                dispatch.cancel();
                if let Some(fault) = dispatch.settle() {
                    debug!("fault after playback ended: {fault}");
                }
                outcome
            }
        }
    }

    fn play(&self, session: &mut PlaybackSession, dispatch: &ChordDispatch) -> Outcome {
        loop {
            match self.shared.take_interrupt() {
                Some(Interrupt::Cancel) => return Outcome::Stopped,
                Some(Interrupt::Seek(target_ms)) => {
                    self.apply_seek(session, target_ms);
                    continue;
                }
                None => {}
            }
            if let Some(fault) = dispatch.fault() {
                return Outcome::Failed(fault);
            }

            let Some(event) = self.events.get(session.cursor_index) else {
                return Outcome::Completed;
            };

            session.speed_factor = self.shared.speed();
            let delay = session.delay_until(event.timestamp_ms, self.max_silence);
            match self.shared.wait(delay) {
                Some(Interrupt::Cancel) => return Outcome::Stopped,
                Some(Interrupt::Seek(target_ms)) => {
                    self.apply_seek(session, target_ms);
                    continue;
                }
                None => {}
            }
            if let Some(fault) = dispatch.fault() {
                return Outcome::Failed(fault);
            }

            if let Err(fault) = self.sinks.begin_chord(event, dispatch) {
                return Outcome::Failed(fault);
            }
            session.mark_dispatched(event.timestamp_ms);
            self.shared.publish(session, self.events.len());

            let percent = session.progress_percent(self.events.len());
            if let Err(fault) = self.sinks.progress(percent) {
                return Outcome::Failed(fault);
            }
        }
    }

    fn apply_seek(&self, session: &mut PlaybackSession, target_ms: u64) {
        self.shared.status.store(PlaybackStatus::Seeking);
        session.seek(&self.events, target_ms);
        debug!(target_ms, cursor = session.cursor_index, "seek applied");

        if target_ms == 0 {
            self.silence();
        }
        self.shared.publish(session, self.events.len());
        self.shared.status.store(PlaybackStatus::Playing);
        let _ = self.updates.send(PlaybackUpdate::Seeked { time_ms: target_ms });
    }

    fn finish(&self, session: &mut PlaybackSession, outcome: Outcome) {
        let update = match outcome {
            Outcome::Completed => {
                session.status = PlaybackStatus::Completed;
                info!("playback completed");
                PlaybackUpdate::Completed
            }
            Outcome::Stopped => {
                self.silence();
                session.status = PlaybackStatus::Stopped;
                info!(at_ms = session.current_time_ms, "playback stopped");
                PlaybackUpdate::Stopped
            }
            Outcome::Failed(fault) => {
                error!("playback aborted: {fault}");
                self.silence();
                session.status = PlaybackStatus::Stopped;
                PlaybackUpdate::Failed {
                    message: fault.to_string(),
                }
            }
        };

        self.shared.status.store(session.status);
        let _ = self.updates.send(update);
    }

    fn silence(&self) {
        if let Err(fault) = self.sinks.all_notes_off() {
            warn!("{fault}");
        }
    }
}
