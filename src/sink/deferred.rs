use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, trace};

use crate::error::SinkError;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Pending {
    due: Instant,
    seq: u64,
    generation: u64,
    task: Task,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        (self.due, self.seq) == (other.due, other.seq)
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

enum TimerCommand {
    Schedule(Pending),
    Shutdown,
}

/// A group of delayed closures run on one timer thread.
///
/// `cancel_all` drops everything scheduled so far; tasks scheduled afterwards
/// run normally.
pub struct DeferredTasks {
    tx: Sender<TimerCommand>,
    generation: Arc<AtomicU64>,
    seq: AtomicU64,
    timer: Option<JoinHandle<()>>,
}

impl DeferredTasks {
    pub fn new(name: &str) -> Result<Self, SinkError> {
        let (tx, rx) = channel::unbounded();
        let generation = Arc::new(AtomicU64::new(0));

        let timer_generation = Arc::clone(&generation);
        let timer = thread::Builder::new()
            .name(format!("{name}-timer"))
            .spawn(move || timer_thread(rx, timer_generation))
            .map_err(|e| SinkError::Spawn("deferred timer", e))?;

        Ok(Self {
            tx,
            generation,
            seq: AtomicU64::new(0),
            timer: Some(timer),
        })
    }

    pub fn schedule(&self, delay: Duration, task: impl FnOnce() + Send + 'static) {
        let pending = Pending {
            due: Instant::now() + delay,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            generation: self.generation.load(Ordering::Acquire),
            task: Box::new(task),
        };
        if self.tx.send(TimerCommand::Schedule(pending)).is_err() {
            debug!("deferred task dropped, timer thread is gone");
        }
    }

    pub fn cancel_all(&self) {
        let previous = self.generation.fetch_add(1, Ordering::AcqRel);
        trace!(generation = previous + 1, "deferred tasks cancelled");
    }
}

impl Drop for DeferredTasks {
    fn drop(&mut self) {
        let _ = self.tx.send(TimerCommand::Shutdown);
        if let Some(timer) = self.timer.take() {
            if timer.thread().id() != thread::current().id() {
                let _ = timer.join();
            }
        }
    }
}

fn timer_thread(rx: Receiver<TimerCommand>, generation: Arc<AtomicU64>) {
    let mut queue: BinaryHeap<Reverse<Pending>> = BinaryHeap::new();

    loop {
        let command = match queue.peek() {
            Some(Reverse(next)) => match rx.recv_deadline(next.due) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            },
        };

        match command {
            Some(TimerCommand::Schedule(pending)) => queue.push(Reverse(pending)),
            Some(TimerCommand::Shutdown) => break,
            None => {}
        }

        let now = Instant::now();
        while queue.peek().is_some_and(|Reverse(p)| p.due <= now) {
            let Some(Reverse(pending)) = queue.pop() else {
                break;
            };
            if pending.generation == generation.load(Ordering::Acquire) {
                (pending.task)();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn runs_tasks_in_due_order() {
        let tasks = DeferredTasks::new("test").unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (delay, label) in [(60, "late"), (10, "early"), (30, "middle")] {
            let order = Arc::clone(&order);
            tasks.schedule(Duration::from_millis(delay), move || order.lock().push(label));
        }

        thread::sleep(Duration::from_millis(200));
        assert_eq!(*order.lock(), vec!["early", "middle", "late"]);
    }

    #[test]
    fn cancel_all_drops_pending_tasks_only() {
        let tasks = DeferredTasks::new("test").unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            tasks.schedule(Duration::from_millis(50), move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        tasks.cancel_all();

        let after = Arc::clone(&ran);
        tasks.schedule(Duration::from_millis(10), move || {
            after.fetch_add(10, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(150));
        assert_eq!(ran.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn drop_does_not_run_pending_tasks() {
        let ran = Arc::new(AtomicUsize::new(0));
        {
            let tasks = DeferredTasks::new("test").unwrap();
            let ran = Arc::clone(&ran);
            tasks.schedule(Duration::from_millis(20), move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        thread::sleep(Duration::from_millis(60));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
