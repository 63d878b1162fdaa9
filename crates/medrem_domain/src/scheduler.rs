use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::clock::ManualClock;

pub type Task = Box<dyn FnMut() + Send + 'static>;

pub trait Scheduler: Send + Sync {
    fn schedule_every(&self, name: &str, interval: Duration, task: Task) -> TaskHandle;
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

impl CancelState {
    fn cancel(&self) {
        *self.cancelled.lock() = true;
        self.wake.notify_all();
    }

    fn is_cancelled(&self) -> bool {
        *self.cancelled.lock()
    }
}

/// Cancellation handle; dropping it leaves the task running.
#[derive(Debug)]
pub struct TaskHandle {
    name: String,
    state: Arc<CancelState>,
    thread: Option<JoinHandle<()>>,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel(&self) {
        debug!(task = %self.name, "cancelling scheduled task");
        self.state.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    pub fn join(mut self) {
        self.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(task = %self.name, "scheduled task panicked");
            }
        }
    }
}

/// One OS thread per task, sleeping on a condvar so cancellation is prompt.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
    fn schedule_every(&self, name: &str, interval: Duration, mut task: Task) -> TaskHandle {
        let state = Arc::new(CancelState::default());
        let worker_state = Arc::clone(&state);
        let task_name = name.to_string();
        let thread = thread::Builder::new()
            .name(format!("medrem-{name}"))
            .spawn(move || loop {
                let deadline = Instant::now().checked_add(interval);
                {
                    let mut cancelled = worker_state.cancelled.lock();
                    while !*cancelled {
                        match deadline {
                            Some(deadline) => {
                                if worker_state
                                    .wake
                                    .wait_until(&mut cancelled, deadline)
                                    .timed_out()
                                {
                                    break;
                                }
                            }
                            // Interval past the representable horizon: sleep until cancelled.
                            None => worker_state.wake.wait(&mut cancelled),
                        }
                    }
                    if *cancelled {
                        debug!(task = %task_name, "scheduled task stopped");
                        return;
                    }
                }
                if panic::catch_unwind(AssertUnwindSafe(&mut task)).is_err() {
                    warn!(task = %task_name, "scheduled task panicked, continuing");
                }
            });
        let thread = match thread {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(task = %name, %err, "unable to spawn scheduler thread");
                state.cancel();
                None
            }
        };
        TaskHandle {
            name: name.to_string(),
            state,
            thread,
        }
    }
}

struct ManualTask {
    name: String,
    interval: Duration,
    next_due: Duration,
    state: Arc<CancelState>,
    task: Task,
}

/// Scheduler on logical time; tasks run only inside [`ManualScheduler::advance`].
#[derive(Default)]
pub struct ManualScheduler {
    tasks: Mutex<Vec<ManualTask>>,
    elapsed: Mutex<Duration>,
    clock: Option<Arc<ManualClock>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance `clock` in step with logical time.
    pub fn with_clock(clock: Arc<ManualClock>) -> Self {
        Self {
            clock: Some(clock),
            ..Self::default()
        }
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }

    pub fn active_tasks(&self) -> usize {
        self.tasks
            .lock()
            .iter()
            .filter(|task| !task.state.is_cancelled())
            .count()
    }

    /// Move logical time forward, running every task that falls due in order.
    pub fn advance(&self, by: Duration) {
        let target = self.elapsed().saturating_add(by);
        loop {
            let mut next = {
                let mut tasks = self.tasks.lock();
                tasks.retain(|task| !task.state.is_cancelled());
                let Some(idx) = tasks
                    .iter()
                    .enumerate()
                    .filter(|(_, task)| task.next_due <= target)
                    .min_by_key(|(_, task)| task.next_due)
                    .map(|(idx, _)| idx)
                else {
                    break;
                };
                tasks.remove(idx)
            };
            self.move_to(next.next_due);
            debug!(task = %next.name, "running manual task");
            (next.task)();
            next.next_due = next.next_due.saturating_add(next.interval);
            self.tasks.lock().push(next);
        }
        self.move_to(target);
    }

    fn move_to(&self, at: Duration) {
        let mut elapsed = self.elapsed.lock();
        if at <= *elapsed {
            return;
        }
        if let Some(clock) = &self.clock {
            if let Ok(delta) = chrono::Duration::from_std(at - *elapsed) {
                clock.advance(delta);
            }
        }
        *elapsed = at;
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_every(&self, name: &str, interval: Duration, task: Task) -> TaskHandle {
        let state = Arc::new(CancelState::default());
        let interval = interval.max(Duration::from_millis(1));
        self.tasks.lock().push(ManualTask {
            name: name.to_string(),
            interval,
            next_due: self.elapsed().saturating_add(interval),
            state: Arc::clone(&state),
            task,
        });
        TaskHandle {
            name: name.to_string(),
            state,
            thread: None,
        }
    }
}
