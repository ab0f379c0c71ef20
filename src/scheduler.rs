//! Microtask scheduler with run-to-completion semantics
//!
//! A FIFO queue of deferred thunks per interpreter. Work enqueued while
//! a task is running is appended and picked up by the outer drain loop,
//! so each microstep runs to completion before the next begins. Tasks
//! enqueued before initialization are retained only when the host
//! opted into event deferral.

use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::error::Result;

/// A unit of deferred work
pub type Task = Box<dyn FnOnce() -> Result<()> + Send>;

struct SchedulerState {
    queue: VecDeque<Task>,
    initialized: bool,
    processing: bool,
}

/// Single-threaded cooperative task queue
pub struct Scheduler {
    defer_events: bool,
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    /// Create a scheduler; `defer_events` controls whether pre-init
    /// tasks are buffered or dropped with a warning.
    pub fn new(defer_events: bool) -> Self {
        Self {
            defer_events,
            state: Mutex::new(SchedulerState {
                queue: VecDeque::new(),
                initialized: false,
                processing: false,
            }),
        }
    }

    /// Run `first` synchronously, then drain everything buffered while
    /// uninitialized. After this call the scheduler executes eagerly.
    pub fn initialize(&self, first: Task) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.initialized = true;
        }
        self.process(first)
    }

    /// Enqueue a task. If the queue is idle the task (and anything it
    /// schedules) runs before this call returns; if a task is already
    /// processing, the new task is appended for the active drain loop.
    pub fn schedule(&self, task: Task) -> Result<()> {
        {
            let mut state = self.state.lock();
            if !state.initialized {
                if self.defer_events {
                    state.queue.push_back(task);
                } else {
                    tracing::warn!("task scheduled before initialization was dropped");
                }
                return Ok(());
            }
            if state.processing {
                state.queue.push_back(task);
                return Ok(());
            }
        }
        self.process(task)
    }

    /// Discard all queued tasks. An in-flight task is not interrupted.
    pub fn clear(&self) {
        self.state.lock().queue.clear();
    }

    // Run `task` then drain the queue. Exactly one drain loop is active
    // at a time; the processing flag is restored even when a task fails.
    fn process(&self, task: Task) -> Result<()> {
        self.state.lock().processing = true;

        let mut current = Some(task);
        let mut result = Ok(());

        while let Some(task) = current.take() {
            result = task();
            if result.is_err() {
                break;
            }
            current = self.state.lock().queue.pop_front();
        }

        self.state.lock().processing = false;
        result
    }
}
