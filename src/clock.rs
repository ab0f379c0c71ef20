//! Abstract timer primitive consumed by delayed sends
//!
//! The interpreter never sleeps; it hands delayed work to a [`Clock`]
//! and keeps the returned handle so a cancel action (or `stop()`) can
//! retract the timer before it fires.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Opaque handle for a scheduled timer
pub type TimerId = u64;

/// Deferred thunk run when a timer fires
pub type TimerFn = Box<dyn FnOnce() + Send>;

/// Timer primitive: schedule a thunk after a delay, cancel by handle.
///
/// Cancellation must be exact: once `clear_timeout` returns, the
/// callback will never run.
pub trait Clock: Send + Sync {
    /// Schedule `callback` to run once after `delay`
    fn set_timeout(&self, delay: Duration, callback: TimerFn) -> TimerId;

    /// Cancel a pending timer. Unknown or already-fired handles are
    /// ignored.
    fn clear_timeout(&self, id: TimerId);
}

/// Wall-clock implementation backed by one thread per pending timer.
///
/// Suitable as a default for hosts without their own timer wheel; heavy
/// timer users should supply a shared implementation instead.
pub struct SystemClock {
    next_id: AtomicU64,
    pending: Mutex<BTreeMap<TimerId, Arc<AtomicBool>>>,
}

impl SystemClock {
    /// Create a new wall clock
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(BTreeMap::new()),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn set_timeout(&self, delay: Duration, callback: TimerFn) -> TimerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        self.pending.lock().insert(id, Arc::clone(&cancelled));

        std::thread::spawn(move || {
            std::thread::sleep(delay);
            if !cancelled.load(Ordering::Acquire) {
                callback();
            }
        });

        id
    }

    fn clear_timeout(&self, id: TimerId) {
        if let Some(flag) = self.pending.lock().remove(&id) {
            flag.store(true, Ordering::Release);
        }
    }
}

/// Deterministic clock: time only moves when [`advance`](VirtualClock::advance)
/// is called, firing due timers in deadline order.
pub struct VirtualClock {
    next_id: AtomicU64,
    inner: Mutex<VirtualState>,
}

struct VirtualState {
    now: Duration,
    // keyed by (deadline, id) so equal deadlines fire in schedule order
    pending: BTreeMap<(Duration, TimerId), TimerFn>,
}

impl VirtualClock {
    /// Create a virtual clock at time zero
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            inner: Mutex::new(VirtualState {
                now: Duration::ZERO,
                pending: BTreeMap::new(),
            }),
        }
    }

    /// Current virtual time
    pub fn now(&self) -> Duration {
        self.inner.lock().now
    }

    /// Number of timers not yet fired or cancelled
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Advance virtual time, running every timer whose deadline is
    /// reached. Callbacks run outside the clock lock and may schedule
    /// further timers; those fire only if still within the new time.
    pub fn advance(&self, by: Duration) {
        let target = self.inner.lock().now + by;

        loop {
            let due = {
                let mut state = self.inner.lock();
                match state.pending.keys().next().copied() {
                    Some((deadline, id)) if deadline <= target => {
                        state.now = deadline;
                        state.pending.remove(&(deadline, id))
                    }
                    _ => {
                        state.now = target;
                        None
                    }
                }
            };

            match due {
                Some(callback) => callback(),
                None => break,
            }
        }
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for VirtualClock {
    fn set_timeout(&self, delay: Duration, callback: TimerFn) -> TimerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.inner.lock();
        let deadline = state.now + delay;
        state.pending.insert((deadline, id), callback);
        id
    }

    fn clear_timeout(&self, id: TimerId) {
        let mut state = self.inner.lock();
        let key = state
            .pending
            .keys()
            .find(|(_, timer)| *timer == id)
            .copied();
        if let Some(key) = key {
            state.pending.remove(&key);
        }
    }
}
