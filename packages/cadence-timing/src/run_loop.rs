use crate::{HostCallback, HostTimingAdapter, Millis, TimerHandle};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

struct PendingTimer {
    due: Millis,
    callback: HostCallback,
}

#[derive(Default)]
struct HostState {
    turns: VecDeque<HostCallback>,
    timers: FxHashMap<u64, PendingTimer>,
}

struct Inner {
    origin: Instant,
    next_timer: Cell<u64>,
    state: RefCell<HostState>,
}

/// Blocking host backed by the std monotonic clock. `run_until_idle` drives
/// queued turns and due timers on the calling thread, sleeping between
/// timers, until no work remains. Clones share the same host.
pub struct RunLoopHost {
    inner: Rc<Inner>,
}

impl Clone for RunLoopHost {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl RunLoopHost {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(Inner {
                origin: Instant::now(),
                next_timer: Cell::new(1),
                state: RefCell::new(HostState::default()),
            }),
        }
    }

    /// Drains the turn queue, then sleeps until the earliest pending timer
    /// and fires it, repeating until both queues are empty.
    pub fn run_until_idle(&self) {
        loop {
            loop {
                let turn = self.inner.state.borrow_mut().turns.pop_front();
                match turn {
                    Some(callback) => callback(),
                    None => break,
                }
            }

            let next_due = {
                let state = self.inner.state.borrow();
                state.timers.values().map(|timer| timer.due).min()
            };
            let Some(due) = next_due else { break };

            let now = self.now();
            if due > now {
                tracing::trace!("run loop sleeping {}ms until next timer", due - now);
                thread::sleep(Duration::from_millis(due - now));
            }
            self.fire_due_timers();
        }
    }

    fn fire_due_timers(&self) {
        loop {
            let now = self.now();
            let mut due: SmallVec<[(Millis, u64); 4]> = {
                let state = self.inner.state.borrow();
                state
                    .timers
                    .iter()
                    .filter(|(_, timer)| timer.due <= now)
                    .map(|(&id, timer)| (timer.due, id))
                    .collect()
            };
            if due.is_empty() {
                return;
            }
            due.sort_unstable();
            for (_, id) in due {
                let timer = self.inner.state.borrow_mut().timers.remove(&id);
                if let Some(timer) = timer {
                    (timer.callback)();
                }
            }
        }
    }
}

impl Default for RunLoopHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostTimingAdapter for RunLoopHost {
    fn now(&self) -> Millis {
        self.inner.origin.elapsed().as_millis() as Millis
    }

    fn run_soon(&self, callback: HostCallback) {
        self.inner.state.borrow_mut().turns.push_back(callback);
    }

    fn run_after(&self, callback: HostCallback, delay: Millis) -> TimerHandle {
        let id = self.inner.next_timer.get();
        self.inner.next_timer.set(id + 1);
        let due = self.now() + delay;
        self.inner
            .state
            .borrow_mut()
            .timers
            .insert(id, PendingTimer { due, callback });
        TimerHandle::from_raw(id)
    }

    fn cancel_timer(&self, handle: TimerHandle) {
        self.inner.state.borrow_mut().timers.remove(&handle.as_raw());
    }
}
