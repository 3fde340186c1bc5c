use crate::{HostCallback, HostTimingAdapter, Millis, TimerHandle};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

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
    clock: Cell<Millis>,
    next_timer: Cell<u64>,
    state: RefCell<HostState>,
}

/// Deterministic host for tests: a manually advanced virtual clock plus
/// manually pumped callback queues. Clones share the same host.
pub struct VirtualHost {
    inner: Rc<Inner>,
}

impl Clone for VirtualHost {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl VirtualHost {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(Inner {
                clock: Cell::new(0),
                next_timer: Cell::new(1),
                state: RefCell::new(HostState::default()),
            }),
        }
    }

    /// Moves the clock forward and fires every timer that comes due,
    /// including timers armed by the callbacks themselves.
    pub fn advance(&self, delta: Millis) {
        let now = self.inner.clock.get() + delta;
        self.inner.clock.set(now);
        self.fire_due_timers();
    }

    /// Runs the oldest queued `run_soon` callback. Returns false if the turn
    /// queue was empty.
    pub fn run_next_turn(&self) -> bool {
        let turn = self.inner.state.borrow_mut().turns.pop_front();
        match turn {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Pumps the turn queue until it stays empty, returning how many turns
    /// ran. Callbacks that queue further turns keep the pump going.
    pub fn run_all_turns(&self) -> usize {
        let mut ran = 0;
        while self.run_next_turn() {
            ran += 1;
        }
        ran
    }

    pub fn pending_turns(&self) -> usize {
        self.inner.state.borrow().turns.len()
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.state.borrow().timers.len()
    }

    /// Absolute due time of the earliest pending timer.
    pub fn next_timer_due(&self) -> Option<Millis> {
        self.inner
            .state
            .borrow()
            .timers
            .values()
            .map(|timer| timer.due)
            .min()
    }

    fn fire_due_timers(&self) {
        loop {
            let now = self.inner.clock.get();
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
            // Fire in due order; ids are handed out monotonically, so the
            // tie-break preserves arming order.
            due.sort_unstable();
            for (_, id) in due {
                let timer = self.inner.state.borrow_mut().timers.remove(&id);
                if let Some(timer) = timer {
                    tracing::trace!("virtual host firing timer {}", id);
                    (timer.callback)();
                }
            }
        }
    }
}

impl Default for VirtualHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostTimingAdapter for VirtualHost {
    fn now(&self) -> Millis {
        self.inner.clock.get()
    }

    fn run_soon(&self, callback: HostCallback) {
        self.inner.state.borrow_mut().turns.push_back(callback);
    }

    fn run_after(&self, callback: HostCallback, delay: Millis) -> TimerHandle {
        let id = self.inner.next_timer.get();
        self.inner.next_timer.set(id + 1);
        let due = self.inner.clock.get() + delay;
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
