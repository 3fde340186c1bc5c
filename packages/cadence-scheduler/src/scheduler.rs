use crate::config::SchedulerConfig;
use crate::heap::MinHeap;
use crate::priority::Priority;
use crate::task::{QueueEntry, Task, TaskHandle, TaskKey, WorkOutcome};
use cadence_timing::{HostTimingAdapter, Millis, TimerHandle};
use slotmap::SlotMap;
use std::cell::RefCell;
use std::rc::Rc;

struct State {
    tasks: SlotMap<TaskKey, Task>,
    /// Eligible tasks, ordered by `(deadline, id)`.
    ready: MinHeap<QueueEntry>,
    /// Not-yet-eligible tasks, ordered by `(eligible_at, id)`.
    timers: MinHeap<QueueEntry>,
    next_task_id: u64,
    current_task: Option<TaskKey>,
    current_priority: Option<Priority>,
    slice_start: Millis,
    frame_interval: Millis,
    is_performing_work: bool,
    is_host_callback_scheduled: bool,
    is_message_loop_running: bool,
    armed_timer: Option<TimerHandle>,
}

impl State {
    fn slice_exhausted(&self, now: Millis) -> bool {
        now.saturating_sub(self.slice_start) >= self.frame_interval
    }

    /// Promotes every timer-queue task that has become eligible into the
    /// ready queue, recomputing its sort key from eligibility time to
    /// deadline. Tombstones at the top are discarded without promotion.
    fn advance_timers(&mut self, now: Millis) {
        while let Some(&entry) = self.timers.peek() {
            let pending = match self.tasks.get(entry.key) {
                Some(task) if task.work.is_some() => Some((task.eligible_at, task.deadline)),
                _ => None,
            };
            match pending {
                None => {
                    self.timers.pop();
                    self.tasks.remove(entry.key);
                }
                Some((eligible_at, deadline)) if eligible_at <= now => {
                    self.timers.pop();
                    tracing::trace!("promoting task {} to ready queue", entry.id);
                    self.ready.push(QueueEntry {
                        sort_index: deadline,
                        id: entry.id,
                        key: entry.key,
                    });
                }
                Some(_) => return,
            }
        }
    }
}

struct Inner<H> {
    host: H,
    state: RefCell<State>,
}

/// Cooperative, deadline-ordered task scheduler bound to one host event
/// loop. Clones share the same scheduler, so handles can be captured by the
/// work units themselves.
///
/// All state lives in this one instance; independent schedulers never
/// interfere, which is what makes deterministic testing possible.
pub struct Scheduler<H: HostTimingAdapter + 'static> {
    inner: Rc<Inner<H>>,
}

impl<H: HostTimingAdapter + 'static> Clone for Scheduler<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<H: HostTimingAdapter + 'static> Scheduler<H> {
    pub fn new(host: H) -> Self {
        Self::with_config(host, SchedulerConfig::default())
    }

    pub fn with_config(host: H, config: SchedulerConfig) -> Self {
        Self {
            inner: Rc::new(Inner {
                host,
                state: RefCell::new(State {
                    tasks: SlotMap::with_key(),
                    ready: MinHeap::new(),
                    timers: MinHeap::new(),
                    next_task_id: 1,
                    current_task: None,
                    current_priority: None,
                    slice_start: 0,
                    frame_interval: config.frame_interval,
                    is_performing_work: false,
                    is_host_callback_scheduled: false,
                    is_message_loop_running: false,
                    armed_timer: None,
                }),
            }),
        }
    }

    /// Schedules `work` to run as soon as the host yields a turn.
    pub fn schedule(
        &self,
        priority: Priority,
        work: impl FnOnce(bool) -> WorkOutcome + 'static,
    ) -> TaskHandle {
        self.schedule_after(priority, 0, work)
    }

    /// Schedules `work` to become eligible after `delay` milliseconds. The
    /// deadline is computed from the eligibility time, not from now.
    pub fn schedule_after(
        &self,
        priority: Priority,
        delay: Millis,
        work: impl FnOnce(bool) -> WorkOutcome + 'static,
    ) -> TaskHandle {
        let now = self.inner.host.now();
        let eligible_at = now.saturating_add(delay);
        let deadline = eligible_at.saturating_add(priority.timeout());

        let mut st = self.inner.state.borrow_mut();
        let id = st.next_task_id;
        st.next_task_id += 1;
        let key = st.tasks.insert(Task {
            id,
            priority,
            eligible_at,
            deadline,
            work: Some(Box::new(work)),
        });
        tracing::trace!(
            "scheduled task {} ({:?}, eligible at {}, deadline {})",
            id,
            priority,
            eligible_at,
            deadline
        );

        if eligible_at > now {
            st.timers.push(QueueEntry {
                sort_index: eligible_at,
                id,
                key,
            });
            // Only the earliest timer needs a host wakeup, and only while no
            // ready work will get there first.
            let is_first_timer = st.timers.peek().map(|entry| entry.id) == Some(id);
            if st.ready.is_empty() && is_first_timer {
                drop(st);
                Self::request_host_timeout(&self.inner, eligible_at - now);
            }
        } else {
            st.ready.push(QueueEntry {
                sort_index: deadline,
                id,
                key,
            });
            if !st.is_host_callback_scheduled && !st.is_performing_work {
                st.is_host_callback_scheduled = true;
                drop(st);
                Self::request_host_callback(&self.inner);
            }
        }
        TaskHandle::new(key, id)
    }

    /// Prevents a task's work from running if the work loop has not reached
    /// it yet. Idempotent; a no-op once the task has retired. The entry stays
    /// in its heap as a tombstone and is discarded when next encountered.
    pub fn cancel(&self, handle: TaskHandle) {
        let mut st = self.inner.state.borrow_mut();
        if let Some(task) = st.tasks.get_mut(handle.key) {
            task.work = None;
            tracing::trace!("cancelled task {}", task.id);
        }
    }

    /// Priority of the task currently executing, or `None` outside of
    /// execution. Lets nested work inspect the context it runs under.
    pub fn current_priority(&self) -> Option<Priority> {
        self.inner.state.borrow().current_priority
    }

    /// Id of the task currently executing, if any.
    pub fn current_task_id(&self) -> Option<u64> {
        let st = self.inner.state.borrow();
        st.current_task
            .and_then(|key| st.tasks.get(key))
            .map(|task| task.id)
    }

    /// True once the current time slice has used up its budget. Public so a
    /// running task can decide to chunk its own work and return a
    /// continuation instead of finishing in place.
    pub fn should_yield(&self) -> bool {
        let st = self.inner.state.borrow();
        st.slice_exhausted(self.inner.host.now())
    }

    /// True when neither queue holds a task.
    pub fn is_idle(&self) -> bool {
        let st = self.inner.state.borrow();
        st.ready.is_empty() && st.timers.is_empty()
    }

    fn request_host_callback(inner: &Rc<Inner<H>>) {
        let mut st = inner.state.borrow_mut();
        if !st.is_message_loop_running {
            st.is_message_loop_running = true;
            drop(st);
            Self::post_work_callback(inner);
        }
    }

    fn post_work_callback(inner: &Rc<Inner<H>>) {
        let weak = Rc::downgrade(inner);
        inner.host.run_soon(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                Self::perform_work_until_deadline(&inner);
            }
        }));
    }

    /// Arms the host's delayed callback to fire the timeout handler,
    /// replacing any previously armed timer.
    fn request_host_timeout(inner: &Rc<Inner<H>>, delay: Millis) {
        let stale = inner.state.borrow_mut().armed_timer.take();
        if let Some(stale) = stale {
            inner.host.cancel_timer(stale);
        }
        let weak = Rc::downgrade(inner);
        let handle = inner.host.run_after(
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Self::handle_timeout(&inner);
                }
            }),
            delay,
        );
        inner.state.borrow_mut().armed_timer = Some(handle);
    }

    /// Fired by the host's delayed callback: promote due timers, then either
    /// request a work callback or re-arm for the next timer's remaining wait.
    fn handle_timeout(inner: &Rc<Inner<H>>) {
        let now = inner.host.now();
        let mut st = inner.state.borrow_mut();
        st.armed_timer = None;
        st.advance_timers(now);
        if st.is_host_callback_scheduled {
            return;
        }
        if !st.ready.is_empty() {
            st.is_host_callback_scheduled = true;
            drop(st);
            Self::request_host_callback(inner);
        } else if let Some(&first) = st.timers.peek() {
            let delay = first.sort_index.saturating_sub(now);
            drop(st);
            Self::request_host_timeout(inner, delay);
        }
    }

    /// One host callback's worth of work. Re-posts itself while more work is
    /// pending; this happens through the guard so that a panicking work unit
    /// still leaves the remaining tasks runnable.
    fn perform_work_until_deadline(inner: &Rc<Inner<H>>) {
        if !inner.state.borrow().is_message_loop_running {
            return;
        }
        let current_time = inner.host.now();
        inner.state.borrow_mut().slice_start = current_time;
        let mut guard = LoopGuard {
            inner: Rc::clone(inner),
            has_more: true,
        };
        guard.has_more = Self::flush_work(inner, current_time);
    }

    fn flush_work(inner: &Rc<Inner<H>>, initial_time: Millis) -> bool {
        let previous_priority;
        {
            let mut st = inner.state.borrow_mut();
            st.is_host_callback_scheduled = false;
            previous_priority = st.current_priority;
            st.is_performing_work = true;
            let stale = st.armed_timer.take();
            drop(st);
            if let Some(stale) = stale {
                inner.host.cancel_timer(stale);
            }
        }
        // Bookkeeping must reset even if a work unit panics out of the loop.
        let _guard = FlushGuard {
            inner: Rc::clone(inner),
            previous_priority,
        };
        Self::work_loop(inner, initial_time)
    }

    /// Runs ready tasks in `(deadline, id)` order until the queue drains or
    /// the slice budget runs out with nothing overdue. Returns whether more
    /// work is pending.
    fn work_loop(inner: &Rc<Inner<H>>, initial_time: Millis) -> bool {
        let mut current_time = initial_time;
        inner.state.borrow_mut().advance_timers(current_time);

        loop {
            let mut st_ref = inner.state.borrow_mut();
            let st = &mut *st_ref;

            let Some(&entry) = st.ready.peek() else { break };

            // In the ready queue the sort key is the deadline. Overdue tasks
            // run regardless of the remaining budget; that bounds starvation
            // at the cost of frame latency.
            if entry.sort_index > current_time && st.slice_exhausted(inner.host.now()) {
                return true;
            }

            let Some(task) = st.tasks.get_mut(entry.key) else {
                // Entry left behind by a task that retired off the top.
                st.ready.pop();
                continue;
            };
            let Some(work) = task.work.take() else {
                // Tombstoned by cancellation: discard without executing.
                st.ready.pop();
                st.tasks.remove(entry.key);
                continue;
            };
            let did_timeout = task.deadline <= current_time;
            st.current_task = Some(entry.key);
            st.current_priority = Some(task.priority);
            drop(st_ref);

            tracing::trace!("running task {} (overdue: {})", entry.id, did_timeout);
            let outcome = work(did_timeout);
            current_time = inner.host.now();

            let mut st_ref = inner.state.borrow_mut();
            let st = &mut *st_ref;
            match outcome {
                WorkOutcome::Continue(next) => {
                    // Re-armed in place: the task keeps its id and its
                    // original deadline, so it stays where it already sits
                    // in the queue.
                    if let Some(task) = st.tasks.get_mut(entry.key) {
                        task.work = Some(next);
                    }
                    st.advance_timers(current_time);
                    return true;
                }
                WorkOutcome::Done => {
                    // Pop only if still the minimum; work scheduled during
                    // execution may have displaced it, in which case the
                    // stale entry is discarded on a future encounter.
                    if st.ready.peek().map(|e| e.id) == Some(entry.id) {
                        st.ready.pop();
                    }
                    st.tasks.remove(entry.key);
                    st.advance_timers(current_time);
                }
            }
        }

        // Ready queue drained. Delayed tasks must not be silently lost: arm
        // the host for the earliest one before reporting "no more work".
        let st = inner.state.borrow_mut();
        if let Some(&first) = st.timers.peek() {
            let delay = first.sort_index.saturating_sub(current_time);
            drop(st);
            Self::request_host_timeout(inner, delay);
        }
        false
    }
}

/// Restores the flush bookkeeping (current task, priority context,
/// performing-work flag) on both normal exit and panic unwind.
struct FlushGuard<H: HostTimingAdapter + 'static> {
    inner: Rc<Inner<H>>,
    previous_priority: Option<Priority>,
}

impl<H: HostTimingAdapter + 'static> Drop for FlushGuard<H> {
    fn drop(&mut self) {
        let mut st = self.inner.state.borrow_mut();
        st.current_task = None;
        st.current_priority = self.previous_priority;
        st.is_performing_work = false;
    }
}

/// Keeps the message loop alive while work remains. Runs on panic unwind
/// too, so a task that panics does not strand the tasks behind it.
struct LoopGuard<H: HostTimingAdapter + 'static> {
    inner: Rc<Inner<H>>,
    has_more: bool,
}

impl<H: HostTimingAdapter + 'static> Drop for LoopGuard<H> {
    fn drop(&mut self) {
        if self.has_more {
            Scheduler::post_work_callback(&self.inner);
        } else {
            self.inner.state.borrow_mut().is_message_loop_running = false;
        }
    }
}
