use crate::heap::HeapItem;
use crate::priority::Priority;
use cadence_timing::Millis;
use slotmap::new_key_type;

new_key_type! {
    pub(crate) struct TaskKey;
}

/// One invocation of deferred work. Receives `true` when the task is already
/// past its deadline, so the work can choose to skip its own chunking.
pub type WorkUnit = Box<dyn FnOnce(bool) -> WorkOutcome>;

/// What a work unit produced: either it finished, or it split itself and
/// handed back the remainder to resume under the same task identity.
pub enum WorkOutcome {
    Done,
    Continue(WorkUnit),
}

impl WorkOutcome {
    /// Wraps `work` as a continuation outcome.
    pub fn continue_with(work: impl FnOnce(bool) -> WorkOutcome + 'static) -> Self {
        WorkOutcome::Continue(Box::new(work))
    }
}

pub(crate) struct Task {
    pub id: u64,
    pub priority: Priority,
    pub eligible_at: Millis,
    pub deadline: Millis,
    /// `None` marks a tombstone: cancelled, or currently being invoked.
    pub work: Option<WorkUnit>,
}

/// Identity handle returned by `schedule`; pass it back to `cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    pub(crate) key: TaskKey,
    id: u64,
}

impl TaskHandle {
    pub(crate) fn new(key: TaskKey, id: u64) -> Self {
        Self { key, id }
    }

    /// The task's unique, monotonically assigned id.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Heap-resident reference to an arena task. `sort_index` is the eligibility
/// time while the entry sits in the timer queue and the deadline once it
/// moves to the ready queue.
#[derive(Debug, Clone, Copy)]
pub(crate) struct QueueEntry {
    pub sort_index: Millis,
    pub id: u64,
    pub key: TaskKey,
}

impl HeapItem for QueueEntry {
    fn sort_index(&self) -> Millis {
        self.sort_index
    }

    fn id(&self) -> u64 {
        self.id
    }
}
