use cadence_timing::Millis;

/// Relative urgency of a scheduled task, from most to least urgent.
/// Priority never orders the ready queue directly; it only determines how
/// far past its eligibility time a task's deadline lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Runs before anything else; overdue the moment it becomes eligible.
    Immediate,
    /// Interaction-latency sensitive work.
    UserBlocking,
    /// The default.
    Normal,
    /// Deferrable work.
    Low,
    /// Runs only when nothing else is pending.
    Idle,
}

pub const USER_BLOCKING_TIMEOUT: Millis = 250;
pub const NORMAL_TIMEOUT: Millis = 5_000;
pub const LOW_TIMEOUT: Millis = 10_000;
/// Max signed 31-bit milliseconds, ~12 days: far enough out that idle work
/// never becomes overdue on its own.
pub const IDLE_TIMEOUT: Millis = 1_073_741_823;

impl Priority {
    /// Timeout added to a task's eligibility time to form its deadline.
    pub fn timeout(self) -> Millis {
        match self {
            Priority::Immediate => 0,
            Priority::UserBlocking => USER_BLOCKING_TIMEOUT,
            Priority::Normal => NORMAL_TIMEOUT,
            Priority::Low => LOW_TIMEOUT,
            Priority::Idle => IDLE_TIMEOUT,
        }
    }
}
