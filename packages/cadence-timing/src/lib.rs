pub mod run_loop;
pub mod virtual_host;

pub use run_loop::RunLoopHost;
pub use virtual_host::VirtualHost;

/// Milliseconds on the host's monotonic clock.
pub type Millis = u64;

/// A deferred callback handed to the host for execution on a later turn.
pub type HostCallback = Box<dyn FnOnce()>;

/// Identity of a delayed callback armed via [`HostTimingAdapter::run_after`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

/// The capability set a scheduler requires from its host event loop.
/// Keeping it behind a trait lets a deterministic virtual clock stand in for
/// the real loop during tests.
pub trait HostTimingAdapter {
    /// Current monotonic time in milliseconds.
    fn now(&self) -> Millis;

    /// Arrange `callback` to run on a future turn of the host loop.
    /// Must never invoke it synchronously within this call.
    fn run_soon(&self, callback: HostCallback);

    /// Arrange `callback` to run after `delay` milliseconds. The returned
    /// handle can cancel the callback before it fires.
    fn run_after(&self, callback: HostCallback, delay: Millis) -> TimerHandle;

    /// Cancel a pending delayed callback. No effect if it already fired.
    fn cancel_timer(&self, handle: TimerHandle);
}
