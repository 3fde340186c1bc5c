use cadence_timing::Millis;
use thiserror::Error;

/// Default time-slice budget before the work loop yields back to the host.
pub const DEFAULT_FRAME_INTERVAL: Millis = 5;

const MIN_FRAME_RATE: u32 = 1;
const MAX_FRAME_RATE: u32 = 125;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("frame rate must be between 1 and 125 fps, got {0}")]
    FrameRateOutOfRange(u32),
}

/// Tuning knobs for a scheduler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Time-slice budget in milliseconds. Overdue tasks ignore it.
    pub frame_interval: Millis,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frame_interval: DEFAULT_FRAME_INTERVAL,
        }
    }
}

impl SchedulerConfig {
    /// Derives the slice budget from a target frame rate.
    pub fn with_frame_rate(fps: u32) -> Result<Self, ConfigError> {
        if !(MIN_FRAME_RATE..=MAX_FRAME_RATE).contains(&fps) {
            return Err(ConfigError::FrameRateOutOfRange(fps));
        }
        Ok(Self {
            frame_interval: 1_000 / Millis::from(fps),
        })
    }
}
