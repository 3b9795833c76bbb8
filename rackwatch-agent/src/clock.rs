//! Wrapping millisecond clock for the tick loop.
//!
//! Time is kept as a 32-bit millisecond counter that overflows roughly every
//! 49.7 days. Elapsed time is always computed with wrapping subtraction, so
//! interval checks stay correct across the overflow.

use std::time::Duration;

use tokio::time::Instant;

/// Monotonic millisecond counter starting at zero when created.
#[derive(Debug, Clone, Copy)]
pub struct UptimeClock {
    origin: Instant,
}

impl UptimeClock {
    /// Start a new clock at zero.
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Milliseconds since start, truncated to 32 bits.
    pub fn now_millis(&self) -> u32 {
        self.origin.elapsed().as_millis() as u32
    }
}

/// Milliseconds elapsed from `since` to `now`, overflow-safe.
pub fn elapsed_millis(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}

/// Whether at least `interval` milliseconds passed between `since` and `now`.
pub fn interval_elapsed(now: u32, since: u32, interval: u32) -> bool {
    elapsed_millis(now, since) >= interval
}

/// Time left until `interval` has elapsed since `since`.
pub fn until_next(now: u32, since: u32, interval: u32) -> Duration {
    let remaining = interval.saturating_sub(elapsed_millis(now, since));
    Duration::from_millis(u64::from(remaining))
}
