//! Real-time pacing: hold emission back so wall-clock time advances in
//! lockstep with media time.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Instant;

/// Tolerance of the pacing comparison, in microseconds. Also the
/// rescheduling granularity the filter asks of the session.
pub const RT_PRECISION_US: u64 = 2000;

/// Monotonic microsecond clock, swappable for tests.
pub trait Clock {
    fn now_us(&self) -> u64;
}

/// Wall clock based on [`Instant`].
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_us(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

/// Hand-driven clock for deterministic pacing tests.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance_us(&self, us: u64) {
        self.now.fetch_add(us, Ordering::SeqCst);
    }

    pub fn set_us(&self, us: u64) {
        self.now.store(us, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Decide whether a packet at `cts_us` may go out now.
///
/// Returns `None` to emit, or the remaining wait in microseconds. The caller
/// owns anchor initialization and the late-CTS warning path.
pub(crate) fn hold_for(
    cts_us: u64,
    cts_us_at_init: u64,
    sys_clock_at_init: u64,
    clock_val: u64,
    speed: f64,
) -> Option<u64> {
    let mut media_elapsed = cts_us - cts_us_at_init;
    if speed > 0.0 {
        media_elapsed = (media_elapsed as f64 / speed) as u64;
    } else if speed < 0.0 {
        media_elapsed = (media_elapsed as f64 / -speed) as u64;
    }
    let real_elapsed = clock_val - sys_clock_at_init;
    if real_elapsed + RT_PRECISION_US >= media_elapsed {
        None
    } else {
        Some(media_elapsed - real_elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_within_precision() {
        // 1ms ahead of schedule is inside the precision window
        assert_eq!(hold_for(101_000, 100_000, 0, 0, 1.0), None);
    }

    #[test]
    fn holds_until_media_time() {
        assert_eq!(hold_for(200_000, 100_000, 0, 0, 1.0), Some(100_000));
        assert_eq!(hold_for(200_000, 100_000, 0, 60_000, 1.0), Some(40_000));
        assert_eq!(hold_for(200_000, 100_000, 0, 99_000, 1.0), None);
    }

    #[test]
    fn speed_scales_media_time() {
        // 100ms of media at 2x is 50ms of wall clock
        assert_eq!(hold_for(200_000, 100_000, 0, 0, 2.0), Some(50_000));
        assert_eq!(hold_for(200_000, 100_000, 0, 0, -2.0), Some(50_000));
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_us(), 0);
        clock.advance_us(500);
        assert_eq!(clock.now_us(), 500);
    }
}
