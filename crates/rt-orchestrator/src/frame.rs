//! The nine-step frame ordering (§4.6) and the state it carries between
//! frames. [`crate::Runtime::run_frame`] is the actual pump; this module
//! holds the small pieces of state and arithmetic shared across frames so
//! that logic isn't buried inline in the run loop.

use std::time::Duration;

/// §4.6 step 6: `Δt` is clamped to this many milliseconds regardless of how
/// long the previous frame actually took, so a debugger pause or a slow
/// bundle fetch never produces a guest-visible time jump large enough to
/// break physics/animation assumptions.
pub const MAX_FRAME_DT_MS: u32 = 1_000;

/// §4.6 step 8: backgrounded frames are capped to this rate rather than
/// spinning at the foreground frame rate with nothing to present.
pub const BACKGROUND_TICK_HZ: f64 = 2.0;

#[must_use]
pub fn background_sleep_interval() -> Duration {
    Duration::from_secs_f64(1.0 / BACKGROUND_TICK_HZ)
}

/// `now - last_time`, clamped to [`MAX_FRAME_DT_MS`] and floored at zero (a
/// backwards clock reading, e.g. after a time-event replay in tests, never
/// produces a negative delta).
#[must_use]
pub fn clamp_dt_ms(now_ms: i64, last_time_ms: i64) -> u32 {
    let raw = now_ms.saturating_sub(last_time_ms).max(0);
    u32::try_from(raw).unwrap_or(u32::MAX).min(MAX_FRAME_DT_MS)
}

/// Whether the render device and canvas context are currently live.
/// Backgrounding tears them down while keeping the bus, HTTP, thread pool,
/// and reporting alive; foregrounding reinstates them (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundState {
    Foreground,
    Backgrounded,
}

/// What the frame pump decided to do at step 9, reported back to
/// [`crate::Runtime::run`] so it can act (loop again, tear down for a
/// restart, or exit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Continue,
    RestartRequested,
    BackgroundRequested,
    ForegroundRequested,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dt_is_clamped_to_one_second() {
        assert_eq!(clamp_dt_ms(5_000, 0), MAX_FRAME_DT_MS);
    }

    #[test]
    fn dt_is_floored_at_zero_on_a_backwards_clock() {
        assert_eq!(clamp_dt_ms(0, 100), 0);
    }

    #[test]
    fn ordinary_dt_passes_through() {
        assert_eq!(clamp_dt_ms(116, 100), 16);
    }
}
