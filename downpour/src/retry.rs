//! Retry budget and backoff schedule for chunk attempts.
//!
//! A flaky origin tends to shed many workers at once; if they all retried
//! on the same beat the origin would see the same burst again. The delay
//! therefore doubles per failure and carries random jitter.

use std::time::Duration;

use rand::Rng;

/// Attempts allowed per chunk, including the first.
pub const MAX_ATTEMPTS: u32 = 5;

/// Delay after the first failure.
pub const INITIAL_DELAY: Duration = Duration::from_millis(250);

/// Upper bound on any single backoff delay (before jitter).
pub const MAX_DELAY: Duration = Duration::from_secs(8);

/// Deterministic backoff for the given failure count (1-based):
/// `INITIAL_DELAY * 2^(failures - 1)`, capped at [`MAX_DELAY`].
pub fn base_delay(failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(16);
    INITIAL_DELAY.saturating_mul(1u32 << exp).min(MAX_DELAY)
}

/// [`base_delay`] plus up to 50% random jitter.
pub fn jittered_delay(failures: u32) -> Duration {
    let base = base_delay(failures);
    let half_ms = base.as_millis() as u64 / 2;
    if half_ms == 0 {
        return base;
    }
    let jitter = rand::thread_rng().gen_range(0..=half_ms);
    base + Duration::from_millis(jitter)
}
