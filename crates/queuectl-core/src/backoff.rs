//! Retry backoff policy.

use chrono::Duration;

/// Upper bound on any retry delay: 24 hours.
pub const MAX_DELAY_SECS: u64 = 24 * 3600;

/// Delay in seconds before retry number `attempts`: `base^attempts`, capped at
/// [`MAX_DELAY_SECS`]. `base` is floored at 1.
///
/// The cap is checked before every multiplication, so large attempt counts
/// never overflow.
pub fn delay_secs(base: u32, attempts: u32) -> u64 {
    let base = u64::from(base.max(1));
    if base == 1 {
        return 1;
    }
    let mut delay: u64 = 1;
    for _ in 0..attempts {
        if delay > MAX_DELAY_SECS / base {
            return MAX_DELAY_SECS;
        }
        delay *= base;
    }
    delay
}

pub fn delay(base: u32, attempts: u32) -> Duration {
    // MAX_DELAY_SECS fits comfortably in i64.
    Duration::seconds(delay_secs(base, attempts) as i64)
}
