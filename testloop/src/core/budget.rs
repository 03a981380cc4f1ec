//! Retry budget helpers for deterministic orchestration.

use std::time::Duration;

/// Exponential backoff delay before retry number `attempt` (1-based).
///
/// `base * 2^(attempt-1)`, capped at `max`. Attempt 0 yields no delay.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}
