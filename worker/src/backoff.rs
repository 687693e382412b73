//! Retry delays for polling and status updates
//!
//! Delay is `2^(retry + 3) * 100ms` with up to 10% jitter, capped at 60
//! seconds. The first retry therefore sleeps about 1.6 seconds.

use std::time::Duration;

use rand::Rng;

const RETRY_OFFSET: u32 = 3;
const BASE_MILLIS: u64 = 100;
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Backoff delay for the nth retry of polling or reporting
#[must_use]
pub fn backoff_delay(retry: u32) -> Duration {
    // exponent clamped so the shift cannot overflow before the cap applies
    let exponent = (retry + RETRY_OFFSET).min(20);
    let millis = BASE_MILLIS.saturating_mul(1u64 << exponent);
    let delay = Duration::from_millis(millis);
    let jittered = delay.mul_f64(1.0 + rand::thread_rng().gen_range(0.0..0.1));
    jittered.min(MAX_DELAY)
}

/// Backoff for replaying a sidecar exec after an internal server error:
/// 5s, 10s, 20s, ...
#[must_use]
pub fn internal_error_delay(attempt: u32) -> Duration {
    Duration::from_secs(5) * 2u32.pow(attempt.min(10))
}
