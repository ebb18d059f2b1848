//! Pacing between page requests and back-off after soft blocks.
//!
//! Both delays carry ±25 % jitter so consecutive requests from the same
//! identity never land on a fixed cadence. Back-off grows exponentially with
//! the number of consecutive soft blocks and is capped at 60 s.

use std::time::Duration;

/// Upper bound for a single back-off sleep.
pub const MAX_DELAY_MS: u64 = 60_000;

/// Applies ±25 % jitter to `base_ms`.
#[must_use]
pub fn jittered(base_ms: u64) -> Duration {
    if base_ms == 0 {
        return Duration::ZERO;
    }
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let ms = (base_ms as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
    Duration::from_millis(ms)
}

/// Back-off before re-fetching after the `attempt`-th consecutive soft block
/// (1-based).
///
/// | Attempt | Sleep                          |
/// |---------|--------------------------------|
/// | 1       | base × 2⁰ ± 25 % jitter        |
/// | 2       | base × 2¹ ± 25 % jitter        |
/// | 3       | base × 2² ± 25 % jitter        |
#[must_use]
pub fn backoff_delay(backoff_base_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(10);
    let computed = backoff_base_ms.saturating_mul(1u64 << exponent);
    jittered(computed.min(MAX_DELAY_MS))
}

/// Sleeps for `delay`, logging it at debug level.
pub async fn pause(delay: Duration, why: &'static str) {
    if delay.is_zero() {
        return;
    }
    tracing::debug!(delay_ms = delay.as_millis(), why, "pausing");
    tokio::time::sleep(delay).await;
}
