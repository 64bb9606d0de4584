//! Bounded exponential backoff with jitter for unreliable upstream calls.
//!
//! This is the only place backoff logic lives. Every external call that can
//! transiently fail (vision, image generation) routes through [`retry`].

use std::thread;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

/// Distinguishes transient failures worth retrying from fatal ones.
///
/// Fatal errors propagate on the first occurrence without sleeping.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following attempt number `attempt` (1-based):
    /// `min(base * 2^(attempt-1), max)` plus uniform jitter in [0, 1) seconds.
    fn delay_after(&self, attempt: u32) -> Duration {
        let shift = (attempt - 1).min(16);
        let exponential = self.base_delay.saturating_mul(1u32 << shift);
        let capped = exponential.min(self.max_delay);
        let jitter = Duration::from_secs_f64(rand::rng().random_range(0.0..1.0));
        capped + jitter
    }
}

/// Runs `op`, retrying transient failures up to `policy.max_attempts`
/// invocations total. The last error is returned once attempts are exhausted.
pub fn retry<T, E, F>(policy: RetryPolicy, mut op: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Result<T, E>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    "Transient upstream failure ({}), retry {}/{} in {:.1}s",
                    e,
                    attempt,
                    policy.max_attempts,
                    delay.as_secs_f64()
                );
                thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
