//! Retry strategies and backoff policies for the collaborator RPCs in §6.1.
//!
//! Review Router (C2) and Episode Pipeline (C6) both need the same
//! "transient error → one retry after a short backoff, then surface" policy
//! from spec §7. This crate provides that as [`TRANSIENT_RETRY`] plus the
//! general building blocks (jittered exponential/linear/constant backoff) so
//! neither component hand-rolls its own sleep loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Strategy for calculating the delay between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// No delay between retries.
    Immediate,
    /// Delay doubles each attempt.
    #[default]
    Exponential,
    /// Delay increases linearly each attempt.
    Linear,
    /// Same delay every attempt.
    Constant,
}

/// Configuration for a retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub strategy: BackoffStrategy,
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Jitter factor in `[0.0, 1.0]`; 0 disables jitter.
    #[serde(default)]
    pub jitter: f64,
}

impl RetryConfig {
    /// The policy spec §7 mandates for `Transient` collaborator errors: one
    /// retry, 1 second later, no jitter.
    pub const fn transient() -> Self {
        Self {
            strategy: BackoffStrategy::Constant,
            max_attempts: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(1),
            jitter: 0.0,
        }
    }
}

/// The policy spec §7 mandates for `Transient` errors: one retry after a
/// 1-second backoff.
pub const TRANSIENT_RETRY: RetryConfig = RetryConfig::transient();

/// Compute the delay before the given (1-indexed) attempt.
pub fn delay_for_attempt(config: &RetryConfig, attempt: u32) -> Duration {
    let raw = match config.strategy {
        BackoffStrategy::Immediate => Duration::ZERO,
        BackoffStrategy::Exponential => {
            let pow = attempt.saturating_sub(1).min(16);
            config.base_delay.saturating_mul(2_u32.saturating_pow(pow))
        }
        BackoffStrategy::Linear => config.base_delay.saturating_mul(attempt.max(1)),
        BackoffStrategy::Constant => config.base_delay,
    };
    let capped = raw.min(config.max_delay);
    if config.jitter > 0.0 {
        jittered(capped, config.jitter)
    } else {
        capped
    }
}

fn jittered(delay: Duration, jitter: f64) -> Duration {
    use rand::Rng;
    let jitter = jitter.clamp(0.0, 1.0);
    let mut rng = rand::thread_rng();
    let random_value: f64 = rng.r#gen();
    let factor = 1.0 - jitter + random_value * (2.0 * jitter);
    let millis = (delay.as_millis() as f64 * factor).round().max(0.0) as u64;
    Duration::from_millis(millis)
}

/// Runs a fallible operation under a [`RetryConfig`], sleeping between
/// attempts on the calling thread. Intended for the blocking collaborator
/// clients in `caster-pipeline` and `caster-review`.
pub fn run_blocking<T, E>(
    config: &RetryConfig,
    mut operation: impl FnMut(u32) -> Result<T, E>,
) -> Result<T, E> {
    let mut attempt = 1;
    loop {
        match operation(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= config.max_attempts {
                    return Err(err);
                }
                std::thread::sleep(delay_for_attempt(config, attempt));
                attempt += 1;
            }
        }
    }
}

/// Retries `operation` exactly once more on failure, per the `Transient`
/// policy in spec §7. Convenience wrapper over [`run_blocking`] with
/// [`TRANSIENT_RETRY`].
pub fn retry_once_transient<T, E>(mut operation: impl FnMut() -> Result<T, E>) -> Result<T, E> {
    run_blocking(&TRANSIENT_RETRY, |_attempt| operation())
}
