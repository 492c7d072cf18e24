//! Opt-in retry for establishing a session.
//!
//! The provisioning client never retries on its own. Callers that want
//! backoff wrap their `start` call in [`with_retry`].

use std::time::Duration;

use rand::Rng;

use crate::error::Error;

/// How often and how patiently to retry a failed `start`.
///
/// The wait before retry `n` (0-based) is
/// `initial_delay * backoff_multiplier^n`, capped at `max_delay`, then
/// scaled by a random factor in `[0.5, 1.0]` so that workloads restarted
/// together do not hit the provisioning server in lockstep.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` means a single attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Growth factor per retry. Values below `1.0`, NaN and infinities are
    /// treated as `1.0` (constant delay).
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    /// Four retries starting at 250 ms, doubling up to 8 s.
    fn default() -> Self {
        Self {
            max_retries: 4,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    fn growth(&self) -> f64 {
        if self.backoff_multiplier.is_finite() {
            self.backoff_multiplier.max(1.0)
        } else {
            1.0
        }
    }

    /// Jittered wait before retry number `attempt` (0-based). Never exceeds
    /// `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let ceiling = self.max_delay.as_secs_f64();
        // `f64::min` drops the NaN from `0 * inf`.
        let nominal = (self.initial_delay.as_secs_f64() * self.growth().powi(exponent)).min(ceiling);
        let spread: f64 = rand::thread_rng().gen_range(0.5..=1.0);
        Duration::try_from_secs_f64(nominal * spread).unwrap_or(self.max_delay)
    }
}

/// Run `f` under `policy`, returning the first success or the last error.
///
/// Only transport-level failures ([`Error::is_retryable`]) are retried. An
/// attestation rejection or a config error ends the loop at once.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut f: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(val) => return Ok(val),
            Err(e) if !e.is_retryable() => {
                if e.is_security_event() {
                    tracing::warn!(error = %e, "attestation rejected, not retrying");
                }
                return Err(e);
            }
            Err(e) if attempt >= policy.max_retries => {
                tracing::warn!(
                    attempt = attempt + 1,
                    error = %e,
                    "final connection attempt failed"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = policy.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "connection attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
