//! Timeout + bounded exponential-backoff retry around a fallible async call.

use super::CircuitBreaker;
use crate::{Error, ErrorKind, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub retries: u32,
    /// Budget for each individual attempt
    pub timeout: Duration,
    /// Sleep before the second attempt; doubles each time after
    pub base_delay: Duration,
    /// Upper bound for any single sleep
    pub max_delay: Duration,
    /// Spread sleeps by +/-25% so parallel callers do not retry in lockstep
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            timeout: Duration::from_secs(30),
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// One attempt, only a timeout
    pub fn once(timeout: Duration) -> Self {
        Self {
            retries: 0,
            timeout,
            ..Default::default()
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Sleep after failed attempt number `attempt` (1-based):
    /// `base_delay * 2^(attempt-1)`, capped at `max_delay`, then jittered.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let raw = self.base_delay.saturating_mul(1u32 << exp);
        let capped = raw.min(self.max_delay);
        if self.jitter && !capped.is_zero() {
            let factor: f64 = rand::thread_rng().gen_range(0.75..=1.25);
            capped.mul_f64(factor).min(self.max_delay)
        } else {
            capped
        }
    }
}

/// Run `operation` with timeout, retry and an optional circuit breaker.
///
/// - A breaker that rejects the call short-circuits with `CircuitOpen`;
///   the operation is not invoked and no further attempts are made.
/// - Each attempt races `policy.timeout`; losing the race is a `Timeout`.
/// - Every outcome is reported to the breaker.
/// - After the last attempt the failure propagates with its kind intact,
///   marked persistent and annotated with the attempt count.
pub async fn wrap<T, F, Fut>(
    name: &str,
    policy: &RetryPolicy,
    breaker: Option<&CircuitBreaker>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.retries.saturating_add(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let permit = match breaker {
            Some(breaker) => Some(breaker.try_acquire().map_err(|e| {
                e.with_operation("resilience::wrap")
                    .with_context("name", name)
                    .with_context("attempt", attempt.to_string())
            })?),
            None => None,
        };

        let outcome = match tokio::time::timeout(policy.timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(name, policy.timeout.as_millis())),
        };
        if let Some(permit) = permit {
            permit.settle(&outcome);
        }

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if attempt >= max_attempts || err.kind() == ErrorKind::CircuitOpen {
            return Err(err
                .persist()
                .with_operation("resilience::wrap")
                .with_context("attempts", attempt.to_string()));
        }

        let delay = policy.backoff_delay(attempt);
        tracing::warn!(
            operation = name,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
