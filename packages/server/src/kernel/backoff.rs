//! Retry policy with exponential backoff and additive jitter.
//!
//! Attempt classification mirrors what the automation actually hits:
//! transient failures (selector timeouts, flaky navigation) are worth
//! retrying; terminal classifications (cookies invalid, CAPTCHA on screen)
//! are not - retrying against a condition that needs operator intervention
//! only burns the account.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// What a single attempt of an operation produced.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Success(T),
    /// Worth retrying after a delay.
    Transient(anyhow::Error),
    /// Stop immediately; remaining attempts would be pointless. The reason
    /// text is carried to the caller for classification.
    Fatal(String),
}

/// How a full retry run settled.
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Succeeded(T),
    /// Every attempt failed transiently; carries the last error.
    Exhausted(anyhow::Error),
    /// An attempt returned a terminal classification.
    Aborted(String),
}

impl<T> RetryOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Succeeded(_))
    }
}

/// Exponential backoff policy: `base_delay * multiplier^(attempt-1)` plus a
/// random additive jitter in `0..=jitter_max`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub jitter_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter_max: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Policy with no sleep between attempts, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter_max: Duration::ZERO,
        }
    }

    /// The deterministic part of the delay before retrying after `attempt`
    /// (1-based). Non-decreasing across attempts; jitter is added on top.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30);
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent as i32);
        Duration::from_millis(millis.min(u64::MAX as f64) as u64)
    }

    fn jitter(&self) -> Duration {
        let max = self.jitter_max.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(fastrand::u64(0..=max))
    }

    /// Run `op` until it succeeds, aborts, or attempts are exhausted.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AttemptOutcome<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                AttemptOutcome::Success(value) => return RetryOutcome::Succeeded(value),
                AttemptOutcome::Fatal(reason) => {
                    debug!(attempt, reason = %reason, "attempt hit terminal condition, not retrying");
                    return RetryOutcome::Aborted(reason);
                }
                AttemptOutcome::Transient(error) => {
                    if attempt >= max_attempts {
                        return RetryOutcome::Exhausted(error);
                    }
                    let delay = self.delay_for_attempt(attempt) + self.jitter();
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delays_grow_with_attempts() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter_max: Duration::ZERO,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert!(policy.delay_for_attempt(3) >= policy.delay_for_attempt(2));
    }

    #[test]
    fn unit_multiplier_keeps_delay_flat() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            multiplier: 1.0,
            jitter_max: Duration::ZERO,
        };
        assert_eq!(policy.delay_for_attempt(1), policy.delay_for_attempt(3));
    }

    #[tokio::test]
    async fn succeeds_without_retrying_further() {
        let calls = AtomicU32::new(0);
        let outcome = RetryPolicy::immediate(5)
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { AttemptOutcome::Success(42u32) }
            })
            .await;

        assert!(matches!(outcome, RetryOutcome::Succeeded(42)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = RetryPolicy::immediate(3)
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { AttemptOutcome::Transient(anyhow::anyhow!("selector timed out")) }
            })
            .await;

        assert!(matches!(outcome, RetryOutcome::Exhausted(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_classification_stops_immediately() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = RetryPolicy::immediate(5)
            .run(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 1 {
                        AttemptOutcome::Transient(anyhow::anyhow!("flaky"))
                    } else {
                        AttemptOutcome::Fatal("manual intervention required".into())
                    }
                }
            })
            .await;

        match outcome {
            RetryOutcome::Aborted(reason) => {
                assert_eq!(reason, "manual intervention required")
            }
            other => panic!("expected abort, got {:?}", other),
        }
        // Attempt 2 aborted; attempts 3-5 never ran.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn jitter_stays_within_bound() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            multiplier: 1.0,
            jitter_max: Duration::from_millis(5),
        };
        for _ in 0..50 {
            let jitter = policy.jitter();
            assert!(jitter <= policy.jitter_max);
        }
    }
}
