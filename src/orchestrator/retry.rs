//! Exponential backoff with jitter for transient adapter failures. Only
//! `AdapterError::Transient` is retried; auth and not-found errors surface
//! immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::AdapterError;
use crate::util::env::env_parse;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// Env: SYNC_RETRY_ATTEMPTS, SYNC_RETRY_BASE_MS, SYNC_RETRY_MAX_MS.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_attempts: env_parse("SYNC_RETRY_ATTEMPTS", d.max_attempts).max(1),
            base_delay: Duration::from_millis(env_parse(
                "SYNC_RETRY_BASE_MS",
                d.base_delay.as_millis() as u64,
            )),
            max_delay: Duration::from_millis(env_parse(
                "SYNC_RETRY_MAX_MS",
                d.max_delay.as_millis() as u64,
            )),
        }
    }

    /// Delay before retry number `attempt` (0-based): capped exponential
    /// plus up to 50% random jitter so synchronized workers spread out.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter_ms = if exp.as_millis() == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=exp.as_millis() as u64 / 2)
        };
        exp + Duration::from_millis(jitter_ms)
    }
}

/// Run `op` under `policy`, sleeping between transient failures.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AdapterError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    what,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = run_with_retry(&fast_policy(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AdapterError::Transient("boom".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn budget_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = run_with_retry(&fast_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AdapterError::Transient("still down".into())) }
        })
        .await;
        assert!(matches!(result, Err(AdapterError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn auth_expiry_is_never_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = run_with_retry(&fast_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AdapterError::AuthExpired) }
        })
        .await;
        assert_eq!(result, Err(AdapterError::AuthExpired));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_grows_and_respects_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
        };
        for attempt in 0..4 {
            let d = policy.delay_for(attempt);
            // capped exponential plus at most 50% jitter
            assert!(d <= Duration::from_millis(450), "attempt {attempt}: {d:?}");
        }
        assert!(policy.delay_for(0) >= Duration::from_millis(100));
    }
}
