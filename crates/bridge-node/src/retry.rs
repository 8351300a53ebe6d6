use common::{BridgeError, BridgeResult};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Doubling backoff starting at `start_ms`, capped at `max_ms`.
/// `attempt` counts from 1.
pub fn exponential_backoff(start_ms: u64, attempt: u32, max_ms: u64) -> Duration {
    let shift = attempt.saturating_sub(1).min(32);
    let delay = start_ms.saturating_mul(1u64 << shift).min(max_ms);
    Duration::from_millis(delay)
}

/// Bounded retry for vendor calls. Only [`BridgeError::Network`] is retried.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    pub fn backoff_for(&self, attempt: u32) -> Duration {
        exponential_backoff(self.initial_backoff_ms, attempt, self.max_backoff_ms)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> BridgeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BridgeResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let backoff = self.backoff_for(attempt);
                    warn!(
                        operation = what,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Validate user supplied retry settings.
pub fn validate(policy: &RetryPolicy) -> BridgeResult<()> {
    if policy.max_attempts == 0 {
        return Err(BridgeError::config("retry.max_attempts must be at least 1"));
    }
    if policy.initial_backoff_ms > policy.max_backoff_ms {
        return Err(BridgeError::config(
            "retry.initial_backoff_ms must not exceed retry.max_backoff_ms",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_backoff() {
        assert_eq!(exponential_backoff(500, 1, 10_000), Duration::from_millis(500));
        assert_eq!(exponential_backoff(500, 2, 10_000), Duration::from_millis(1_000));
        assert_eq!(exponential_backoff(500, 4, 10_000), Duration::from_millis(4_000));
        assert_eq!(exponential_backoff(500, 10, 10_000), Duration::from_millis(10_000));
        assert_eq!(exponential_backoff(500, 200, 10_000), Duration::from_millis(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_network_errors_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result = policy
            .run("latest_clip", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BridgeError::network("connection reset"))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        let result: BridgeResult<()> = policy
            .run("download", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BridgeError::network("timeout"))
            })
            .await;
        assert!(matches!(result, Err(BridgeError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_retry_on_auth_or_not_found() {
        for err in [BridgeError::AuthExpired, BridgeError::not_found("clip")] {
            let calls = AtomicU32::new(0);
            let mut err = Some(err);
            let result: BridgeResult<()> = RetryPolicy::default()
                .run("list_cameras", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let e = err.take();
                    async move { Err(e.unwrap_or(BridgeError::AuthExpired)) }
                })
                .await;
            assert!(result.is_err());
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_validate() {
        assert!(validate(&RetryPolicy::default()).is_ok());
        assert!(validate(&RetryPolicy { max_attempts: 0, ..RetryPolicy::default() }).is_err());
        assert!(validate(&RetryPolicy {
            initial_backoff_ms: 9_000,
            max_backoff_ms: 1_000,
            ..RetryPolicy::default()
        })
        .is_err());
    }
}
