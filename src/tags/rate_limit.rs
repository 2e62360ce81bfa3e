//! Per-registry request throttling and retry with exponential backoff

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, warn};

use crate::tags::error::RegistryError;

/// Enforces a minimum interval between consecutive requests to one registry.
///
/// One instance exists per registry and is shared by every worker talking to
/// it. The lock is held while waiting, so callers are released one interval
/// apart in arrival order.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// A limiter that never waits
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Waits until the next request to this registry is allowed
    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            sleep_until(previous + self.min_interval).await;
        }
        *last = Some(Instant::now());
    }
}

/// Retry behavior for transient registry failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts per request (including the initial attempt).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Maximum delay between retries (caps exponential growth).
    pub max_delay: Duration,
    /// Longest server-provided retry-after hint that is honored as given.
    pub retry_after_ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            retry_after_ceiling: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// A policy that gives up after the first failure
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (1 = first retry):
    /// `base_delay * 2^(attempt-1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(30);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Delay before retrying after `error`. A server-provided retry-after
    /// hint takes precedence over the backoff schedule, up to
    /// `retry_after_ceiling`.
    fn delay_for(&self, error: &RegistryError, attempt: u32) -> Duration {
        match error {
            RegistryError::RateLimited {
                retry_after_secs: Some(secs),
            } => {
                let requested = Duration::from_secs(*secs);
                if requested > self.retry_after_ceiling {
                    warn!(
                        "Retry-After of {:?} exceeds ceiling, waiting {:?} instead",
                        requested, self.retry_after_ceiling
                    );
                    self.retry_after_ceiling
                } else {
                    requested
                }
            }
            _ => self.backoff(attempt),
        }
    }

    /// Runs `op` until it succeeds, fails permanently or the attempt budget
    /// is exhausted. The last error is returned on exhaustion.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, RegistryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RegistryError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.delay_for(&e, attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                        what, attempt, max_attempts, e, delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!("{} failed after {} attempt(s): {}", what, attempt, e);
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            retry_after_ceiling: Duration::from_secs(10),
        }
    }

    #[rstest]
    #[case(1, Duration::from_millis(100))]
    #[case(2, Duration::from_millis(200))]
    #[case(3, Duration::from_millis(400))]
    #[case(4, Duration::from_millis(500))]
    #[case(10, Duration::from_millis(500))]
    fn backoff_doubles_and_respects_max_delay(#[case] attempt: u32, #[case] expected: Duration) {
        assert_eq!(policy(5).backoff(attempt), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn run_honors_retry_after_hint() {
        let calls = &AtomicU32::new(0);
        let start = Instant::now();

        let result = policy(3)
            .run("list tags", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(RegistryError::RateLimited {
                        retry_after_secs: Some(5),
                    })
                } else {
                    Ok("ok")
                }
            })
            .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[rstest]
    #[case(Some(3), Duration::from_secs(3))]
    #[case(Some(86_400), Duration::from_secs(10))]
    #[case(None, Duration::from_millis(200))]
    fn delay_for_caps_retry_after_hint(#[case] retry_after_secs: Option<u64>, #[case] expected: Duration) {
        let error = RegistryError::RateLimited { retry_after_secs };
        assert_eq!(policy(5).delay_for(&error, 2), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn run_waits_at_most_the_ceiling_for_large_retry_after() {
        let calls = &AtomicU32::new(0);
        let start = Instant::now();

        let result = policy(2)
            .run("list tags", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(RegistryError::RateLimited {
                        retry_after_secs: Some(86_400),
                    })
                } else {
                    Ok("ok")
                }
            })
            .await;

        assert_eq!(result, Ok("ok"));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn run_returns_last_error_when_attempts_are_exhausted() {
        let calls = &AtomicU32::new(0);

        let result: Result<(), _> = policy(3)
            .run("fetch manifest", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RegistryError::Server { status: 503 })
            })
            .await;

        assert_eq!(result, Err(RegistryError::Server { status: 503 }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_does_not_retry_permanent_errors() {
        let calls = &AtomicU32::new(0);

        let result: Result<(), _> = policy(5)
            .run("list tags", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RegistryError::NotFound("library/missing".to_string()))
            })
            .await;

        assert!(matches!(result, Err(RegistryError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_spaces_consecutive_requests() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_is_shared_between_concurrent_callers() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(500)));
        let start = Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.acquire().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_limiter_never_waits() {
        let limiter = RateLimiter::disabled();
        let start = Instant::now();

        for _ in 0..10 {
            limiter.acquire().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
