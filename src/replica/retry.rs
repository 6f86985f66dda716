//! Retry with exponential backoff for backend I/O

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Exponential backoff helper
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    current_attempt: u32,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff
    pub fn new(base_delay_ms: u64, max_attempts: u32) -> Self {
        ExponentialBackoff {
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_secs(10),
            max_attempts,
            current_attempt: 0,
        }
    }

    /// Get the next delay, or None if max attempts reached
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.current_attempt >= self.max_attempts {
            return None;
        }

        let delay = self.base_delay * 2u32.saturating_pow(self.current_attempt);
        self.current_attempt += 1;

        Some(delay.min(self.max_delay))
    }

    /// Check if we have attempts remaining
    pub fn has_attempts(&self) -> bool {
        self.current_attempt < self.max_attempts
    }
}

/// How often, and how patiently, backend operations are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub attempts: u32,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            attempts,
            base_delay_ms,
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::new(0, 0)
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.base_delay_ms, self.attempts)
    }

    /// Run `op` until it succeeds or the retries are used up, returning the
    /// last error
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.backoff();
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => match backoff.next_delay() {
                    Some(delay) => {
                        debug!("{} failed ({}), retrying in {:?}", what, e, delay);
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_backoff() {
        let mut backoff = ExponentialBackoff::new(100, 3);

        let d1 = backoff.next_delay().unwrap();
        let d2 = backoff.next_delay().unwrap();
        let d3 = backoff.next_delay().unwrap();
        let d4 = backoff.next_delay();

        assert_eq!(d1, Duration::from_millis(100));
        assert_eq!(d2, Duration::from_millis(200));
        assert_eq!(d3, Duration::from_millis(400));
        assert!(d4.is_none());
        assert!(!backoff.has_attempts());
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut backoff = ExponentialBackoff::new(8000, 3);
        backoff.next_delay();
        assert_eq!(backoff.next_delay().unwrap(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(3, 1);

        let value = policy
            .run("flaky op", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Internal("transient".to_string()))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = RetryPolicy::new(2, 1)
            .run("broken op", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Internal("down".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_retry_policy() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let _ = RetryPolicy::none()
            .run("once", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::Internal("x".to_string()))
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
