//! Bounded retries with exponential backoff for operations that fail with a
//! retryable [Error].

use std::{future::Future, time::Duration};

use tokio_retry::{RetryIf, strategy::ExponentialBackoff};

use crate::Error;

/// How often, and how patiently, to retry a failing operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// The total number of attempts, including the first.
    pub max_attempts: u32,
    /// The delay after the first failed attempt. Each later delay doubles.
    pub base_delay: Duration,
    /// The upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// The delays between attempts, one fewer than `max_attempts`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + use<> {
        let base_millis = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_delay = self.max_delay;

        // Yields 2, 4, 8... times `base_millis`, halved to start at the base delay.
        ExponentialBackoff::from_millis(2)
            .factor(base_millis)
            .map(move |delay| (delay / 2).min(max_delay))
            .take(self.max_attempts.saturating_sub(1) as usize)
    }

    /// Run `operation` until it succeeds, fails with an error that is not
    /// retryable, or has been attempted `max_attempts` times.
    ///
    /// # Errors
    ///
    /// Returns the error from the last attempt.
    pub async fn run<T, F, Fut>(&self, operation: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let max_attempts = self.max_attempts;
        let mut attempt = 0;

        RetryIf::spawn(self.delays(), operation, |error: &Error| {
            attempt += 1;

            if error.is_retryable() && attempt < max_attempts {
                tracing::warn!("Attempt {attempt} of {max_attempts} failed: {error}. Retrying.");
                true
            } else {
                false
            }
        })
        .await
    }
}

#[cfg(test)]
mod retry_policy_tests {
    use std::{
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    use crate::Error;

    use super::RetryPolicy;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn delay_doubles_up_to_max() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        let delays: Vec<Duration> = policy.delays().collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(350),
                Duration::from_millis(350),
            ]
        );
    }

    #[test]
    fn default_policy_waits_twice() {
        let delays: Vec<Duration> = RetryPolicy::default().delays().collect();

        assert_eq!(
            delays,
            vec![Duration::from_millis(500), Duration::from_millis(1000)]
        );
    }

    #[test]
    fn single_attempt_never_waits() {
        assert_eq!(fast_policy(1).delays().count(), 0);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let attempts = AtomicU32::new(0);

        let result = fast_policy(3)
            .run(|| {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(Error::EmailError("connection refused".to_owned()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);

        let result: Result<(), Error> = fast_policy(2)
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::EmailError("connection refused".to_owned())) }
            })
            .await;

        assert_eq!(
            result,
            Err(Error::EmailError("connection refused".to_owned()))
        );
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let attempts = AtomicU32::new(0);

        let result: Result<(), Error> = fast_policy(5)
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::AccountNotFound) }
            })
            .await;

        assert_eq!(result, Err(Error::AccountNotFound));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
