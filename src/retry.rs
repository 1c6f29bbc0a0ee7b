//! Bounded retry with linear backoff.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use tracing::warn;

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Three tries, backing off 800ms, 1600ms, 2400ms.
    pub const ATTACHMENT_SEND: RetryPolicy = RetryPolicy::linear(3, Duration::from_millis(800));

    pub const fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Wait after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Runs `op` until it succeeds, fails with an error `is_retryable` rejects,
    /// or `max_attempts` retryable failures have happened. Every retryable
    /// failure is followed by its backoff, the last one included, and the
    /// last error is returned once attempts run out.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        sleeper: &dyn Sleeper,
        is_retryable: P,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !is_retryable(&err) => return Err(err),
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, backing off"
                    );
                    sleeper.sleep(delay).await;
                    if attempt >= max_attempts {
                        return Err(err);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    };

    use super::*;

    /// Records requested sleeps instead of waiting.
    #[derive(Default)]
    pub(crate) struct RecordingSleeper {
        pub(crate) slept: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        pub(crate) fn slept(&self) -> Vec<Duration> {
            self.slept.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    #[derive(Debug, PartialEq)]
    enum FakeError {
        Transient,
        Fatal,
    }

    impl std::fmt::Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn retryable(err: &FakeError) -> bool {
        *err == FakeError::Transient
    }

    #[tokio::test]
    async fn transient_failures_back_off_linearly_then_give_up() {
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), FakeError> = RetryPolicy::ATTACHMENT_SEND
            .run(&sleeper, retryable, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FakeError::Transient) }
            })
            .await;

        assert_eq!(result, Err(FakeError::Transient));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            sleeper.slept(),
            vec![
                Duration::from_millis(800),
                Duration::from_millis(1600),
                Duration::from_millis(2400)
            ]
        );
    }

    #[tokio::test]
    async fn fatal_error_is_not_retried() {
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), FakeError> = RetryPolicy::ATTACHMENT_SEND
            .run(&sleeper, retryable, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FakeError::Fatal) }
            })
            .await;

        assert_eq!(result, Err(FakeError::Fatal));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.slept().is_empty());
    }

    #[tokio::test]
    async fn succeeds_after_one_transient_failure() {
        let sleeper = RecordingSleeper::default();

        let result = RetryPolicy::ATTACHMENT_SEND
            .run(&sleeper, retryable, |attempt| async move {
                if attempt == 1 {
                    Err(FakeError::Transient)
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(sleeper.slept(), vec![Duration::from_millis(800)]);
    }

    #[tokio::test]
    async fn transient_then_fatal_stops_at_the_fatal_error() {
        let sleeper = RecordingSleeper::default();

        let result: Result<(), FakeError> = RetryPolicy::ATTACHMENT_SEND
            .run(&sleeper, retryable, |attempt| async move {
                if attempt == 1 {
                    Err(FakeError::Transient)
                } else {
                    Err(FakeError::Fatal)
                }
            })
            .await;

        assert_eq!(result, Err(FakeError::Fatal));
        assert_eq!(sleeper.slept().len(), 1);
    }

    #[test]
    fn worst_case_wait_is_bounded() {
        let policy = RetryPolicy::ATTACHMENT_SEND;
        let total: Duration = (1..=policy.max_attempts).map(|a| policy.delay_for(a)).sum();
        assert_eq!(total, Duration::from_millis(4800));
    }
}
