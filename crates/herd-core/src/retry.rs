//! Async retry driven by a [`BackoffStrategy`].
//!
//! Sleeps go through `tokio::time`, so paused-clock tests run instantly.

use std::{fmt, future::Future, time::Duration};

use rand::Rng;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use herd_model::{BackoffStrategy, JitterStrategy};

/// Why a retried operation gave up.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The operation failed with an error not worth retrying.
    #[error("{0}")]
    Permanent(E),
    /// The policy ran out of attempts or time.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    /// The last error returned by the operation.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Permanent(e) => e,
            RetryError::Exhausted { last, .. } => last,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Permanent(_) => 1,
            RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Retry `f` on every error until `policy` is exhausted.
pub async fn retry<T, E, F, Fut>(op: &str, policy: &BackoffStrategy, f: F) -> Result<T, RetryError<E>>
where
    E: fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_if(op, policy, |_| true, |_, _, _| {}, f).await
}

/// Retry `f` while `transient` classifies its error as retryable.
///
/// `notify` sees every failed attempt with its 1-based number and the delay before the next one.
pub async fn retry_if<T, E, F, Fut, C, N>(
    op: &str,
    policy: &BackoffStrategy,
    transient: C,
    mut notify: N,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    E: fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    N: FnMut(&E, u32, Duration),
{
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let err = match f().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if !transient(&err) {
            return Err(RetryError::Permanent(err));
        }

        let delay_ms = jittered_delay_ms(policy, attempts - 1);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if !policy.allows(attempts, elapsed_ms.saturating_add(delay_ms)) {
            return Err(RetryError::Exhausted {
                attempts,
                last: err,
            });
        }

        let delay = Duration::from_millis(delay_ms);
        notify(&err, attempts, delay);
        debug!(op, attempt = attempts, delay_ms, error = %err, "retrying");

        tokio::time::sleep(delay).await;
    }
}

/// Delay before retry `attempt` (0-based) after applying the policy's jitter.
pub fn jittered_delay_ms(policy: &BackoffStrategy, attempt: u32) -> u64 {
    let base = policy.base_delay_ms(attempt);
    match policy.jitter {
        JitterStrategy::None => base,
        JitterStrategy::Full => rand::rng().random_range(0..=base),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[derive(Debug)]
    enum TestError {
        Transient,
        Fatal,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn is_transient(e: &TestError) -> bool {
        matches!(e, TestError::Transient)
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_policy_makes_two_attempts_five_seconds_apart() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let res: Result<(), _> = retry_if(
            "get",
            &BackoffStrategy::fixed(5_000, 2),
            is_transient,
            |_, _, _| {},
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Transient)
            },
        )
        .await;

        assert!(matches!(res, Err(RetryError::Exhausted { attempts: 2, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = retry_if(
            "get",
            &BackoffStrategy::fixed(5_000, 2),
            is_transient,
            |_, _, _| {},
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Fatal)
            },
        )
        .await;

        assert!(matches!(res, Err(RetryError::Permanent(TestError::Fatal))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures_and_notifies() {
        let calls = AtomicU32::new(0);
        let mut notified = Vec::new();

        let res = retry_if(
            "put",
            &BackoffStrategy::exponential(100, 1_000, 60_000),
            is_transient,
            |_, attempt, _| notified.push(attempt),
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(TestError::Transient)
                } else {
                    Ok(7)
                }
            },
        )
        .await;

        assert_eq!(res.unwrap(), 7);
        assert_eq!(notified, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_budget_bounds_exponential_policy() {
        let started = Instant::now();
        let mut policy = BackoffStrategy::exponential(1_000, 5_000, 20_000);
        policy.jitter = JitterStrategy::None;

        let res: Result<(), RetryError<TestError>> =
            retry("kill", &policy, || async { Err(TestError::Transient) }).await;

        let err = res.unwrap_err();
        assert!(err.attempts() > 2);
        assert!(started.elapsed() <= Duration::from_secs(20));
        assert!(matches!(err.into_inner(), TestError::Transient));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let mut policy = BackoffStrategy::exponential(1_000, 8_000, 60_000);
        for attempt in 0..6 {
            let base = policy.base_delay_ms(attempt);
            assert!(jittered_delay_ms(&policy, attempt) <= base);
        }

        policy.jitter = JitterStrategy::None;
        assert_eq!(jittered_delay_ms(&policy, 2), 4_000);
    }
}
