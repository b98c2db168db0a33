//! One retry combinator for every flaky step of a backup run.
//!
//! Viewport captures, profile-switch verification, panel discovery and page
//! script calls all go through [`retry_if`] so attempt counting and backoff
//! behave the same everywhere.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// A backoff wait was cut short by cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// How the wait between two attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every failed attempt
    Fixed(Duration),
    /// `base * attempt`, attempt being the 1-based number of the attempt that failed
    Linear(Duration),
}

/// Attempt budget plus backoff shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one (at least 1)
    pub attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn linear(attempts: u32, base: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff: Backoff::Linear(base),
        }
    }

    /// Delay to wait after `attempt` (1-based) failed
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Linear(base) => base.saturating_mul(attempt.max(1)),
        }
    }
}

/// Run `op` until it succeeds or the policy is exhausted.
///
/// `op` receives the 1-based attempt number. The last error is returned.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_if(policy, op, |_| true).await
}

/// Like [`retry`], but errors for which `retryable` returns false end the loop at once.
pub async fn retry_if<T, E, F, Fut, P>(policy: &RetryPolicy, op: F, retryable: P) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    drive(policy, op, retryable, |delay| async move {
        tokio::time::sleep(delay).await;
        Ok(())
    })
    .await
}

/// Like [`retry_if`], but a cancelled `cancel` token ends a backoff wait early
/// with `E::from(Cancelled)`.
///
/// Without a token this behaves exactly like [`retry_if`].
pub async fn retry_if_cancellable<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    cancel: Option<&CancellationToken>,
    op: F,
    retryable: P,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display + From<Cancelled>,
    P: Fn(&E) -> bool,
{
    drive(policy, op, retryable, |delay| async move {
        match cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(E::from(Cancelled)),
                _ = tokio::time::sleep(delay) => Ok(()),
            },
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    })
    .await
}

async fn drive<T, E, F, Fut, P, W, WFut>(policy: &RetryPolicy, mut op: F, retryable: P, mut wait: W) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
    W: FnMut(Duration) -> WFut,
    WFut: Future<Output = Result<(), E>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= policy.attempts || !retryable(&err) => return Err(err),
            Err(err) => {
                let delay = policy.delay_after(attempt);
                tracing::debug!(attempt, ?delay, error = %err, "attempt failed, backing off");
                wait(delay).await?;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_delay_shapes() {
        let fixed = RetryPolicy::fixed(10, Duration::from_millis(100));
        assert_eq!(fixed.delay_after(1), Duration::from_millis(100));
        assert_eq!(fixed.delay_after(7), Duration::from_millis(100));

        let linear = RetryPolicy::linear(3, Duration::from_millis(500));
        assert_eq!(linear.delay_after(1), Duration::from_millis(500));
        assert_eq!(linear.delay_after(2), Duration::from_millis(1000));
    }

    #[test]
    fn test_zero_attempts_is_clamped() {
        assert_eq!(RetryPolicy::fixed(0, Duration::ZERO).attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_after_budget() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::linear(3, Duration::from_millis(500));
        let start = tokio::time::Instant::now();

        let result: Result<(), String> = retry(&policy, |_| {
            calls.set(calls.get() + 1);
            async { Err("boom".to_string()) }
        })
        .await;

        assert_eq!(result, Err("boom".to_string()));
        assert_eq!(calls.get(), 3);
        // 500ms after the first failure, 1000ms after the second, nothing after the last
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_returns_first_success() {
        let policy = RetryPolicy::fixed(5, Duration::from_millis(10));
        let result: Result<u32, String> = retry(&policy, |attempt| async move {
            if attempt < 3 {
                Err(format!("attempt {attempt}"))
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_ends_loop() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::fixed(5, Duration::from_millis(10));
        let result: Result<(), String> = retry_if(
            &policy,
            |_| {
                calls.set(calls.get() + 1);
                async { Err("fatal".to_string()) }
            },
            |e| e != "fatal",
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[derive(Debug, PartialEq)]
    enum StepError {
        Busy,
        Cancelled,
    }

    impl std::fmt::Display for StepError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl From<Cancelled> for StepError {
        fn from(_: Cancelled) -> Self {
            StepError::Cancelled
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_cuts_backoff_short() {
        let calls = Cell::new(0);
        let token = CancellationToken::new();
        let policy = RetryPolicy::fixed(10, Duration::from_secs(60));
        let start = tokio::time::Instant::now();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });

        let result: Result<(), StepError> = retry_if_cancellable(
            &policy,
            Some(&token),
            |_| {
                calls.set(calls.get() + 1);
                async { Err(StepError::Busy) }
            },
            |_| true,
        )
        .await;

        assert_eq!(result, Err(StepError::Cancelled));
        assert_eq!(calls.get(), 1);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_token_backoff_runs_to_the_end() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::fixed(3, Duration::from_secs(1));
        let result: Result<(), StepError> = retry_if_cancellable(
            &policy,
            None,
            |_| {
                calls.set(calls.get() + 1);
                async { Err(StepError::Busy) }
            },
            |_| true,
        )
        .await;
        assert_eq!(result, Err(StepError::Busy));
        assert_eq!(calls.get(), 3);
    }
}
