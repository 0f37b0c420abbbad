//! Fixed-interval polling bounded by a deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};

/// Interval and deadline applied to every status wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Delay between two consecutive checks.
    pub interval: Duration,
    /// Total time budget for the wait.
    pub timeout: Duration,
}

impl PollPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Reasons a poll loop stops without producing a value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PollError<E> {
    /// The deadline passed before the check succeeded.
    Exhausted {
        /// Number of checks performed.
        attempts: u32,
    },
    /// The check itself failed.
    Check(E),
}

/// Runs `check` every `policy.interval` until it yields a value, fails, or the
/// next check would start after `policy.timeout` has elapsed.
///
/// The first check runs immediately.
///
/// # Errors
///
/// Returns [`PollError::Exhausted`] on deadline and [`PollError::Check`] when
/// `check` returns an error.
pub async fn poll_until<T, E, F, Fut>(policy: PollPolicy, mut check: F) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let deadline = Instant::now() + policy.timeout;
    let mut attempts: u32 = 0;

    loop {
        attempts = attempts.saturating_add(1);
        if let Some(value) = check().await.map_err(PollError::Check)? {
            return Ok(value);
        }

        if Instant::now() + policy.interval > deadline {
            return Err(PollError::Exhausted { attempts });
        }
        sleep(policy.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    const POLICY: PollPolicy = PollPolicy::new(Duration::from_secs(10), Duration::from_secs(60));

    #[tokio::test(start_paused = true)]
    async fn returns_value_once_check_succeeds() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, PollError<()>> = poll_until(POLICY, || {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok((call == 3).then_some(call)) }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_deadline() {
        let started = Instant::now();
        let result: Result<(), PollError<()>> =
            poll_until(POLICY, || async { Ok(None) }).await;

        assert_eq!(result, Err(PollError::Exhausted { attempts: 7 }));
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn surfaces_check_errors_without_retrying() {
        let calls = AtomicU32::new(0);
        let result: Result<(), PollError<&str>> = poll_until(POLICY, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("boom") }
        })
        .await;

        assert_eq!(result, Err(PollError::Check("boom")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
