//! Generic retry of a fallible async operation with backoff.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Growth of the delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Always `base_delay`
    Fixed,
    /// `base_delay * k`
    Linear,
    /// `base_delay * 2^(k-1)`
    #[default]
    Exponential,
}

impl Backoff {
    /// Multiplier applied to the base delay after the `attempt`-th try (1-based)
    pub fn factor(self, attempt: u32) -> u32 {
        match self {
            Backoff::Fixed => 1,
            Backoff::Linear => attempt.max(1),
            Backoff::Exponential => 1u32
                .checked_shl(attempt.saturating_sub(1))
                .unwrap_or(u32::MAX),
        }
    }
}

/// Decides whether to try again, given either a result or an error
pub type ShouldRetry<T, E> = Box<dyn Fn(Option<&T>, Option<&E>) -> bool + Send + Sync>;
/// Called with `(attempt, delay)` before each sleep
pub type OnRetry = Box<dyn Fn(u32, Duration) + Send + Sync>;

/// Retry policy for [`retry`]
pub struct RetryConfig<T, E> {
    /// Total attempts, at least 1
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
    pub should_retry: ShouldRetry<T, E>,
    pub on_retry: Option<OnRetry>,
}

impl<T, E> RetryConfig<T, E> {
    /// Exponential backoff starting at 1s, capped at 30s.
    /// Retries while the operation yields `None` or an error.
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff: Backoff::default(),
            should_retry: Box::new(|result, _| result.is_none()),
            on_retry: None,
        }
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_should_retry(
        mut self,
        should_retry: impl Fn(Option<&T>, Option<&E>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Box::new(should_retry);
        self
    }

    pub fn with_on_retry(mut self, on_retry: impl Fn(u32, Duration) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Box::new(on_retry));
        self
    }

    /// Delay to wait after the `attempt`-th try (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(self.backoff.factor(attempt))
            .min(self.max_delay)
    }
}

/// Run `operation` until it yields an accepted value or attempts run out.
///
/// An error for which `should_retry` returns false is returned immediately.
/// After the last attempt, its error (if it failed) or its result is returned.
pub async fn retry<T, E, F, Fut>(mut operation: F, config: &RetryConfig<T, E>) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let attempts = config.attempts.max(1);
    let mut last: Result<Option<T>, E> = Ok(None);

    for attempt in 1..=attempts {
        match operation().await {
            Ok(Some(value)) => {
                if !(config.should_retry)(Some(&value), None) {
                    return Ok(Some(value));
                }
                last = Ok(Some(value));
            }
            Ok(None) => last = Ok(None),
            Err(err) => {
                if !(config.should_retry)(None, Some(&err)) {
                    return Err(err);
                }
                last = Err(err);
            }
        }

        if attempt < attempts {
            let delay = config.delay_for(attempt);
            if let Some(on_retry) = &config.on_retry {
                on_retry(attempt, delay);
            }
            debug!(
                "Retry: attempt {}/{} failed, waiting {}ms",
                attempt,
                attempts,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }

    last
}
