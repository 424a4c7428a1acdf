use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tracing::warn;

/// Errors that know whether another attempt could succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Retry parameters for one call site.
///
/// The wait before retry `n` (0-indexed) is `min(base * growth^n, cap)`,
/// multiplied by a uniform factor in `[1, 2)` when `jitter` is set.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use zipbucket::BackoffPolicy;
///
/// let policy = BackoffPolicy::default()
///     .max_attempts(5)
///     .base(Duration::from_millis(100))
///     .growth(2.0)
///     .jitter(false);
///
/// assert_eq!(policy.unjittered_delay(0), Duration::from_millis(100));
/// assert_eq!(policy.unjittered_delay(2), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffPolicy {
    /// Total attempts including the first; values below 1 behave as 1.
    pub max_attempts: u32,
    #[serde(rename = "base_ms", with = "millis")]
    pub base:         Duration,
    pub growth:       f64,
    #[serde(rename = "cap_ms", with = "millis")]
    pub cap:          Duration,
    pub jitter:       bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base:         Duration::from_secs(1),
            growth:       1.5,
            cap:          Duration::from_secs(10),
            jitter:       true,
        }
    }
}

impl BackoffPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self { Self::default().max_attempts(1) }

    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    #[must_use]
    pub fn growth(mut self, growth: f64) -> Self {
        self.growth = growth;
        self
    }

    #[must_use]
    pub fn cap(mut self, cap: Duration) -> Self {
        self.cap = cap;
        self
    }

    #[must_use]
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// `min(base * growth^retry, cap)` without jitter.
    pub fn unjittered_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let raw = self.base.as_secs_f64() * self.growth.powi(exponent);
        let capped = raw.min(self.cap.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.cap)
    }

    /// The wait before retry `retry`, jittered if enabled.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = self.unjittered_delay(retry);
        if !self.jitter {
            return delay;
        }
        let factor: f64 = rand::rng().random_range(1.0..2.0);
        delay.mul_f64(factor)
    }

    /// Run `operation` until it succeeds, fails with a non-transient error,
    /// or the attempt budget is spent. The last error is returned.
    ///
    /// `operation` receives the 0-indexed attempt number.
    pub async fn attempt<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let err = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            attempt += 1;
            if !err.is_transient() || attempt >= max_attempts {
                return Err(err);
            }

            let delay = self.delay_for(attempt - 1);
            warn!(
                operation = label,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after transient failure"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky {
        transient: bool,
    }

    impl Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky (transient: {})", self.transient)
        }
    }

    impl Transient for Flaky {
        fn is_transient(&self) -> bool { self.transient }
    }

    fn fast() -> BackoffPolicy {
        BackoffPolicy::default()
            .base(Duration::from_millis(100))
            .growth(2.0)
            .cap(Duration::from_secs(1))
            .jitter(false)
    }

    #[test]
    fn test_delay_growth_and_cap() {
        let policy = fast();
        assert_eq!(policy.unjittered_delay(0), Duration::from_millis(100));
        assert_eq!(policy.unjittered_delay(1), Duration::from_millis(200));
        assert_eq!(policy.unjittered_delay(3), Duration::from_millis(800));
        assert_eq!(policy.unjittered_delay(4), Duration::from_secs(1));
        assert_eq!(policy.unjittered_delay(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_default_tuning() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.unjittered_delay(0), Duration::from_secs(1));
        assert_eq!(policy.unjittered_delay(1), Duration::from_millis(1500));
        assert_eq!(policy.unjittered_delay(20), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = fast().jitter(true);
        for _ in 0..100 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay < Duration::from_millis(400));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let start = tokio::time::Instant::now();
        let result = fast()
            .max_attempts(3)
            .attempt("test", |_| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Flaky { transient: true })
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), Flaky> = fast()
            .max_attempts(4)
            .attempt("test", |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Flaky { transient: true })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), Flaky> = fast()
            .max_attempts(5)
            .attempt("test", |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Flaky { transient: false })
                }
            })
            .await;

        assert!(!result.unwrap_err().transient);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let result: Result<u32, Flaky> =
            fast().max_attempts(0).attempt("test", |attempt| async move { Ok(attempt) }).await;
        assert_eq!(result.unwrap(), 0);
    }

    #[test]
    fn test_deserialize_from_toml() {
        let policy: BackoffPolicy =
            toml::from_str("max_attempts = 5\nbase_ms = 250\ncap_ms = 2000\njitter = false").unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base, Duration::from_millis(250));
        assert_eq!(policy.cap, Duration::from_secs(2));
        assert_eq!(policy.growth, 1.5);
        assert!(!policy.jitter);
    }
}
