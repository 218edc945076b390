//! Resilience — bounded retry with exponential backoff and cooperative cancellation.
//!
//! Wraps any fallible async operation. The executor adds timing, counting and
//! cancellation semantics only; idempotency of the operation is the caller's
//! concern.
//!
//! # Design
//!
//! ```text
//! attempt loop (attempt_index = 0..max_attempts)
//!   ├─ token cancelled?       → Err(Interrupted { attempts })   (budget untouched)
//!   ├─ op() succeeds          → Ok(value)
//!   ├─ op() fails, budget left → sleep base * 2^attempt_index, loop
//!   └─ op() fails, budget gone → Err(Exhausted { attempts, last })
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use coordination::resilience::{RetryExecutor, RetryPolicy};
//!
//! let executor = RetryExecutor::new(cancel_token);
//! let policy = RetryPolicy::new(3, Duration::from_secs(1));
//! let text = executor
//!     .retry_with_backoff("market_analyst", &policy, || gateway.invoke(request.clone()))
//!     .await?;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fixed growth factor between consecutive backoff sleeps.
pub const BACKOFF_MULTIPLIER: u32 = 2;

/// Retry budget and timing for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Sleep after the first failure; doubles after each further failure.
    pub base_delay: Duration,
    /// Upper bound on a single attempt. Elapsing counts as a transient failure.
    pub attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            attempt_timeout: None,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// A policy that never retries.
    pub fn single_attempt() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Effective attempt budget (never below one).
    pub fn attempt_budget(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Sleep scheduled after the failed attempt at `attempt_index` (0-indexed).
    pub fn backoff(&self, attempt_index: u32) -> Duration {
        let factor = BACKOFF_MULTIPLIER.saturating_pow(attempt_index);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    /// Default: 3 attempts, 1s base delay, no per-attempt timeout.
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// A retryable failure of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum TransientFailure<E> {
    /// The operation itself returned an error.
    Failed(E),
    /// The per-attempt timeout elapsed before the operation finished.
    TimedOut(Duration),
}

impl<E: fmt::Display> fmt::Display for TransientFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(e) => write!(f, "{}", e),
            Self::TimedOut(limit) => write!(f, "attempt timed out after {:?}", limit),
        }
    }
}

/// Terminal outcome of a retried operation that did not succeed.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    /// Cancellation was observed before an attempt. Never retried.
    Interrupted { attempts: u32 },
    /// Every attempt in the budget failed.
    Exhausted {
        attempts: u32,
        last: TransientFailure<E>,
    },
}

impl<E> RetryError<E> {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }

    /// Number of attempts actually made.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Interrupted { attempts } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// The last transient failure, if the budget was exhausted.
    pub fn last_failure(&self) -> Option<&TransientFailure<E>> {
        match self {
            Self::Interrupted { .. } => None,
            Self::Exhausted { last, .. } => Some(last),
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupted { attempts } => {
                write!(f, "interrupted after {} attempt(s)", attempts)
            }
            Self::Exhausted { attempts, last } => {
                write!(f, "retries exhausted after {} attempt(s): {}", attempts, last)
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Result type for retried operations
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Receives retry bookkeeping from the executor.
pub trait RetryObserver: Send + Sync {
    /// Called after attempt `attempt` (1-indexed) of `operation` failed and a
    /// retry is scheduled after `delay`.
    fn on_retry(&self, operation: &str, attempt: u32, delay: Duration);
}

/// Bounded-retry wrapper bound to one cancellation token.
#[derive(Clone)]
pub struct RetryExecutor {
    cancel: CancellationToken,
    observer: Option<Arc<dyn RetryObserver>>,
}

impl RetryExecutor {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Returns `true` if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The token this executor polls.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `op` until it succeeds, the budget is spent, or cancellation is seen.
    pub async fn retry_with_backoff<T, E, F, Fut>(
        &self,
        operation: &str,
        policy: &RetryPolicy,
        mut op: F,
    ) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let budget = policy.attempt_budget();
        let mut attempts: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                info!(operation, attempts, "Cancellation observed — not attempting");
                return Err(RetryError::Interrupted { attempts });
            }

            attempts += 1;
            let outcome = match policy.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, op()).await {
                    Ok(result) => result.map_err(TransientFailure::Failed),
                    Err(_) => Err(TransientFailure::TimedOut(limit)),
                },
                None => op().await.map_err(TransientFailure::Failed),
            };

            let failure = match outcome {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(operation, attempts, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(failure) => failure,
            };

            if attempts >= budget {
                warn!(
                    operation,
                    attempts,
                    error = %failure,
                    "Retry budget exhausted"
                );
                return Err(RetryError::Exhausted {
                    attempts,
                    last: failure,
                });
            }

            if self.cancel.is_cancelled() {
                info!(operation, attempts, error = %failure, "Cancelled during attempt — not retrying");
                return Err(RetryError::Interrupted { attempts });
            }

            let delay = policy.backoff(attempts - 1);
            warn!(
                operation,
                attempt = attempts,
                max_attempts = budget,
                backoff_ms = delay.as_millis() as u64,
                error = %failure,
                "Transient failure — retrying"
            );
            if let Some(observer) = &self.observer {
                observer.on_retry(operation, attempts, delay);
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => {
                    debug!(operation, "Backoff cut short by cancellation");
                }
            }
        }
    }
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct RecordingObserver {
        retries: Mutex<Vec<(String, u32, Duration)>>,
    }

    impl RetryObserver for RecordingObserver {
        fn on_retry(&self, operation: &str, attempt: u32, delay: Duration) {
            self.retries
                .lock()
                .unwrap()
                .push((operation.to_string(), attempt, delay));
        }
    }

    fn flaky(calls: &AtomicU32, fail_times: u32) -> Result<&'static str, String> {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < fail_times {
            Err(format!("boom #{}", n + 1))
        } else {
            Ok("ok")
        }
    }

    #[test]
    fn test_backoff_is_pure_exponential() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy::new(100, Duration::from_secs(1));
        assert_eq!(policy.backoff(80), Duration::from_secs(u64::from(u32::MAX)));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempt_budget(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds_with_3s_backoff() {
        let executor = RetryExecutor::new(CancellationToken::new());
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let calls = AtomicU32::new(0);

        let start = Instant::now();
        let result = executor
            .retry_with_backoff("op", &policy, || async { flaky(&calls, 2) })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_n_failures_produce_n_doubling_sleeps() {
        let observer = Arc::new(RecordingObserver::default());
        let executor =
            RetryExecutor::new(CancellationToken::new()).with_observer(observer.clone());
        let policy = RetryPolicy::new(5, Duration::from_millis(250));
        let calls = AtomicU32::new(0);

        let result = executor
            .retry_with_backoff("fetch", &policy, || async { flaky(&calls, 4) })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        let delays: Vec<Duration> = observer
            .retries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, d)| *d)
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(2000),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_exhausts_after_budget() {
        let executor = RetryExecutor::new(CancellationToken::new());
        let policy = RetryPolicy::new(4, Duration::from_millis(10));
        let calls = AtomicU32::new(0);

        let err = executor
            .retry_with_backoff("op", &policy, || async { flaky(&calls, u32::MAX) })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(err.attempts(), 4);
        assert!(!err.is_interrupted());
        assert_eq!(
            err.last_failure(),
            Some(&TransientFailure::Failed("boom #4".to_string()))
        );
        assert!(err.to_string().contains("retries exhausted after 4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let observer = Arc::new(RecordingObserver::default());
        let executor = RetryExecutor::new(token).with_observer(observer.clone());
        let calls = AtomicU32::new(0);

        let start = Instant::now();
        let err = executor
            .retry_with_backoff("op", &RetryPolicy::default(), || async {
                flaky(&calls, 0)
            })
            .await
            .unwrap_err();

        assert_eq!(err, RetryError::Interrupted { attempts: 0 });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(observer.retries.lock().unwrap().is_empty());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_interrupts_without_extra_attempt() {
        let token = CancellationToken::new();
        let executor = RetryExecutor::new(token.clone());
        let policy = RetryPolicy::new(5, Duration::from_secs(10));
        let calls = AtomicU32::new(0);

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                token.cancel();
            })
        };

        let start = Instant::now();
        let err = executor
            .retry_with_backoff("op", &policy, || async { flaky(&calls, u32::MAX) })
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert_eq!(err, RetryError::Interrupted { attempts: 1 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_failing_attempt_records_no_retry() {
        let token = CancellationToken::new();
        let observer = Arc::new(RecordingObserver::default());
        let executor = RetryExecutor::new(token.clone()).with_observer(observer.clone());
        let calls = AtomicU32::new(0);

        let start = Instant::now();
        let err = executor
            .retry_with_backoff("op", &RetryPolicy::new(3, Duration::from_secs(1)), || {
                token.cancel();
                async { flaky(&calls, u32::MAX) }
            })
            .await
            .unwrap_err();

        assert_eq!(err, RetryError::Interrupted { attempts: 1 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(observer.retries.lock().unwrap().is_empty());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_counts_as_failure() {
        let executor = RetryExecutor::new(CancellationToken::new());
        let policy =
            RetryPolicy::new(2, Duration::from_millis(5)).with_attempt_timeout(Duration::from_secs(1));

        let err = executor
            .retry_with_backoff("slow", &policy, || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, String>(())
            })
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), 2);
        assert_eq!(
            err.last_failure(),
            Some(&TransientFailure::TimedOut(Duration::from_secs(1)))
        );
    }

    #[tokio::test]
    async fn test_success_first_try_makes_one_call() {
        let executor = RetryExecutor::new(CancellationToken::new());
        let calls = AtomicU32::new(0);
        let value = executor
            .retry_with_backoff("op", &RetryPolicy::single_attempt(), || async {
                flaky(&calls, 0)
            })
            .await
            .unwrap();
        assert_eq!(value, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_interrupted_display() {
        let err: RetryError<String> = RetryError::Interrupted { attempts: 2 };
        assert_eq!(err.to_string(), "interrupted after 2 attempt(s)");
        assert!(err.last_failure().is_none());
    }
}
