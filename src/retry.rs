use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// The two failure classes `EventStore`/`Publisher` operations report.
/// `Transient` is retried by `retry_async` with backoff; `Terminal` stops
/// the retry loop immediately. Encodes the same success/transient/
/// terminal sum type the source's callback-chained retry executor does
/// (spec §9), just as a plain Rust enum instead of three callbacks.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CommitIoError {
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Terminal(String),
}

/// Deferred zero-arg action, external to the retry executor so backoff
/// sleeps can be swapped out in tests (`ImmediateScheduler`) without
/// touching retry logic.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn after(&self, delay: Duration);
}

pub type DynScheduler = std::sync::Arc<dyn Scheduler>;

#[derive(Debug, Default)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn after(&self, delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// A scheduler with no delay, for tests that want bounded-retry behavior
/// without burning wall-clock time.
#[derive(Debug, Default)]
pub struct ImmediateScheduler;

#[async_trait]
impl Scheduler for ImmediateScheduler {
    async fn after(&self, _delay: Duration) {}
}

/// Backoff and retry-budget policy for one class of operation (append,
/// find, publish). Spec §4.4 leaves backoff "implementation-chosen" and
/// the retry budget unbounded for transient classes; this crate picks
/// exponential backoff capped at `max_delay`, with an optional retry cap
/// — see DESIGN.md for the Open Question resolution.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            max_retries: None,
        }
    }
}

impl RetryPolicy {
    pub fn bounded(max_retries: u32) -> Self {
        Self {
            max_retries: Some(max_retries),
            ..Default::default()
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Bounded-retry loop around a fallible async operation (C4). Not
/// recursive — spec §9 explicitly requires the worker's analogous
/// re-entry to be loop-bound, and the same reasoning applies here: an
/// unbounded transient-failure storm must not grow the call stack.
pub async fn retry_async<T, F, Fut>(
    op_name: &str,
    mut operation: F,
    context_describer: impl Fn() -> String + Send,
    policy: &RetryPolicy,
    scheduler: &dyn Scheduler,
) -> Result<T, String>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T, CommitIoError>> + Send,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(CommitIoError::Terminal(message)) => {
                error!(
                    op = op_name,
                    context = %context_describer(),
                    error = %message,
                    "terminal failure, giving up"
                );
                return Err(message);
            }
            Err(CommitIoError::Transient(message)) => {
                if let Some(max) = policy.max_retries {
                    if attempt >= max {
                        error!(
                            op = op_name,
                            context = %context_describer(),
                            attempts = attempt,
                            error = %message,
                            "exhausted retry budget"
                        );
                        return Err(format!(
                            "{op_name} failed after {attempt} retries: {message}"
                        ));
                    }
                }
                let delay = policy.delay_for(attempt);
                attempt += 1;
                warn!(
                    op = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    context = %context_describer(),
                    error = %message,
                    "retrying after transient failure"
                );
                scheduler.after(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let policy = RetryPolicy::default();
        let scheduler = ImmediateScheduler;
        let result: Result<u32, String> = retry_async(
            "op",
            || async { Ok::<u32, CommitIoError>(42) },
            || "ctx".to_string(),
            &policy,
            &scheduler,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let policy = RetryPolicy::default();
        let scheduler = ImmediateScheduler;
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_async(
            "op",
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(CommitIoError::Transient("boom".to_string()))
                    } else {
                        Ok(7)
                    }
                }
            },
            || "ctx".to_string(),
            &policy,
            &scheduler,
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_failure_stops_immediately() {
        let policy = RetryPolicy::default();
        let scheduler = ImmediateScheduler;
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_async(
            "op",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CommitIoError::Terminal("nope".to_string())) }
            },
            || "ctx".to_string(),
            &policy,
            &scheduler,
        )
        .await;
        assert_eq!(result.unwrap_err(), "nope");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bounded_retry_gives_up() {
        let policy = RetryPolicy::bounded(2);
        let scheduler = ImmediateScheduler;
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_async(
            "op",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CommitIoError::Transient("still down".to_string())) }
            },
            || "ctx".to_string(),
            &policy,
            &scheduler,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
