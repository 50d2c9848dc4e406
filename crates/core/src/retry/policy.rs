use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rapport_llm::LlmError;
use tokio_util::sync::CancellationToken;

use super::classify::{ErrorClassifier, FailureKind};

/// Waits out the backoff between attempts. Swapped for a recording fake in tests.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Final failure of a retried call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?} after {attempts} attempt(s): {message}")]
pub struct ServiceFailure {
    pub kind: FailureKind,
    pub attempts: u32,
    pub message: String,
}

impl ServiceFailure {
    fn cancelled(attempts: u32) -> Self {
        Self {
            kind: FailureKind::Cancelled,
            attempts,
            message: "cancelled".into(),
        }
    }
}

/// Fixed-backoff retry with a per-attempt timeout.
///
/// An attempt that exceeds `attempt_timeout` counts as `Timeout`. Retryable
/// failures are attempted up to `max_retries` more times, sleeping `backoff`
/// between attempts; non-retryable failures surface immediately. Once `cancel`
/// fires no further attempt starts and the backoff is cut short.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Duration,
    attempt_timeout: Duration,
    classifier: ErrorClassifier,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish()
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_retries,
            backoff,
            attempt_timeout,
            classifier: ErrorClassifier,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run `op` until it succeeds, fails non-retryably, attempts run out or
    /// `cancel` fires.
    pub async fn run<T, F, Fut>(
        &self,
        service: &'static str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, ServiceFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let total_attempts = self.max_retries + 1;
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                tracing::info!(service, attempt, "cancelled, no further attempts");
                return Err(ServiceFailure::cancelled(attempt));
            }
            attempt += 1;
            let outcome = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout),
            };
            let error = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(service, attempt, "call recovered after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            let kind = self.classifier.classify(&error);
            if cancel.is_cancelled() {
                tracing::info!(service, attempt, kind = ?kind, "cancelled after failed attempt");
                return Err(ServiceFailure::cancelled(attempt));
            }
            if !kind.is_retryable() || attempt >= total_attempts {
                tracing::warn!(
                    service,
                    attempt,
                    kind = ?kind,
                    error = %error,
                    "call failed, giving up"
                );
                return Err(ServiceFailure {
                    kind,
                    attempts: attempt,
                    message: error.to_string(),
                });
            }

            tracing::warn!(
                service,
                attempt,
                kind = ?kind,
                error = %error,
                backoff_ms = self.backoff.as_millis() as u64,
                "call failed, retrying"
            );
            tokio::select! {
                _ = self.sleeper.sleep(self.backoff) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }
}
