//! Retry decorator — bounded fixed-interval retries around any session.
//!
//! Keeps the admission algorithms free of retry concerns: the decorator
//! composes around either realization and classifies faults through a
//! pluggable predicate. Refusals (`Ok(false)`) are results, never retried.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{SessionError, SessionResult};
use crate::session::UpdateSession;

/// Decides whether a fault is worth retrying.
pub type FaultPredicate = Arc<dyn Fn(&SessionError) -> bool + Send + Sync>;

/// Retry bounds and pacing.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Fixed interval between attempts.
    pub interval: Duration,
    /// Attempt bound for `try_start`. Kept small so "fleet busy" resolves
    /// to a fast not-admitted instead of a slow hang.
    pub start_attempts: u32,
    /// Attempt bound for `end`.
    pub end_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            start_attempts: 3,
            end_attempts: 8,
        }
    }
}

/// An `UpdateSession` that retries transient faults of the wrapped
/// session.
pub struct RetryingSession<S> {
    inner: S,
    policy: RetryPolicy,
    is_retryable: FaultPredicate,
}

impl<S> RetryingSession<S> {
    pub fn new(inner: S) -> Self {
        Self::with_policy(inner, RetryPolicy::default())
    }

    pub fn with_policy(inner: S, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            is_retryable: Arc::new(SessionError::is_transient),
        }
    }

    /// Replace the fault classification predicate.
    pub fn with_fault_predicate(mut self, predicate: FaultPredicate) -> Self {
        self.is_retryable = predicate;
        self
    }
}

impl<S: UpdateSession> RetryingSession<S> {
    async fn run<T, F, Fut>(&self, what: &str, attempts: u32, mut call: F) -> SessionResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SessionResult<T>>,
    {
        let mut attempt = 1u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if (self.is_retryable)(&e) => {
                    if attempt >= attempts {
                        warn!(%what, attempts, error = %e, "session retries exhausted");
                        return Err(SessionError::Unavailable(format!(
                            "{what} failed after {attempts} attempts: {e}"
                        )));
                    }
                    debug!(%what, attempt, error = %e, "transient session fault, backing off");
                    tokio::time::sleep(self.policy.interval).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<S: UpdateSession> UpdateSession for RetryingSession<S> {
    async fn try_start(&self, app_id: &str) -> SessionResult<bool> {
        self.run("TryStart", self.policy.start_attempts, || {
            self.inner.try_start(app_id)
        })
        .await
    }

    async fn end(&self, app_id: &str) -> SessionResult<()> {
        self.run("End", self.policy.end_attempts, || self.inner.end(app_id))
            .await
    }
}
