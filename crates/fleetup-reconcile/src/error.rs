//! Reconciler error types.

use fleetup_session::SessionError;
use thiserror::Error;

/// Result type alias for reconciler internals.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Errors a reconciliation tick can fail with.
///
/// None of these escape the tick: the reconciler logs them and reports a
/// failed outcome, and the next tick retries from scratch.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to fetch desired state: {0}")]
    FetchDesired(#[source] anyhow::Error),

    #[error("failed to list running applications: {0}")]
    ListRunning(#[source] anyhow::Error),

    /// Grouped download failures; every individual error is preserved.
    #[error("binary downloads failed: {}", join(.errors))]
    Download { errors: Vec<String> },

    /// Grouped apply failures; every individual error is preserved.
    #[error("apply operations failed: {}", join(.errors))]
    Apply { errors: Vec<String> },

    #[error("update session error: {0}")]
    Session(#[from] SessionError),
}

fn join(errors: &[String]) -> String {
    format!("[{}]", errors.join("; "))
}
