//! Error types for update sessions.

use fleetup_store::StoreError;
use thiserror::Error;

/// Result type alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors an update session can surface.
///
/// A refusal (not admitted) is `Ok(false)` from `try_start`, never an
/// error. Errors mean the session could not decide.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The coordination store could not be reached or kept refusing after
    /// bounded retries. Distinct from a refusal: the caller learned
    /// nothing about the fleet's state.
    #[error("update session unavailable: {0}")]
    Unavailable(String),

    #[error("coordination store error: {0}")]
    Store(#[from] StoreError),
}

impl SessionError {
    /// Whether retrying the whole call may succeed.
    ///
    /// Lease contention counts: another node holds the coordination lease
    /// only for the duration of its own admission check, so the next
    /// attempt usually finds it free. A lease lost mid-call is recovered
    /// the same way — the retried call re-acquires.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => {
                e.is_transient()
                    || matches!(
                        e,
                        StoreError::LeaseUnavailable(_) | StoreError::LeaseLost(_)
                    )
            }
            Self::Unavailable(_) => false,
        }
    }
}
