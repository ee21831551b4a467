//! Error types for the remote coordination substrates.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Faults a remote coordination store can produce.
///
/// The retry decorator in `fleetup-session` classifies these: transient
/// faults are retried, contention faults mean the caller lost a race.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The lease on an object is held by someone else.
    #[error("lease unavailable for {0}")]
    LeaseUnavailable(String),

    /// A write was conditioned on a lease the server no longer honors.
    #[error("lease lost for {0}")]
    LeaseLost(String),

    /// An insert hit an already-existing row.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A version-conditioned write saw a different version than it read.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("remote store timeout: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed without anything else
    /// changing.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }

    /// Whether the fault means another participant won a race for the same
    /// resource.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            Self::LeaseUnavailable(_)
                | Self::LeaseLost(_)
                | Self::Conflict(_)
                | Self::PreconditionFailed(_)
        )
    }
}
