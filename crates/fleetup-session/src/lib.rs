//! fleetup update sessions — distributed mutual exclusion for rolling
//! updates.
//!
//! An update session gates which update domain may currently mutate local
//! application state across the fleet. The contract is two calls —
//! `try_start` and `end` — realized over two interchangeable remote
//! substrates and wrapped by a retry decorator.
//!
//! # Components
//!
//! - **`session`** — the `UpdateSession` contract
//! - **`lease`** — realization over a leased blob's metadata fields
//! - **`table`** — realization over a transactional table partition
//! - **`retry`** — bounded-backoff retry decorator

pub mod error;
pub mod lease;
pub mod retry;
pub mod session;
pub mod table;

pub use error::{SessionError, SessionResult};
pub use lease::{LeaseSessionConfig, LeaseUpdateSession};
pub use retry::{RetryPolicy, RetryingSession};
pub use session::UpdateSession;
pub use table::{TableSessionConfig, TableUpdateSession};

/// Current Unix epoch in milliseconds, for staleness comparisons.
pub(crate) fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
