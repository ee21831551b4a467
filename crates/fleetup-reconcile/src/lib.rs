//! fleetup reconciler — the per-node diff-and-apply control loop.
//!
//! Each tick fetches the desired state filtered to this node, diffs it
//! against the currently running applications, downloads missing
//! binaries, acquires the update session, applies the plan, and publishes
//! a status snapshot. The reconciler is the error boundary for the whole
//! core: every failure is logged and converted into "try again next
//! tick".
//!
//! # Components
//!
//! - **`external`** — contracts of the consumed collaborators
//! - **`plan`** — pure diff/grouping computation
//! - **`reconciler`** — the tick orchestrator and run loop
//! - **`config`** — TOML node configuration

pub mod config;
pub mod error;
pub mod external;
pub mod plan;
pub mod reconciler;

pub use config::{NodeConfig, SessionBackend, SessionSettings};
pub use error::{ReconcileError, ReconcileResult};
pub use external::{
    ApplicationSupervisor, BinaryRepository, DesiredStateSource, StatusEntry, StatusPublisher,
};
pub use plan::{AppAction, ReconcilePlan, build_plan};
pub use reconciler::{Reconciler, ReconcilerSettings, TickOutcome};

/// Current Unix epoch in seconds.
pub(crate) fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
