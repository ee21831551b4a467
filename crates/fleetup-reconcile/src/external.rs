//! Contracts of the external collaborators the reconciler consumes.
//!
//! Binary transfer, process supervision, and status reporting live
//! outside this crate; the reconciler only depends on these boundaries.
//! Errors cross them as `anyhow::Error`.

use async_trait::async_trait;

use fleetup_model::{ApplicationIdentity, DeploymentRecord};

/// Source of the desired-state records that apply to this node.
///
/// Filtering by cluster id and property matching happens behind this
/// boundary; the reconciler receives only records meant for it.
#[async_trait]
pub trait DesiredStateSource: Send + Sync {
    async fn fetch_records(&self) -> anyhow::Result<Vec<DeploymentRecord>>;
}

/// The local application supervisor: owns the set of running
/// applications on this node and applies changes to it.
#[async_trait]
pub trait ApplicationSupervisor: Send + Sync {
    /// Identities of the applications currently running on this node.
    async fn running_identities(&self) -> anyhow::Result<Vec<ApplicationIdentity>>;

    /// Install and start one application version.
    async fn install(&self, record: &DeploymentRecord) -> anyhow::Result<()>;

    /// Stop and remove one application version.
    async fn uninstall(&self, identity: &ApplicationIdentity) -> anyhow::Result<()>;

    /// Swap an application's versions in one operation: `old` goes away,
    /// `new` comes up.
    async fn update(
        &self,
        old: &[ApplicationIdentity],
        new: &[DeploymentRecord],
    ) -> anyhow::Result<()>;
}

/// The binary repository holding application packages.
#[async_trait]
pub trait BinaryRepository: Send + Sync {
    /// Fetch the package for one application version onto this node.
    async fn download(&self, identity: &ApplicationIdentity) -> anyhow::Result<()>;

    /// Whether the package is already present locally.
    async fn contains(&self, identity: &ApplicationIdentity) -> anyhow::Result<bool>;

    /// Drop a locally cached package.
    async fn delete(&self, identity: &ApplicationIdentity) -> anyhow::Result<()>;
}

/// One line of a published status snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub identity: ApplicationIdentity,
    pub cluster_id: String,
    pub instance_id: String,
    /// Unix timestamp (seconds) of the snapshot.
    pub timestamp: u64,
}

/// Best-effort sink for per-node status snapshots.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(
        &self,
        cluster_id: &str,
        instance_id: &str,
        entries: &[StatusEntry],
    ) -> anyhow::Result<()>;
}
