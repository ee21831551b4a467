//! DesiredState — the immutable identity → record mapping.

use std::collections::{BTreeMap, BTreeSet};

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::identity::ApplicationIdentity;
use crate::record::DeploymentRecord;

/// The globally published desired state: at most one record per identity.
///
/// A persistent value: every mutation copies the backing map and returns a
/// new `DesiredState`, so two values never share mutable storage. Equality
/// and hashing are structural over the record set, order-independent.
///
/// Serializes as a list of records (`[{id, version, targetClusters,
/// properties}]`); decoding rejects duplicate identities and records with
/// no target clusters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<DeploymentRecord>", into = "Vec<DeploymentRecord>")]
pub struct DesiredState {
    records: BTreeMap<ApplicationIdentity, DeploymentRecord>,
}

impl DesiredState {
    /// An empty desired state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of (identity, record) entries.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // ── Queries ────────────────────────────────────────────────────

    /// All application names, deduplicated, in order.
    pub fn application_names(&self) -> Vec<String> {
        let names: BTreeSet<&str> = self.records.keys().map(|id| id.name()).collect();
        names.into_iter().map(str::to_string).collect()
    }

    /// All versions of one application, in order.
    pub fn versions(&self, name: &str) -> Vec<Version> {
        self.records
            .keys()
            .filter(|id| id.name() == name)
            .map(|id| id.version().clone())
            .collect()
    }

    /// Versions of one application targeted at the given cluster.
    pub fn versions_in_cluster(&self, name: &str, cluster: &str) -> Vec<Version> {
        self.records
            .iter()
            .filter(|(id, record)| id.name() == name && record.targets_cluster(cluster))
            .map(|(id, _)| id.version().clone())
            .collect()
    }

    /// Union of target clusters across all versions of an application.
    pub fn clusters(&self, name: &str) -> BTreeSet<String> {
        self.records
            .iter()
            .filter(|(id, _)| id.name() == name)
            .flat_map(|(_, record)| record.target_clusters().iter().cloned())
            .collect()
    }

    /// Target clusters of one exact identity.
    pub fn clusters_of(&self, identity: &ApplicationIdentity) -> Option<&BTreeSet<String>> {
        self.records.get(identity).map(|r| r.target_clusters())
    }

    /// Whether any version of the application is present.
    pub fn contains_application(&self, name: &str) -> bool {
        self.records.keys().any(|id| id.name() == name)
    }

    /// Whether this exact identity is present.
    pub fn contains_version(&self, identity: &ApplicationIdentity) -> bool {
        self.records.contains_key(identity)
    }

    /// Whether this exact identity is targeted at the given cluster.
    pub fn contains_deployment(&self, identity: &ApplicationIdentity, cluster: &str) -> bool {
        self.records
            .get(identity)
            .is_some_and(|r| r.targets_cluster(cluster))
    }

    /// The record for one identity, if present.
    pub fn record(&self, identity: &ApplicationIdentity) -> Option<&DeploymentRecord> {
        self.records.get(identity)
    }

    /// All records, in identity order.
    pub fn records(&self) -> impl Iterator<Item = &DeploymentRecord> {
        self.records.values()
    }

    /// Records targeted at the given cluster. This is the node-side filter
    /// applied by desired-state sources.
    pub fn records_for_cluster(&self, cluster: &str) -> Vec<&DeploymentRecord> {
        self.records
            .values()
            .filter(|r| r.targets_cluster(cluster))
            .collect()
    }

    // ── Edits (copy-on-write) ──────────────────────────────────────

    /// Add a deployment of `identity` to `cluster`.
    ///
    /// Creates the record if the identity is absent, extends it otherwise.
    /// Fails if the exact (identity, cluster) pair already exists.
    pub fn add_deployment(
        &self,
        identity: ApplicationIdentity,
        cluster: &str,
    ) -> ModelResult<Self> {
        let mut records = self.records.clone();
        match records.get(&identity) {
            Some(existing) => {
                if existing.targets_cluster(cluster) {
                    return Err(ModelError::DuplicateDeployment {
                        identity: identity.to_string(),
                        cluster: cluster.to_string(),
                    });
                }
                let extended = existing.with_cluster(cluster)?;
                records.insert(identity, extended);
            }
            None => {
                records.insert(identity.clone(), DeploymentRecord::new(identity, cluster));
            }
        }
        Ok(Self { records })
    }

    /// Insert a full record. Fails if the identity is already present.
    pub fn add_record(&self, record: DeploymentRecord) -> ModelResult<Self> {
        if self.records.contains_key(record.identity()) {
            return Err(ModelError::DuplicateRecord(record.identity().to_string()));
        }
        let mut records = self.records.clone();
        records.insert(record.identity().clone(), record);
        Ok(Self { records })
    }

    /// Replace the record for one identity with an edited copy.
    ///
    /// Fails if the identity is absent.
    pub fn replace_record(&self, record: DeploymentRecord) -> ModelResult<Self> {
        if !self.records.contains_key(record.identity()) {
            return Err(ModelError::VersionNotFound(record.identity().to_string()));
        }
        let mut records = self.records.clone();
        records.insert(record.identity().clone(), record);
        Ok(Self { records })
    }

    /// Remove every version of an application.
    pub fn remove_application(&self, name: &str) -> ModelResult<Self> {
        if !self.contains_application(name) {
            return Err(ModelError::ApplicationNotFound(name.to_string()));
        }
        let records = self
            .records
            .iter()
            .filter(|(id, _)| id.name() != name)
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect();
        Ok(Self { records })
    }

    /// Remove one exact version of an application.
    pub fn remove_version(&self, identity: &ApplicationIdentity) -> ModelResult<Self> {
        if !self.records.contains_key(identity) {
            return Err(ModelError::VersionNotFound(identity.to_string()));
        }
        let mut records = self.records.clone();
        records.remove(identity);
        Ok(Self { records })
    }

    /// Remove one (identity, cluster) deployment, cascading: the version
    /// goes when its last cluster goes, the application when its last
    /// version goes.
    pub fn remove_deployment(
        &self,
        identity: &ApplicationIdentity,
        cluster: &str,
    ) -> ModelResult<Self> {
        let record = self
            .records
            .get(identity)
            .ok_or_else(|| ModelError::DeploymentNotFound {
                identity: identity.to_string(),
                cluster: cluster.to_string(),
            })?;

        let mut records = self.records.clone();
        match record.without_cluster(cluster)? {
            Some(trimmed) => {
                records.insert(identity.clone(), trimmed);
            }
            None => {
                records.remove(identity);
            }
        }
        Ok(Self { records })
    }
}

impl TryFrom<Vec<DeploymentRecord>> for DesiredState {
    type Error = ModelError;

    fn try_from(list: Vec<DeploymentRecord>) -> Result<Self, Self::Error> {
        let mut records = BTreeMap::new();
        for record in list {
            let identity = record.identity().clone();
            if records.insert(identity.clone(), record).is_some() {
                return Err(ModelError::DuplicateRecord(identity.to_string()));
            }
        }
        Ok(Self { records })
    }
}

impl From<DesiredState> for Vec<DeploymentRecord> {
    fn from(state: DesiredState) -> Self {
        state.records.into_values().collect()
    }
}
