//! Deployment record — one application version and where it should run.

use std::collections::{BTreeMap, BTreeSet};

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::identity::ApplicationIdentity;

/// Desired deployment of one application version.
///
/// Immutable: every edit returns a new record and leaves the original
/// untouched. A record always targets at least one cluster — removing the
/// last cluster yields `None`, and the caller must drop the record rather
/// than keep an empty one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RecordWire", into = "RecordWire")]
pub struct DeploymentRecord {
    identity: ApplicationIdentity,
    target_clusters: BTreeSet<String>,
    properties: BTreeMap<String, String>,
}

impl DeploymentRecord {
    /// Create a record targeting a single cluster.
    pub fn new(identity: ApplicationIdentity, cluster: impl Into<String>) -> Self {
        Self {
            identity,
            target_clusters: BTreeSet::from([cluster.into()]),
            properties: BTreeMap::new(),
        }
    }

    /// The application identity this record deploys.
    pub fn identity(&self) -> &ApplicationIdentity {
        &self.identity
    }

    /// The clusters this version should run on. Never empty.
    pub fn target_clusters(&self) -> &BTreeSet<String> {
        &self.target_clusters
    }

    /// Per-application properties, in key order.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Look up one property value.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Whether this record targets the given cluster.
    pub fn targets_cluster(&self, cluster: &str) -> bool {
        self.target_clusters.contains(cluster)
    }

    /// Return a new record that also targets `cluster`.
    ///
    /// Fails if the cluster is already a target.
    pub fn with_cluster(&self, cluster: impl Into<String>) -> ModelResult<Self> {
        let cluster = cluster.into();
        if self.target_clusters.contains(&cluster) {
            return Err(ModelError::DuplicateCluster {
                identity: self.identity.to_string(),
                cluster,
            });
        }
        let mut next = self.clone();
        next.target_clusters.insert(cluster);
        Ok(next)
    }

    /// Return a new record without `cluster`, or `None` if that was the
    /// last target cluster.
    ///
    /// Fails if the cluster was not a target.
    pub fn without_cluster(&self, cluster: &str) -> ModelResult<Option<Self>> {
        if !self.target_clusters.contains(cluster) {
            return Err(ModelError::DeploymentNotFound {
                identity: self.identity.to_string(),
                cluster: cluster.to_string(),
            });
        }
        if self.target_clusters.len() == 1 {
            return Ok(None);
        }
        let mut next = self.clone();
        next.target_clusters.remove(cluster);
        Ok(Some(next))
    }

    /// Return a new record with the property set (insert or replace).
    pub fn with_property(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.properties.insert(key.into(), value.into());
        next
    }

    /// Return a new record without the property.
    ///
    /// Fails if the property is not present.
    pub fn without_property(&self, key: &str) -> ModelResult<Self> {
        if !self.properties.contains_key(key) {
            return Err(ModelError::PropertyNotFound {
                identity: self.identity.to_string(),
                key: key.to_string(),
            });
        }
        let mut next = self.clone();
        next.properties.remove(key);
        Ok(next)
    }
}

/// Wire shape of a record in the desired-state document.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordWire {
    id: String,
    version: Version,
    target_clusters: BTreeSet<String>,
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

impl TryFrom<RecordWire> for DeploymentRecord {
    type Error = ModelError;

    fn try_from(wire: RecordWire) -> Result<Self, Self::Error> {
        let identity = ApplicationIdentity::new(wire.id, wire.version);
        if wire.target_clusters.is_empty() {
            return Err(ModelError::EmptyTargetClusters(identity.to_string()));
        }
        Ok(Self {
            identity,
            target_clusters: wire.target_clusters,
            properties: wire.properties,
        })
    }
}

impl From<DeploymentRecord> for RecordWire {
    fn from(record: DeploymentRecord) -> Self {
        Self {
            id: record.identity.name().to_string(),
            version: record.identity.version().clone(),
            target_clusters: record.target_clusters,
            properties: record.properties,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, version: &str, cluster: &str) -> DeploymentRecord {
        DeploymentRecord::new(
            ApplicationIdentity::new(name, Version::parse(version).unwrap()),
            cluster,
        )
    }

    #[test]
    fn edits_leave_the_original_untouched() {
        let original = record("billing", "1.0.0", "east");
        let extended = original.with_cluster("west").unwrap();

        assert_eq!(original.target_clusters().len(), 1);
        assert_eq!(extended.target_clusters().len(), 2);
        assert!(extended.targets_cluster("east"));
        assert!(extended.targets_cluster("west"));
    }

    #[test]
    fn duplicate_cluster_is_rejected() {
        let r = record("billing", "1.0.0", "east");
        let err = r.with_cluster("east").unwrap_err();
        assert!(matches!(err, ModelError::DuplicateCluster { .. }));
    }

    #[test]
    fn removing_last_cluster_drops_the_record() {
        let r = record("billing", "1.0.0", "east");
        assert_eq!(r.without_cluster("east").unwrap(), None);

        let two = r.with_cluster("west").unwrap();
        let one = two.without_cluster("east").unwrap().unwrap();
        assert!(one.targets_cluster("west"));
        assert!(!one.targets_cluster("east"));
    }

    #[test]
    fn removing_absent_cluster_fails() {
        let r = record("billing", "1.0.0", "east");
        let err = r.without_cluster("west").unwrap_err();
        assert!(matches!(err, ModelError::DeploymentNotFound { .. }));
    }

    #[test]
    fn property_roundtrip_and_missing_removal() {
        let r = record("billing", "1.0.0", "east").with_property("tier", "gold");
        assert_eq!(r.property("tier"), Some("gold"));

        let stripped = r.without_property("tier").unwrap();
        assert_eq!(stripped.property("tier"), None);
        assert!(matches!(
            stripped.without_property("tier"),
            Err(ModelError::PropertyNotFound { .. })
        ));
    }

    #[test]
    fn wire_format_uses_camel_case_fields() {
        let r = record("billing", "1.2.0", "east").with_property("tier", "gold");
        let json = serde_json::to_value(&r).unwrap();

        assert_eq!(json["id"], "billing");
        assert_eq!(json["version"], "1.2.0");
        assert_eq!(json["targetClusters"][0], "east");
        assert_eq!(json["properties"]["tier"], "gold");
    }

    #[test]
    fn empty_target_clusters_rejected_on_decode() {
        let json = r#"{"id":"billing","version":"1.0.0","targetClusters":[]}"#;
        let err = serde_json::from_str::<DeploymentRecord>(json).unwrap_err();
        assert!(err.to_string().contains("at least one cluster"));
    }

    #[test]
    fn properties_default_to_empty_on_decode() {
        let json = r#"{"id":"billing","version":"1.0.0","targetClusters":["east"]}"#;
        let r: DeploymentRecord = serde_json::from_str(json).unwrap();
        assert!(r.properties().is_empty());
    }
}
