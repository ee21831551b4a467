//! Node configuration — TOML-loaded settings for one fleet node.

use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use fleetup_session::{LeaseSessionConfig, RetryPolicy, TableSessionConfig};

use crate::reconciler::ReconcilerSettings;

fn default_tick_interval_secs() -> u64 {
    30
}

/// Which coordination substrate backs the update session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionBackend {
    Lease,
    Table,
}

/// Update-session tuning. All knobs have defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub backend: SessionBackend,
    /// Coordination lease TTL (lease backend only), seconds.
    pub lease_ttl_secs: u64,
    /// Enlistment staleness TTL, seconds.
    pub enlistment_ttl_secs: u64,
    /// Fixed retry interval, seconds.
    pub retry_interval_secs: u64,
    /// Attempt bound for TryStart.
    pub start_attempts: u32,
    /// Attempt bound for End.
    pub end_attempts: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            backend: SessionBackend::Lease,
            lease_ttl_secs: 60,
            enlistment_ttl_secs: 600,
            retry_interval_secs: policy.interval.as_secs(),
            start_attempts: policy.start_attempts,
            end_attempts: policy.end_attempts,
        }
    }
}

/// Configuration of one fleet node.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Cluster this node belongs to. Doubles as the fleet scope of the
    /// update session.
    pub cluster_id: String,
    /// This node's instance id.
    pub instance_id: String,
    /// Update domain this node belongs to.
    pub update_domain: String,
    /// Application id under which the tick gate coordinates. Defaults to
    /// the cluster id.
    #[serde(default)]
    pub coordination_id: Option<String>,
    /// Seconds between reconciliation ticks.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default)]
    pub session: SessionSettings,
}

impl NodeConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        toml::from_str(raw).context("invalid node configuration")
    }

    pub fn coordination_id(&self) -> &str {
        self.coordination_id.as_deref().unwrap_or(&self.cluster_id)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn reconciler_settings(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            cluster_id: self.cluster_id.clone(),
            instance_id: self.instance_id.clone(),
            coordination_id: self.coordination_id().to_string(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            interval: Duration::from_secs(self.session.retry_interval_secs),
            start_attempts: self.session.start_attempts,
            end_attempts: self.session.end_attempts,
        }
    }

    pub fn lease_session_config(&self) -> LeaseSessionConfig {
        LeaseSessionConfig::new(&self.cluster_id, &self.instance_id, &self.update_domain)
            .with_lease_ttl(Duration::from_secs(self.session.lease_ttl_secs))
            .with_enlistment_ttl(Duration::from_secs(self.session.enlistment_ttl_secs))
    }

    pub fn table_session_config(&self) -> TableSessionConfig {
        TableSessionConfig::new(&self.cluster_id, &self.instance_id, &self.update_domain)
            .with_enlistment_ttl(Duration::from_secs(self.session.enlistment_ttl_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = NodeConfig::from_toml_str(
            r#"
            cluster_id = "east"
            instance_id = "node-1"
            update_domain = "1"
            "#,
        )
        .unwrap();

        assert_eq!(config.coordination_id(), "east");
        assert_eq!(config.tick_interval(), Duration::from_secs(30));
        assert_eq!(config.session.backend, SessionBackend::Lease);
        assert_eq!(config.session.enlistment_ttl_secs, 600);
    }

    #[test]
    fn full_config_overrides_defaults() {
        let config = NodeConfig::from_toml_str(
            r#"
            cluster_id = "east"
            instance_id = "node-1"
            update_domain = "2"
            coordination_id = "apps"
            tick_interval_secs = 10

            [session]
            backend = "table"
            enlistment_ttl_secs = 120
            retry_interval_secs = 1
            start_attempts = 2
            end_attempts = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.coordination_id(), "apps");
        assert_eq!(config.tick_interval(), Duration::from_secs(10));
        assert_eq!(config.session.backend, SessionBackend::Table);

        let policy = config.retry_policy();
        assert_eq!(policy.interval, Duration::from_secs(1));
        assert_eq!(policy.start_attempts, 2);
        assert_eq!(policy.end_attempts, 4);

        let table = config.table_session_config();
        assert_eq!(table.fleet_id, "east");
        assert_eq!(table.update_domain, "2");
        assert_eq!(table.enlistment_ttl, Duration::from_secs(120));
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let err = NodeConfig::from_toml_str(r#"cluster_id = "east""#).unwrap_err();
        assert!(err.to_string().contains("invalid node configuration"));
    }

    #[test]
    fn lease_config_carries_fleet_scope() {
        let config = NodeConfig::from_toml_str(
            r#"
            cluster_id = "east"
            instance_id = "node-1"
            update_domain = "1"
            "#,
        )
        .unwrap();

        let lease = config.lease_session_config();
        assert_eq!(lease.fleet_id, "east");
        assert_eq!(lease.instance_id, "node-1");
        assert_eq!(lease.lease_ttl, Duration::from_secs(60));
    }
}
