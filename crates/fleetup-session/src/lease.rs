//! Lease-based update session — one leased blob per application.
//!
//! The blob's metadata carries the whole coordination state in two string
//! fields: the active update domain and the comma-joined set of enlisted
//! instance ids. The exclusive lease serializes read-modify-write cycles;
//! writes are conditioned on the held lease so a lost lease cannot clobber
//! a concurrent holder.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use fleetup_store::LeaseBlobStore;

use crate::epoch_millis;
use crate::error::SessionResult;
use crate::session::UpdateSession;

/// Metadata field holding the active update domain.
pub const UPDATE_DOMAIN_FIELD: &str = "updateDomain";
/// Metadata field holding the comma-joined enlisted instance ids.
pub const INSTANCES_FIELD: &str = "updateDomainInstances";

/// Configuration for a lease-based session.
#[derive(Debug, Clone)]
pub struct LeaseSessionConfig {
    /// Fleet scope; prefixes every blob key so fleets never interfere.
    pub fleet_id: String,
    /// This node's instance id.
    pub instance_id: String,
    /// The update domain this node belongs to.
    pub update_domain: String,
    /// How long the coordination lease is held per call.
    pub lease_ttl: Duration,
    /// Age after which an untouched blob's enlistments count as abandoned.
    pub enlistment_ttl: Duration,
}

impl LeaseSessionConfig {
    pub fn new(
        fleet_id: impl Into<String>,
        instance_id: impl Into<String>,
        update_domain: impl Into<String>,
    ) -> Self {
        Self {
            fleet_id: fleet_id.into(),
            instance_id: instance_id.into(),
            update_domain: update_domain.into(),
            lease_ttl: Duration::from_secs(60),
            enlistment_ttl: Duration::from_secs(600),
        }
    }

    /// Set the per-call lease TTL.
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Set the enlistment staleness TTL.
    pub fn with_enlistment_ttl(mut self, ttl: Duration) -> Self {
        self.enlistment_ttl = ttl;
        self
    }
}

/// Update session over a leased blob's metadata.
pub struct LeaseUpdateSession<S> {
    store: S,
    config: LeaseSessionConfig,
}

impl<S: LeaseBlobStore> LeaseUpdateSession<S> {
    pub fn new(store: S, config: LeaseSessionConfig) -> Self {
        Self { store, config }
    }

    fn blob_key(&self, app_id: &str) -> String {
        format!("{}/{}", self.config.fleet_id, app_id)
    }

    /// Run the admission rule under the held lease.
    async fn admit(&self, key: &str, lease_id: &str) -> SessionResult<bool> {
        let meta = self.store.read_metadata(key).await?;
        let domain = meta.fields.get(UPDATE_DOMAIN_FIELD).cloned();

        // The blob has no per-instance timestamps; an object untouched for
        // longer than the TTL is treated as having no live enlistments.
        let age = epoch_millis().saturating_sub(meta.last_modified);
        let abandoned = age > self.config.enlistment_ttl.as_millis() as u64;
        let mut instances: BTreeSet<String> = if abandoned {
            BTreeSet::new()
        } else {
            parse_instances(meta.fields.get(INSTANCES_FIELD))
        };

        let ours = &self.config.update_domain;
        if let Some(active) = &domain {
            if active != ours && !instances.is_empty() {
                debug!(
                    %key,
                    active_domain = %active,
                    our_domain = %ours,
                    enlisted = instances.len(),
                    "refused: another update domain is rolling"
                );
                return Ok(false);
            }
        }

        instances.insert(self.config.instance_id.clone());
        let mut fields = meta.fields.clone();
        fields.insert(UPDATE_DOMAIN_FIELD.to_string(), ours.clone());
        fields.insert(INSTANCES_FIELD.to_string(), join_instances(&instances));
        self.store.write_metadata(key, lease_id, fields).await?;

        info!(
            %key,
            domain = %ours,
            instance = %self.config.instance_id,
            takeover = domain.as_ref().is_some_and(|d| d != ours),
            "admitted to update session"
        );
        Ok(true)
    }

    /// Remove our enlistment under the held lease.
    async fn deregister(&self, key: &str, lease_id: &str) -> SessionResult<()> {
        let meta = self.store.read_metadata(key).await?;
        let mut instances = parse_instances(meta.fields.get(INSTANCES_FIELD));
        if !instances.remove(&self.config.instance_id) {
            // Never admitted (or already deregistered); nothing to do.
            return Ok(());
        }

        let mut fields = meta.fields.clone();
        if instances.is_empty() {
            // Leave the domain field in place: an empty enlisted set is
            // exactly the state a takeover looks for.
            fields.remove(INSTANCES_FIELD);
        } else {
            fields.insert(INSTANCES_FIELD.to_string(), join_instances(&instances));
        }
        self.store.write_metadata(key, lease_id, fields).await?;

        info!(%key, instance = %self.config.instance_id, "update session ended");
        Ok(())
    }

    /// Release the lease, logging instead of propagating failure — the
    /// blob's own lease timeout is the recovery path, and the admission
    /// result must not be masked by cleanup.
    async fn release(&self, key: &str, lease_id: &str) {
        if let Err(e) = self.store.release_lease(key, lease_id).await {
            warn!(%key, error = %e, "failed to release coordination lease");
        }
    }
}

#[async_trait]
impl<S: LeaseBlobStore> UpdateSession for LeaseUpdateSession<S> {
    async fn try_start(&self, app_id: &str) -> SessionResult<bool> {
        let key = self.blob_key(app_id);
        let lease_id = self.store.acquire_lease(&key, self.config.lease_ttl).await?;
        // Release on every exit path, including admission errors.
        let result = self.admit(&key, &lease_id).await;
        self.release(&key, &lease_id).await;
        result
    }

    async fn end(&self, app_id: &str) -> SessionResult<()> {
        let key = self.blob_key(app_id);
        let lease_id = self.store.acquire_lease(&key, self.config.lease_ttl).await?;
        let result = self.deregister(&key, &lease_id).await;
        self.release(&key, &lease_id).await;
        result
    }
}

fn parse_instances(field: Option<&String>) -> BTreeSet<String> {
    field
        .map(|joined| {
            joined
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn join_instances(instances: &BTreeSet<String>) -> String {
    instances.iter().cloned().collect::<Vec<_>>().join(",")
}
