//! Lease blob store — one remote object per application, guarded by an
//! exclusive lease, carrying string metadata fields.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::epoch_millis;

/// Metadata snapshot of one blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobMetadata {
    /// Named string fields. An absent field means "unset".
    pub fields: BTreeMap<String, String>,
    /// Unix-millis of the last metadata write (object creation counts).
    pub last_modified: u64,
}

/// A blob store with exclusive leases and per-object string metadata.
///
/// Objects are created lazily on first `acquire_lease`. Metadata writes are
/// conditioned on the held lease: the server rejects a write whose lease
/// was lost or expired.
#[async_trait]
pub trait LeaseBlobStore: Send + Sync {
    /// Acquire an exclusive lease on the object, creating it if absent.
    ///
    /// Returns the lease id to condition writes on. Fails with
    /// `LeaseUnavailable` while another holder's lease is live.
    async fn acquire_lease(&self, key: &str, ttl: Duration) -> StoreResult<String>;

    /// Release a held lease. Fails with `LeaseLost` if the lease is no
    /// longer honored.
    async fn release_lease(&self, key: &str, lease_id: &str) -> StoreResult<()>;

    /// Read the object's metadata.
    async fn read_metadata(&self, key: &str) -> StoreResult<BlobMetadata>;

    /// Replace the object's metadata fields, conditioned on the lease.
    async fn write_metadata(
        &self,
        key: &str,
        lease_id: &str,
        fields: BTreeMap<String, String>,
    ) -> StoreResult<()>;
}

#[async_trait]
impl<S: LeaseBlobStore + ?Sized> LeaseBlobStore for std::sync::Arc<S> {
    async fn acquire_lease(&self, key: &str, ttl: Duration) -> StoreResult<String> {
        (**self).acquire_lease(key, ttl).await
    }

    async fn release_lease(&self, key: &str, lease_id: &str) -> StoreResult<()> {
        (**self).release_lease(key, lease_id).await
    }

    async fn read_metadata(&self, key: &str) -> StoreResult<BlobMetadata> {
        (**self).read_metadata(key).await
    }

    async fn write_metadata(
        &self,
        key: &str,
        lease_id: &str,
        fields: BTreeMap<String, String>,
    ) -> StoreResult<()> {
        (**self).write_metadata(key, lease_id, fields).await
    }
}

// ── In-memory implementation ───────────────────────────────────────

struct BlobEntry {
    fields: BTreeMap<String, String>,
    last_modified: u64,
    /// Active lease: (lease id, expiry in unix-millis).
    lease: Option<(String, u64)>,
}

/// In-memory `LeaseBlobStore` (for testing and single-process deployments).
///
/// Lease expiry follows the wall clock, so an abandoned lease can be
/// re-acquired after its TTL — the same recovery path the remote store
/// provides.
#[derive(Default)]
pub struct MemoryLeaseStore {
    blobs: Mutex<HashMap<String, BlobEntry>>,
    next_lease: AtomicU64,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseBlobStore for MemoryLeaseStore {
    async fn acquire_lease(&self, key: &str, ttl: Duration) -> StoreResult<String> {
        let mut blobs = self.blobs.lock().await;
        let now = epoch_millis();
        let entry = blobs.entry(key.to_string()).or_insert_with(|| BlobEntry {
            fields: BTreeMap::new(),
            last_modified: now,
            lease: None,
        });

        if let Some((holder, expires_at)) = &entry.lease {
            if *expires_at > now {
                return Err(StoreError::LeaseUnavailable(format!(
                    "{key} (held by lease {holder})"
                )));
            }
        }

        let lease_id = format!("lease-{}", self.next_lease.fetch_add(1, Ordering::Relaxed));
        entry.lease = Some((lease_id.clone(), now + ttl.as_millis() as u64));
        debug!(%key, %lease_id, "lease acquired");
        Ok(lease_id)
    }

    async fn release_lease(&self, key: &str, lease_id: &str) -> StoreResult<()> {
        let mut blobs = self.blobs.lock().await;
        let entry = blobs
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        match &entry.lease {
            Some((holder, _)) if holder == lease_id => {
                entry.lease = None;
                debug!(%key, %lease_id, "lease released");
                Ok(())
            }
            _ => Err(StoreError::LeaseLost(key.to_string())),
        }
    }

    async fn read_metadata(&self, key: &str) -> StoreResult<BlobMetadata> {
        let blobs = self.blobs.lock().await;
        let entry = blobs
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Ok(BlobMetadata {
            fields: entry.fields.clone(),
            last_modified: entry.last_modified,
        })
    }

    async fn write_metadata(
        &self,
        key: &str,
        lease_id: &str,
        fields: BTreeMap<String, String>,
    ) -> StoreResult<()> {
        let mut blobs = self.blobs.lock().await;
        let now = epoch_millis();
        let entry = blobs
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        match &entry.lease {
            Some((holder, expires_at)) if holder == lease_id && *expires_at > now => {
                entry.fields = fields;
                entry.last_modified = now;
                Ok(())
            }
            _ => Err(StoreError::LeaseLost(key.to_string())),
        }
    }
}
