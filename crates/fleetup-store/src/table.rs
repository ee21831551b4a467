//! Coordination table — one partition per (fleet, application), mutated
//! via atomic multi-row conditional batches.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::epoch_millis;

/// One row as read back from the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub row_key: String,
    /// The update domain recorded on this row (empty for marker rows).
    pub update_domain: String,
    /// Store-assigned version, bumped on every write. Conditions
    /// optimistic-concurrency replaces.
    pub version: u64,
    /// Store-assigned unix-millis of the last write. Feeds staleness
    /// filtering.
    pub timestamp: u64,
}

/// One operation inside an atomic batch. The store assigns version and
/// timestamp on apply.
#[derive(Debug, Clone)]
pub enum BatchOp {
    /// Insert a new row; the batch fails with `Conflict` if the key exists.
    Insert {
        row_key: String,
        update_domain: String,
    },
    /// Insert or replace unconditionally.
    InsertOrReplace {
        row_key: String,
        update_domain: String,
    },
    /// Replace an existing row only if its version is still `if_version`;
    /// the batch fails with `PreconditionFailed` otherwise.
    Replace {
        row_key: String,
        update_domain: String,
        if_version: u64,
    },
}

/// A transactional table scoped by partition.
///
/// Batches are all-or-nothing: any failing precondition aborts the whole
/// batch with no partial writes. Partitions are created lazily on first
/// write.
#[async_trait]
pub trait CoordinationTable: Send + Sync {
    /// Read every row of a partition in one consistent snapshot.
    async fn query_partition(&self, partition: &str) -> StoreResult<Vec<TableRow>>;

    /// Atomically apply a batch of operations within one partition.
    async fn submit_batch(&self, partition: &str, ops: Vec<BatchOp>) -> StoreResult<()>;

    /// Delete one row. Fails with `NotFound` if absent.
    async fn delete_row(&self, partition: &str, row_key: &str) -> StoreResult<()>;
}

#[async_trait]
impl<S: CoordinationTable + ?Sized> CoordinationTable for std::sync::Arc<S> {
    async fn query_partition(&self, partition: &str) -> StoreResult<Vec<TableRow>> {
        (**self).query_partition(partition).await
    }

    async fn submit_batch(&self, partition: &str, ops: Vec<BatchOp>) -> StoreResult<()> {
        (**self).submit_batch(partition, ops).await
    }

    async fn delete_row(&self, partition: &str, row_key: &str) -> StoreResult<()> {
        (**self).delete_row(partition, row_key).await
    }
}

// ── In-memory implementation ───────────────────────────────────────

#[derive(Clone)]
struct StoredRow {
    update_domain: String,
    version: u64,
    timestamp: u64,
}

struct Tables {
    partitions: HashMap<String, HashMap<String, StoredRow>>,
    next_version: u64,
}

/// In-memory `CoordinationTable` (for testing and single-process
/// deployments).
///
/// Batches validate every precondition against the current state before
/// applying anything, under one lock, which gives the same atomicity as
/// the remote table's entity-group transactions.
pub struct MemoryTable {
    inner: Mutex<Tables>,
}

impl Default for MemoryTable {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Tables {
                partitions: HashMap::new(),
                next_version: 1,
            }),
        }
    }
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationTable for MemoryTable {
    async fn query_partition(&self, partition: &str) -> StoreResult<Vec<TableRow>> {
        let inner = self.inner.lock().await;
        let rows = inner
            .partitions
            .get(partition)
            .map(|rows| {
                rows.iter()
                    .map(|(key, row)| TableRow {
                        row_key: key.clone(),
                        update_domain: row.update_domain.clone(),
                        version: row.version,
                        timestamp: row.timestamp,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    async fn submit_batch(&self, partition: &str, ops: Vec<BatchOp>) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let rows = inner.partitions.entry(partition.to_string()).or_default();

        // Validate every op before applying any.
        for op in &ops {
            match op {
                BatchOp::Insert { row_key, .. } => {
                    if rows.contains_key(row_key) {
                        return Err(StoreError::Conflict(format!(
                            "{partition}/{row_key} already exists"
                        )));
                    }
                }
                BatchOp::InsertOrReplace { .. } => {}
                BatchOp::Replace {
                    row_key,
                    if_version,
                    ..
                } => match rows.get(row_key) {
                    Some(row) if row.version == *if_version => {}
                    Some(row) => {
                        return Err(StoreError::PreconditionFailed(format!(
                            "{partition}/{row_key}: version {} != expected {if_version}",
                            row.version
                        )));
                    }
                    None => {
                        return Err(StoreError::PreconditionFailed(format!(
                            "{partition}/{row_key}: row missing"
                        )));
                    }
                },
            }
        }

        let now = epoch_millis();
        let count = ops.len();
        let base_version = inner.next_version;
        inner.next_version += count as u64;
        let rows = inner.partitions.entry(partition.to_string()).or_default();
        for (i, op) in ops.into_iter().enumerate() {
            let version = base_version + i as u64;
            let (key, domain) = match op {
                BatchOp::Insert {
                    row_key,
                    update_domain,
                }
                | BatchOp::InsertOrReplace {
                    row_key,
                    update_domain,
                }
                | BatchOp::Replace {
                    row_key,
                    update_domain,
                    ..
                } => (row_key, update_domain),
            };
            rows.insert(
                key,
                StoredRow {
                    update_domain: domain,
                    version,
                    timestamp: now,
                },
            );
        }
        debug!(%partition, ops = count, "batch applied");
        Ok(())
    }

    async fn delete_row(&self, partition: &str, row_key: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let removed = inner
            .partitions
            .get_mut(partition)
            .and_then(|rows| rows.remove(row_key));
        if removed.is_none() {
            return Err(StoreError::NotFound(format!("{partition}/{row_key}")));
        }
        debug!(%partition, %row_key, "row deleted");
        Ok(())
    }
}
