//! fleetup remote coordination substrates.
//!
//! Update sessions are coordinated through one of two remote stores: a
//! blob store with exclusive leases and per-object metadata, or a
//! transactional table with atomic multi-row batches. This crate specifies
//! both at their boundary and ships in-memory implementations used by
//! tests and single-process deployments.
//!
//! # Components
//!
//! - **`blob`** — `LeaseBlobStore` contract + `MemoryLeaseStore`
//! - **`table`** — `CoordinationTable` contract + `MemoryTable`
//! - **`error`** — shared `StoreError` taxonomy with fault classification

pub mod blob;
pub mod error;
pub mod table;

pub use blob::{BlobMetadata, LeaseBlobStore, MemoryLeaseStore};
pub use error::{StoreError, StoreResult};
pub use table::{BatchOp, CoordinationTable, MemoryTable, TableRow};

/// Current Unix epoch in milliseconds.
///
/// Millisecond resolution because row timestamps feed TTL-based staleness
/// decisions.
pub(crate) fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
