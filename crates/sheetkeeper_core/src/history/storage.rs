//! Storage abstraction for the version log.
//!
//! This module defines the [`VersionStorage`] trait which abstracts over
//! different storage backends (SQLite, in-memory) for persisting
//! [`VersionRecord`]s of one document.

use super::types::VersionRecord;
use crate::error::HistoryError;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, HistoryError>;

/// Trait for version log storage backends.
///
/// Implementations only persist and query records. Ordering guarantees,
/// timestamp assignment and the eviction policy live in
/// [`VersionStore`](super::VersionStore), which drives the backend.
///
/// # Storage Model
///
/// One collection keyed by record ID, with a secondary ordering on
/// `timestamp`. Listing is always oldest first.
pub trait VersionStorage: Send + Sync {
    /// Open or create the backing collection.
    ///
    /// Must be idempotent: opening an already open backend is a no-op.
    fn open(&self) -> StorageResult<()>;

    /// Release backend resources. Reopening later is allowed.
    fn close(&self) -> StorageResult<()>;

    /// Append a record.
    fn insert(&self, record: &VersionRecord) -> StorageResult<()>;

    /// Look up a record by ID.
    fn get(&self, id: &str) -> StorageResult<Option<VersionRecord>>;

    /// All records ordered by timestamp, oldest first.
    fn list(&self) -> StorageResult<Vec<VersionRecord>>;

    /// Number of stored records.
    fn count(&self) -> StorageResult<usize>;

    /// The record with the smallest timestamp.
    fn oldest(&self) -> StorageResult<Option<VersionRecord>>;

    /// The record with the largest timestamp.
    fn newest(&self) -> StorageResult<Option<VersionRecord>>;

    /// Delete a record. Deleting a missing record is not an error.
    fn delete(&self, id: &str) -> StorageResult<()>;

    /// Patch the squash metadata of a record.
    ///
    /// Returns `false` if no record has that ID.
    fn mark_squashed(&self, id: &str, squashed_count: usize) -> StorageResult<bool>;

    /// Remove every record.
    fn clear(&self) -> StorageResult<()>;
}
