//! Bounded version log for one document.
//!
//! [`VersionStore`] sits on top of a [`VersionStorage`] backend and owns the
//! log's invariants:
//! - record timestamps are strictly increasing, even when the clock is coarse
//!   or goes backwards
//! - at most `max_versions` records are kept, the oldest evicted first
//! - excluded binary fields never reach the backend
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sheetkeeper_core::history::{MemoryStorage, VersionStore};
//!
//! let store = VersionStore::new(Arc::new(MemoryStorage::new()), &config);
//! store.init()?;
//! let record = store.save_version(&json!({"name": "Kira"}), "Changed name")?;
//! assert_eq!(store.get_version_by_id(&record.id)?.unwrap().snapshot["name"], "Kira");
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use super::storage::{StorageResult, VersionStorage};
use super::types::{VersionRecord, content_hash, strip_binary_fields};
use crate::clock::{Clock, SystemClock};
use crate::config::HistoryConfig;
use crate::error::HistoryError;

/// Durable, bounded, append/evict log of versions.
pub struct VersionStore {
    storage: Arc<dyn VersionStorage>,
    clock: Arc<dyn Clock>,
    max_versions: usize,
    excluded_fields: Vec<String>,
    initialized: AtomicBool,
    /// Serializes append + eviction
    write_lock: Mutex<()>,
}

impl VersionStore {
    /// Create a store over `storage` using the system clock.
    pub fn new(storage: Arc<dyn VersionStorage>, config: &HistoryConfig) -> Self {
        Self::with_clock(storage, config, Arc::new(SystemClock))
    }

    /// Create a store with an explicit clock.
    pub fn with_clock(
        storage: Arc<dyn VersionStorage>,
        config: &HistoryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            clock,
            max_versions: config.max_versions.max(1),
            excluded_fields: config.excluded_fields.clone(),
            initialized: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        }
    }

    /// Open the backing log. Safe to call more than once.
    pub fn init(&self) -> StorageResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.storage.open().map_err(|e| match e {
            HistoryError::StorageUnavailable(_) => e,
            other => HistoryError::StorageUnavailable(other.to_string()),
        })?;
        self.initialized.store(true, Ordering::SeqCst);
        log::debug!("Version store opened (cap {})", self.max_versions);
        Ok(())
    }

    /// Whether `init()` has succeeded and `close()` hasn't been called since.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn ensure_initialized(&self) -> StorageResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(HistoryError::StoreNotInitialized)
        }
    }

    /// Maximum number of records kept.
    pub fn max_versions(&self) -> usize {
        self.max_versions
    }

    /// Fields stripped from every snapshot.
    pub fn excluded_fields(&self) -> &[String] {
        &self.excluded_fields
    }

    /// Fingerprint of a document state, as it would be stored.
    pub fn fingerprint(&self, snapshot: &Value) -> String {
        content_hash(snapshot, &self.excluded_fields)
    }

    /// Append a new version of the document.
    ///
    /// The snapshot is copied (later mutation by the caller does not affect
    /// the stored record) and stripped of binary fields. After the append the
    /// oldest records are evicted one at a time while the log is over its cap.
    /// An eviction failure is logged and not returned: the append already
    /// succeeded, and the next save retries the eviction.
    pub fn save_version(&self, snapshot: &Value, description: &str) -> StorageResult<VersionRecord> {
        self.ensure_initialized()?;
        let _guard = self.write_lock.lock().unwrap();

        let stored_snapshot = strip_binary_fields(snapshot, &self.excluded_fields);
        let hash = content_hash(&stored_snapshot, &[]);

        let now = self.clock.now_millis();
        let timestamp = match self.storage.newest()? {
            Some(last) => now.max(last.timestamp + 1),
            None => now,
        };

        let record = VersionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            snapshot: stored_snapshot,
            timestamp,
            description: description.to_string(),
            content_hash: hash,
            is_squashed: false,
            squashed_count: None,
        };
        self.storage.insert(&record)?;
        log::debug!(
            "Saved version {} at {} ({})",
            record.id,
            record.timestamp,
            record.description
        );

        if let Err(e) = self.evict_overflow() {
            log::warn!(
                "Eviction after saving version {} failed, log may exceed cap of {} until the next save: {}",
                record.id,
                self.max_versions,
                e
            );
        }

        Ok(record)
    }

    /// Delete oldest records while the log holds more than `max_versions`.
    fn evict_overflow(&self) -> StorageResult<()> {
        while self.storage.count()? > self.max_versions {
            let Some(oldest) = self.storage.oldest()? else {
                break;
            };
            self.storage.delete(&oldest.id)?;
            log::debug!("Evicted version {} ({})", oldest.id, oldest.timestamp);
        }
        Ok(())
    }

    /// Patch a stored record as the result of a squash.
    pub fn mark_squashed(&self, id: &str, squashed_count: usize) -> StorageResult<bool> {
        self.ensure_initialized()?;
        let _guard = self.write_lock.lock().unwrap();
        self.storage.mark_squashed(id, squashed_count)
    }

    /// All versions, oldest first.
    pub fn get_all_versions(&self) -> StorageResult<Vec<VersionRecord>> {
        self.ensure_initialized()?;
        self.storage.list()
    }

    /// A single version by ID.
    pub fn get_version_by_id(&self, id: &str) -> StorageResult<Option<VersionRecord>> {
        self.ensure_initialized()?;
        self.storage.get(id)
    }

    /// The newest version, if any.
    pub fn latest_version(&self) -> StorageResult<Option<VersionRecord>> {
        self.ensure_initialized()?;
        self.storage.newest()
    }

    /// Number of stored versions.
    pub fn len(&self) -> StorageResult<usize> {
        self.ensure_initialized()?;
        self.storage.count()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove every version. Clearing an empty log is fine.
    pub fn clear(&self) -> StorageResult<()> {
        self.ensure_initialized()?;
        let _guard = self.write_lock.lock().unwrap();
        self.storage.clear()?;
        log::info!("Cleared version history");
        Ok(())
    }

    /// Release the backend. Further calls fail until `init()` runs again.
    pub fn close(&self) -> StorageResult<()> {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.storage.close()
    }
}

impl std::fmt::Debug for VersionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionStore")
            .field("max_versions", &self.max_versions)
            .field("excluded_fields", &self.excluded_fields)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}
