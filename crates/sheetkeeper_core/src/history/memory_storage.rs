//! In-memory storage implementation.
//!
//! This provides a simple in-memory implementation of [`VersionStorage`]
//! for use in unit tests and for embedders without a persistent backend.

use std::sync::RwLock;

use super::storage::{StorageResult, VersionStorage};
use super::types::VersionRecord;

/// In-memory version storage.
///
/// Records are kept in a `Vec` sorted by timestamp. It's thread-safe via
/// `RwLock` but data is lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: RwLock<Vec<VersionRecord>>,
}

impl MemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }
}

impl VersionStorage for MemoryStorage {
    fn open(&self) -> StorageResult<()> {
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    fn insert(&self, record: &VersionRecord) -> StorageResult<()> {
        let mut records = self.records.write().unwrap();
        let pos = records.partition_point(|r| r.timestamp <= record.timestamp);
        records.insert(pos, record.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> StorageResult<Option<VersionRecord>> {
        let records = self.records.read().unwrap();
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    fn list(&self) -> StorageResult<Vec<VersionRecord>> {
        let records = self.records.read().unwrap();
        Ok(records.clone())
    }

    fn count(&self) -> StorageResult<usize> {
        Ok(self.records.read().unwrap().len())
    }

    fn oldest(&self) -> StorageResult<Option<VersionRecord>> {
        Ok(self.records.read().unwrap().first().cloned())
    }

    fn newest(&self) -> StorageResult<Option<VersionRecord>> {
        Ok(self.records.read().unwrap().last().cloned())
    }

    fn delete(&self, id: &str) -> StorageResult<()> {
        let mut records = self.records.write().unwrap();
        records.retain(|r| r.id != id);
        Ok(())
    }

    fn mark_squashed(&self, id: &str, squashed_count: usize) -> StorageResult<bool> {
        let mut records = self.records.write().unwrap();
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.is_squashed = true;
                record.squashed_count = Some(squashed_count);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn clear(&self) -> StorageResult<()> {
        self.records.write().unwrap().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, timestamp: i64) -> VersionRecord {
        VersionRecord {
            id: id.to_string(),
            snapshot: json!({"id": id}),
            timestamp,
            description: format!("version {}", id),
            content_hash: String::new(),
            is_squashed: false,
            squashed_count: None,
        }
    }

    #[test]
    fn test_insert_keeps_timestamp_order() {
        let storage = MemoryStorage::new();
        storage.insert(&record("b", 20)).unwrap();
        storage.insert(&record("a", 10)).unwrap();
        storage.insert(&record("c", 30)).unwrap();

        let ids: Vec<String> = storage.list().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(storage.oldest().unwrap().unwrap().id, "a");
        assert_eq!(storage.newest().unwrap().unwrap().id, "c");
    }

    #[test]
    fn test_get_and_delete() {
        let storage = MemoryStorage::new();
        storage.insert(&record("a", 1)).unwrap();

        assert!(storage.get("a").unwrap().is_some());
        assert!(storage.get("missing").unwrap().is_none());

        storage.delete("a").unwrap();
        storage.delete("a").unwrap();
        assert_eq!(storage.count().unwrap(), 0);
    }

    #[test]
    fn test_mark_squashed() {
        let storage = MemoryStorage::new();
        storage.insert(&record("a", 1)).unwrap();

        assert!(storage.mark_squashed("a", 4).unwrap());
        assert!(!storage.mark_squashed("missing", 4).unwrap());

        let patched = storage.get("a").unwrap().unwrap();
        assert!(patched.is_squashed);
        assert_eq!(patched.squashed_count, Some(4));
    }

    #[test]
    fn test_clear() {
        let storage = MemoryStorage::new();
        storage.insert(&record("a", 1)).unwrap();
        storage.insert(&record("b", 2)).unwrap();
        storage.clear().unwrap();
        assert!(storage.list().unwrap().is_empty());
    }
}
