//! SQLite-backed storage implementation for the version log.
//!
//! This module provides a persistent storage backend using SQLite, so the
//! browsable history survives restarts.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, Row, params};

use super::storage::{StorageResult, VersionStorage};
use super::types::VersionRecord;
use crate::error::HistoryError;

const SELECT_COLUMNS: &str =
    "SELECT id, snapshot, timestamp, description, content_hash, is_squashed, squashed_count FROM versions";

/// SQLite-backed version storage.
///
/// The connection is opened by [`VersionStorage::open`] and dropped by
/// [`VersionStorage::close`].
///
/// # Thread Safety
///
/// The connection is wrapped in a `Mutex` for thread-safe access.
/// SQLite itself is used in serialized threading mode.
pub struct SqliteStorage {
    /// Database file, or `None` for an in-memory database
    path: Option<PathBuf>,
    conn: Mutex<Option<Connection>>,
}

impl SqliteStorage {
    /// Storage backed by the database file at `path`.
    ///
    /// Nothing is touched on disk until `open()`.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            conn: Mutex::new(None),
        }
    }

    /// Create an in-memory SQLite database for testing.
    ///
    /// Data is lost when the storage is closed or dropped.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            conn: Mutex::new(None),
        }
    }

    /// Initialize the database schema.
    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            -- One row per version of the document
            CREATE TABLE IF NOT EXISTS versions (
                id TEXT PRIMARY KEY,
                snapshot TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                description TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                is_squashed INTEGER NOT NULL DEFAULT 0,
                squashed_count INTEGER
            );

            -- Ordering index for listing and eviction
            CREATE INDEX IF NOT EXISTS idx_versions_timestamp ON versions(timestamp);
            "#,
        )
    }

    /// Run `f` against the open connection.
    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> StorageResult<T> {
        let guard = self.conn.lock().unwrap();
        let conn = guard
            .as_ref()
            .ok_or_else(|| HistoryError::StorageUnavailable("database is not open".into()))?;
        Ok(f(conn)?)
    }

    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<VersionRecord> {
        let snapshot_json: String = row.get(1)?;
        let snapshot = serde_json::from_str(&snapshot_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let squashed_count: Option<i64> = row.get(6)?;

        Ok(VersionRecord {
            id: row.get(0)?,
            snapshot,
            timestamp: row.get(2)?,
            description: row.get(3)?,
            content_hash: row.get(4)?,
            is_squashed: row.get::<_, i64>(5)? != 0,
            squashed_count: squashed_count.map(|c| c as usize),
        })
    }

    fn query_one(&self, sql: &str, id: Option<&str>) -> StorageResult<Option<VersionRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            match id {
                Some(id) => stmt
                    .query_row(params![id], Self::row_to_record)
                    .optional(),
                None => stmt.query_row([], Self::row_to_record).optional(),
            }
        })
    }
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl VersionStorage for SqliteStorage {
    fn open(&self) -> StorageResult<()> {
        let mut guard = self.conn.lock().unwrap();
        if guard.is_some() {
            return Ok(());
        }

        let conn = match &self.path {
            Some(path) => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| HistoryError::StorageUnavailable(e.to_string()))?;
                }
                Connection::open(path)
            }
            None => Connection::open_in_memory(),
        }
        .map_err(|e| HistoryError::StorageUnavailable(e.to_string()))?;

        Self::init_schema(&conn).map_err(|e| HistoryError::StorageUnavailable(e.to_string()))?;
        *guard = Some(conn);
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        let mut guard = self.conn.lock().unwrap();
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| HistoryError::from(e))?;
        }
        Ok(())
    }

    fn insert(&self, record: &VersionRecord) -> StorageResult<()> {
        let snapshot = serde_json::to_string(&record.snapshot)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO versions (id, snapshot, timestamp, description, content_hash, is_squashed, squashed_count)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    record.id,
                    snapshot,
                    record.timestamp,
                    record.description,
                    record.content_hash,
                    record.is_squashed as i64,
                    record.squashed_count.map(|c| c as i64),
                ],
            )?;
            Ok(())
        })
    }

    fn get(&self, id: &str) -> StorageResult<Option<VersionRecord>> {
        self.query_one(&format!("{} WHERE id = ?", SELECT_COLUMNS), Some(id))
    }

    fn list(&self) -> StorageResult<Vec<VersionRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{} ORDER BY timestamp ASC", SELECT_COLUMNS))?;
            let records = stmt
                .query_map([], Self::row_to_record)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
    }

    fn count(&self) -> StorageResult<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM versions", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    fn oldest(&self) -> StorageResult<Option<VersionRecord>> {
        self.query_one(
            &format!("{} ORDER BY timestamp ASC LIMIT 1", SELECT_COLUMNS),
            None,
        )
    }

    fn newest(&self) -> StorageResult<Option<VersionRecord>> {
        self.query_one(
            &format!("{} ORDER BY timestamp DESC LIMIT 1", SELECT_COLUMNS),
            None,
        )
    }

    fn delete(&self, id: &str) -> StorageResult<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM versions WHERE id = ?", params![id])?;
            Ok(())
        })
    }

    fn mark_squashed(&self, id: &str, squashed_count: usize) -> StorageResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE versions SET is_squashed = 1, squashed_count = ? WHERE id = ?",
                params![squashed_count as i64, id],
            )?;
            Ok(changed > 0)
        })
    }

    fn clear(&self) -> StorageResult<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM versions", [])?;
            Ok(())
        })
    }
}
