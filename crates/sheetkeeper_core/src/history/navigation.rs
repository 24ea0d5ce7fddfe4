//! Browsing through stored versions.
//!
//! The [`VersionNavigator`] keeps a cached copy of the log and a cursor into
//! it. At the newest version the displayed document is the live head (which
//! may include buffered edits); at an older version it is that version's
//! snapshot, with the excluded binary fields borrowed from the head.

use std::sync::Arc;

use serde_json::Value;

use super::types::{VersionMetadata, VersionRecord, with_binary_fields};
use super::version_store::VersionStore;
use crate::error::{HistoryError, Result};

/// Position of the navigation cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// The live document, used while the log is empty
    Latest,
    /// A version by index (0 = oldest)
    At(usize),
}

/// Cursor over the version log of one document.
pub struct VersionNavigator {
    store: Arc<VersionStore>,
    versions: Vec<VersionRecord>,
    cursor: Cursor,
    latest: Option<Value>,
}

impl VersionNavigator {
    /// Create a navigator. Call [`init`](Self::init) before use.
    pub fn new(store: Arc<VersionStore>) -> Self {
        Self {
            store,
            versions: Vec::new(),
            cursor: Cursor::Latest,
            latest: None,
        }
    }

    /// Load the log and put the cursor on the newest version.
    pub fn init(&mut self) -> Result<()> {
        self.versions = self.store.get_all_versions()?;
        self.restore_to_latest();
        log::debug!("Navigator loaded {} version(s)", self.versions.len());
        Ok(())
    }

    /// Re-read the log after a commit or an eviction.
    ///
    /// A cursor at the newest version moves to the new newest version. A
    /// cursor on an older version stays on the same record, or falls back to
    /// the oldest record if that one was evicted.
    pub fn reload(&mut self) -> Result<()> {
        let followed = if self.is_viewing_old_version() {
            self.current_record().map(|r| r.id.clone())
        } else {
            None
        };

        self.versions = self.store.get_all_versions()?;

        match followed {
            None => self.restore_to_latest(),
            Some(id) if self.versions.is_empty() => {
                log::debug!("Version {} is gone and the log is empty", id);
                self.cursor = Cursor::Latest;
            }
            Some(id) => {
                let index = self.versions.iter().position(|r| r.id == id);
                if index.is_none() {
                    log::debug!("Version {} was evicted, moving to the oldest", id);
                }
                self.cursor = Cursor::At(index.unwrap_or(0));
            }
        }
        Ok(())
    }

    fn index(&self) -> Option<usize> {
        match self.cursor {
            Cursor::Latest => self.versions.len().checked_sub(1),
            Cursor::At(index) => Some(index),
        }
    }

    fn current_record(&self) -> Option<&VersionRecord> {
        self.index().and_then(|i| self.versions.get(i))
    }

    /// Step to the previous version. Returns `false` at the oldest one.
    pub fn navigate_backward(&mut self) -> bool {
        match self.index() {
            Some(index) if index > 0 => {
                self.cursor = Cursor::At(index - 1);
                true
            }
            _ => false,
        }
    }

    /// Step to the next version. Returns `false` at the newest one.
    pub fn navigate_forward(&mut self) -> bool {
        match self.index() {
            Some(index) if index + 1 < self.versions.len() => {
                self.cursor = Cursor::At(index + 1);
                true
            }
            _ => false,
        }
    }

    /// Jump to a version by index.
    pub fn navigate_to_version(&mut self, index: usize) -> Result<()> {
        if index >= self.versions.len() {
            return Err(HistoryError::InvalidVersionIndex {
                index,
                len: self.versions.len(),
            });
        }
        self.cursor = Cursor::At(index);
        Ok(())
    }

    /// Move the cursor to the newest version.
    pub fn restore_to_latest(&mut self) {
        self.cursor = match self.versions.len().checked_sub(1) {
            Some(last) => Cursor::At(last),
            None => Cursor::Latest,
        };
    }

    /// Replace the live document.
    pub fn set_latest_character(&mut self, character: Value) {
        self.latest = Some(character);
    }

    /// Forget the live document.
    pub fn clear_latest_character(&mut self) {
        self.latest = None;
    }

    /// The live document, if one was set
    pub fn latest_character(&self) -> Option<&Value> {
        self.latest.as_ref()
    }

    /// The document the UI should show for the current cursor.
    pub fn displayed_character(&self) -> Option<Value> {
        if !self.is_viewing_old_version() {
            return self
                .latest
                .clone()
                .or_else(|| self.current_record().map(|r| r.snapshot.clone()));
        }
        self.current_record().map(|record| {
            with_binary_fields(
                &record.snapshot,
                self.latest.as_ref(),
                self.store.excluded_fields(),
            )
        })
    }

    /// The historical document to restore, or `None` at the newest version.
    pub fn restorable_snapshot(&self) -> Option<Value> {
        if self.is_viewing_old_version() {
            self.displayed_character()
        } else {
            None
        }
    }

    /// Whether the cursor is on a version older than the newest one.
    pub fn is_viewing_old_version(&self) -> bool {
        match self.cursor {
            Cursor::Latest => false,
            Cursor::At(index) => index + 1 < self.versions.len(),
        }
    }

    /// Metadata of the version under the cursor.
    pub fn current_version_metadata(&self) -> Option<VersionMetadata> {
        let index = self.index()?;
        self.versions
            .get(index)
            .map(|record| record.metadata(index, self.versions.len()))
    }

    /// Cached versions, oldest first
    pub fn versions(&self) -> &[VersionRecord] {
        &self.versions
    }

    /// Current cursor
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Index under the cursor, if the log is not empty
    pub fn current_index(&self) -> Option<usize> {
        self.index()
    }
}

impl std::fmt::Debug for VersionNavigator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionNavigator")
            .field("versions", &self.versions.len())
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}
