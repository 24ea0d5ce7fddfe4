//! Core types for the version history.
//!
//! This module defines the persisted [`VersionRecord`], the in-memory
//! [`PendingChange`] buffered by the squash scheduler, and the snapshot
//! helpers shared by the store and the navigator (binary field stripping
//! and content fingerprints).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use ts_rs::TS;

use crate::change::ChangeDescription;

/// One entry of the version log.
///
/// Records are immutable once written except for the squash metadata, which
/// the scheduler patches right after the append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    /// Unique record ID (UUID v4)
    pub id: String,

    /// Document state with binary fields removed
    pub snapshot: Value,

    /// Creation time in Unix milliseconds. Strictly increasing across the log.
    pub timestamp: i64,

    /// Human-readable summary of what changed
    pub description: String,

    /// Hex SHA-256 of the canonical snapshot JSON
    pub content_hash: String,

    /// Whether this version was produced by squashing buffered edits
    #[serde(default)]
    pub is_squashed: bool,

    /// Number of buffered edits folded into this version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub squashed_count: Option<usize>,
}

impl VersionRecord {
    /// Metadata view of this record at a position in the log.
    pub fn metadata(&self, index: usize, total: usize) -> VersionMetadata {
        VersionMetadata {
            id: self.id.clone(),
            index,
            total,
            description: self.description.clone(),
            timestamp: self.timestamp,
            is_squashed: self.is_squashed,
            squashed_count: self.squashed_count,
        }
    }
}

/// What the UI shows about the version under the cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "camelCase")]
pub struct VersionMetadata {
    /// Record ID
    pub id: String,
    /// Position in the log (0 = oldest)
    pub index: usize,
    /// Number of versions in the log
    pub total: usize,
    /// Version description
    pub description: String,
    /// Creation time in Unix milliseconds
    pub timestamp: i64,
    /// Whether the version was squashed
    pub is_squashed: bool,
    /// How many edits were squashed into it
    #[ts(optional)]
    pub squashed_count: Option<usize>,
}

/// An edit waiting in the squash buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    /// Full document state after the edit
    pub snapshot: Value,
    /// What the edit changed
    pub description: ChangeDescription,
}

impl PendingChange {
    /// Create a pending change
    pub fn new(snapshot: Value, description: ChangeDescription) -> Self {
        Self {
            snapshot,
            description,
        }
    }
}

/// Return a copy of `snapshot` without the excluded top-level fields.
///
/// Non-object snapshots are returned unchanged.
pub fn strip_binary_fields(snapshot: &Value, excluded: &[String]) -> Value {
    let mut stripped = snapshot.clone();
    if let Value::Object(map) = &mut stripped {
        for field in excluded {
            map.remove(field);
        }
    }
    stripped
}

/// Re-attach the excluded fields of `head` onto a historical snapshot.
///
/// Historical versions never store binary fields, so a view of an old
/// version borrows them from the current head.
pub fn with_binary_fields(snapshot: &Value, head: Option<&Value>, excluded: &[String]) -> Value {
    let mut merged = snapshot.clone();
    if let (Value::Object(target), Some(Value::Object(source))) = (&mut merged, head) {
        for field in excluded {
            if let Some(value) = source.get(field) {
                target.insert(field.clone(), value.clone());
            }
        }
    }
    merged
}

/// Fingerprint of a document state for optimistic concurrency.
///
/// Binary fields are stripped first. `serde_json` keeps object keys sorted,
/// so equal documents always serialize (and hash) identically.
pub fn content_hash(snapshot: &Value, excluded: &[String]) -> String {
    let stripped = strip_binary_fields(snapshot, excluded);
    let bytes = serde_json::to_vec(&stripped).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    format!("{:x}", digest)
}
