//! Events emitted by the history core.
//!
//! This module defines the notifications the core sends to the UI layer.
//! The UI subscribes through an [`EventRegistry`](crate::callback_registry::EventRegistry)
//! and renders; the core never renders anything itself.

use crate::history::{UndoAction, UndoOutcome, VersionRecord};
use crate::tabs::{ConflictChoice, ConflictEvent};

/// Notifications from the history core.
#[derive(Debug, Clone)]
pub enum HistoryEvent {
    /// Another tab saved a different version while this tab has unsaved
    /// edits. The event must be resolved before this tab commits again.
    VersionConflict(ConflictEvent),

    /// Another tab saved a newer version while this tab is clean.
    /// Purely informational, no action is forced.
    NewerVersionAvailable {
        /// Content hash of the remote version
        hash: String,
        /// Timestamp of the remote version
        timestamp: i64,
        /// Description of the remote version
        label: Option<String>,
    },

    /// A conflict was resolved, here or in another tab.
    ConflictResolved {
        /// How it was resolved
        resolution: ConflictChoice,
        /// Hash of the version that won
        hash: Option<String>,
        /// Tab that resolved it
        tab_id: String,
    },

    /// Buffered edits were squashed into a new version.
    SquashCompleted {
        /// The stored version, with squash metadata
        record: VersionRecord,
    },

    /// An undo or redo gesture finished.
    UndoCompleted {
        /// Which gesture
        action: UndoAction,
        /// What it did
        outcome: UndoOutcome,
    },

    /// A timer-driven commit failed. The buffered edits are kept and the
    /// next flush retries them.
    CommitFailed {
        /// Error message
        message: String,
    },
}

impl HistoryEvent {
    /// Which kind of event this is
    pub fn kind(&self) -> EventKind {
        match self {
            HistoryEvent::VersionConflict(_) => EventKind::VersionConflict,
            HistoryEvent::NewerVersionAvailable { .. } => EventKind::NewerVersionAvailable,
            HistoryEvent::ConflictResolved { .. } => EventKind::ConflictResolved,
            HistoryEvent::SquashCompleted { .. } => EventKind::SquashCompleted,
            HistoryEvent::UndoCompleted { .. } => EventKind::UndoCompleted,
            HistoryEvent::CommitFailed { .. } => EventKind::CommitFailed,
        }
    }

    /// Stable event name, matching the names used by the UI layer.
    pub fn name(&self) -> &'static str {
        self.kind().name()
    }
}

/// The kinds of [`HistoryEvent`], for subscribing to one signal only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`HistoryEvent::VersionConflict`]
    VersionConflict,
    /// [`HistoryEvent::NewerVersionAvailable`]
    NewerVersionAvailable,
    /// [`HistoryEvent::ConflictResolved`]
    ConflictResolved,
    /// [`HistoryEvent::SquashCompleted`]
    SquashCompleted,
    /// [`HistoryEvent::UndoCompleted`]
    UndoCompleted,
    /// [`HistoryEvent::CommitFailed`]
    CommitFailed,
}

impl EventKind {
    /// Every kind, in declaration order
    pub const ALL: [EventKind; 6] = [
        EventKind::VersionConflict,
        EventKind::NewerVersionAvailable,
        EventKind::ConflictResolved,
        EventKind::SquashCompleted,
        EventKind::UndoCompleted,
        EventKind::CommitFailed,
    ];

    /// Kebab-case signal name
    pub fn name(self) -> &'static str {
        match self {
            EventKind::VersionConflict => "version-conflict",
            EventKind::NewerVersionAvailable => "newer-version-available",
            EventKind::ConflictResolved => "conflict-resolved",
            EventKind::SquashCompleted => "squash-completed",
            EventKind::UndoCompleted => "undo-completed",
            EventKind::CommitFailed => "commit-failed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for EventKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|kind| kind.name() == s).ok_or(())
    }
}
