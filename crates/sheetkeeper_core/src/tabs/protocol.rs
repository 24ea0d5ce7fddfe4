//! Cross-tab wire protocol.
//!
//! Every open tab of the same document type posts JSON messages on a shared
//! [`TabBus`](super::TabBus). A message always carries the sender's `tabId`
//! so receivers can drop their own echoes.
//!
//! ```json
//! {"tabId": "6f1c…", "type": "version-saved", "hash": "9a0b…", "timestamp": 1718000000000, "label": "Changed name"}
//! ```
//!
//! There is no authentication: the trust boundary is whoever can reach the bus.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::Result;

/// How the user settled a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "kebab-case")]
pub enum ConflictChoice {
    /// Drop local pending edits and reload the other tab's version
    LoadRemote,
    /// Keep local edits and overwrite the other tab's version
    SaveLocal,
}

impl ConflictChoice {
    /// Wire name of the choice
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictChoice::LoadRemote => "load-remote",
            ConflictChoice::SaveLocal => "save-local",
        }
    }
}

impl fmt::Display for ConflictChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictChoice {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "remote" | "load-remote" | "load_remote" => Ok(ConflictChoice::LoadRemote),
            "local" | "save-local" | "save_local" => Ok(ConflictChoice::SaveLocal),
            _ => Err(()),
        }
    }
}

/// Message payloads, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TabMessageKind {
    /// A tab opened the document
    TabOpened,

    /// A tab is going away
    TabClosed,

    /// A tab committed a new version
    VersionSaved {
        hash: String,
        timestamp: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        #[ts(optional)]
        label: Option<String>,
    },

    /// A tab is about to commit and asks everyone for their latest version
    RequestLatest,

    /// Answer to `request-latest` (and to `tab-opened`)
    RespondLatest { hash: String, timestamp: i64 },

    /// A tab settled a conflict
    ConflictResolved {
        resolution: ConflictChoice,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        #[ts(optional)]
        hash: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        #[ts(optional)]
        timestamp: Option<i64>,
    },
}

impl TabMessageKind {
    /// Wire name of the message type
    pub fn type_name(&self) -> &'static str {
        match self {
            TabMessageKind::TabOpened => "tab-opened",
            TabMessageKind::TabClosed => "tab-closed",
            TabMessageKind::VersionSaved { .. } => "version-saved",
            TabMessageKind::RequestLatest => "request-latest",
            TabMessageKind::RespondLatest { .. } => "respond-latest",
            TabMessageKind::ConflictResolved { .. } => "conflict-resolved",
        }
    }
}

/// A message on the tab bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabMessage {
    /// Sender tab
    #[serde(rename = "tabId")]
    pub tab_id: String,

    /// Payload
    #[serde(flatten)]
    pub kind: TabMessageKind,
}

impl TabMessage {
    /// Create a message from `tab_id`
    pub fn new(tab_id: impl Into<String>, kind: TabMessageKind) -> Self {
        Self {
            tab_id: tab_id.into(),
            kind,
        }
    }

    /// Encode as a JSON frame
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON frame
    pub fn decode(frame: &str) -> Result<Self> {
        Ok(serde_json::from_str(frame)?)
    }
}
