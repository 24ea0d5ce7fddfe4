//! Cross-tab coordination.
//!
//! Tabs editing the same document type talk over a [`TabBus`] using the
//! messages in [`protocol`]. Each tab's [`ConflictDetector`] turns that
//! traffic into conflict and notice events.

pub mod bus;
pub mod conflict;
pub mod protocol;

pub use bus::{TabBus, TabReceiver};
pub use conflict::{
    ConflictDetector, ConflictEvent, ConflictOutcome, RemoteVersion, SaveClearance, TabSession,
};
pub use protocol::{ConflictChoice, TabMessage, TabMessageKind};
