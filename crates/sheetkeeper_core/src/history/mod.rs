//! Version history of one document.
//!
//! - [`VersionStore`] is the durable, bounded log over a [`VersionStorage`] backend
//! - [`SquashScheduler`] debounces edits into squashed versions
//! - [`VersionNavigator`] browses the log
//! - [`UndoCoordinator`] routes undo/redo to the buffer or the navigator

pub mod memory_storage;
pub mod navigation;
#[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
pub mod sqlite_storage;
pub mod squash;
pub mod storage;
pub mod types;
pub mod undo;
pub mod version_store;

pub use memory_storage::MemoryStorage;
pub use navigation::{Cursor, VersionNavigator};
#[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
pub use sqlite_storage::SqliteStorage;
pub use squash::{CommitOutcome, SchedulerPhase, SquashScheduler};
pub use storage::{StorageResult, VersionStorage};
pub use types::{PendingChange, VersionMetadata, VersionRecord};
pub use undo::{UndoAction, UndoCoordinator, UndoOutcome, UndoState};
pub use version_store::VersionStore;
