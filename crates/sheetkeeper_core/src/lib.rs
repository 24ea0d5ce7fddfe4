#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Callback registry for event subscriptions
pub mod callback_registry;

/// Change descriptions and their merge into one summary
pub mod change;

/// Wall-clock abstraction
pub mod clock;

/// Configuration options
pub mod config;

/// Error (common error types)
pub mod error;

/// Events sent to the UI layer
pub mod events;

/// Version log, squash scheduler, navigation and undo
pub mod history;

/// Session facade (one document in one tab)
pub mod session;

/// Cross-tab messaging and conflict detection
pub mod tabs;

#[cfg(test)]
pub mod test_utils;

pub use error::{HistoryError, Result};
pub use session::HistorySession;
