use serde::Serialize;
use thiserror::Error;

/// Unified error type for sheetkeeper operations
#[derive(Debug, Error)]
pub enum HistoryError {
    // Version store errors
    #[error("Version store used before init()")]
    StoreNotInitialized,

    #[error("Version storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Storage I/O error: {0}")]
    StorageIo(String),

    // Navigation errors
    #[error("Version index {index} out of range (history holds {len} versions)")]
    InvalidVersionIndex { index: usize, len: usize },

    // Scheduling errors
    #[error("No tokio runtime to run the squash timer on")]
    NoRuntime,

    // Cross-tab errors
    #[error("Tab bus broadcast failed: {0}")]
    Broadcast(String),

    // Snapshot errors
    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Config errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,
}

#[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
impl From<rusqlite::Error> for HistoryError {
    fn from(err: rusqlite::Error) -> Self {
        HistoryError::StorageIo(err.to_string())
    }
}

/// Result type alias for sheetkeeper operations
pub type Result<T> = std::result::Result<T, HistoryError>;

/// A serializable representation of HistoryError for IPC (e.g., a webview bridge)
#[derive(Debug, Clone, Serialize)]
pub struct SerializableError {
    /// Error kind/variant name
    pub kind: String,
    /// Human-readable error message
    pub message: String,
}

impl From<&HistoryError> for SerializableError {
    fn from(err: &HistoryError) -> Self {
        let kind = match err {
            HistoryError::StoreNotInitialized => "StoreNotInitialized",
            HistoryError::StorageUnavailable(_) => "StorageUnavailable",
            HistoryError::StorageIo(_) => "StorageIo",
            HistoryError::InvalidVersionIndex { .. } => "InvalidVersionIndex",
            HistoryError::NoRuntime => "NoRuntime",
            HistoryError::Broadcast(_) => "Broadcast",
            HistoryError::Serialization(_) => "Serialization",
            HistoryError::Io(_) => "Io",
            HistoryError::ConfigParse(_) => "ConfigParse",
            HistoryError::ConfigSerialize(_) => "ConfigSerialize",
            HistoryError::NoConfigDir => "NoConfigDir",
        }
        .to_string();

        Self {
            kind,
            message: err.to_string(),
        }
    }
}

impl From<HistoryError> for SerializableError {
    fn from(err: HistoryError) -> Self {
        SerializableError::from(&err)
    }
}

impl HistoryError {
    /// Convert to a serializable representation for IPC
    pub fn to_serializable(&self) -> SerializableError {
        SerializableError::from(self)
    }

    /// Whether the caller may retry the failed operation as-is.
    ///
    /// Programmer errors and rejected navigation never succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HistoryError::StorageIo(_) | HistoryError::StorageUnavailable(_) | HistoryError::Io(_)
        )
    }
}
