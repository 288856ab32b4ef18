//! Error types for Warden

use thiserror::Error;

/// Result type for Warden operations
pub type Result<T> = std::result::Result<T, WardenError>;

/// Warden error types
#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Container engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Engine request {request} failed with status {status}: {message}")]
    Engine {
        request: String,
        status: u16,
        message: String,
    },

    #[error("Log stream truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Invalid log frame stream type: {0}")]
    InvalidStream(u8),

    #[error("Port {port}, from variable {variable}, appears to already be in use: {reason}")]
    PortConflict {
        port: u16,
        variable: String,
        reason: String,
    },

    #[error("Failed to write {path}: {message}")]
    Write { path: String, message: String },

    #[error("{tool} exited with {status} running {args:?}")]
    ToolFailed {
        tool: String,
        status: String,
        args: Vec<String>,
    },

    #[error("Volume error: {0}")]
    Volume(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl WardenError {
    /// Errors that end the whole invocation rather than the current command.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WardenError::EngineUnavailable(_) | WardenError::Parse { .. }
        )
    }
}

/// Outcome of a bulk operation where single items may fail without
/// aborting the rest.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BulkOutcome {
    /// Items that were handled
    pub succeeded: Vec<String>,
    /// One message per item that failed
    pub warnings: Vec<String>,
}

impl BulkOutcome {
    /// Record a success
    pub fn ok(&mut self, item: impl Into<String>) {
        self.succeeded.push(item.into());
    }

    /// Record a per-item failure and log it
    pub fn warn(&mut self, item: &str, error: impl std::fmt::Display) {
        tracing::warn!("Failed to handle {}: {}", item, error);
        self.warnings.push(format!("{}: {}", item, error));
    }

    /// True when no item failed
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}
