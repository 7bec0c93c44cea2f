//! Error types for switchboard-core operations.
//!
//! The taxonomy mirrors how failures are surfaced to the caller: not-found
//! conditions are recoverable and render as empty state, external tool and
//! parse failures degrade a single call, and storage-busy is transient and
//! retryable. Nothing here is fatal to the process.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    // ─────────────────────────────────────────────────────────────────────
    // Not-found conditions (recoverable, surfaced as empty/neutral state)
    // ─────────────────────────────────────────────────────────────────────
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Worktree not found: {0}")]
    WorktreeNotFound(String),

    // ─────────────────────────────────────────────────────────────────────
    // External tool failures
    // ─────────────────────────────────────────────────────────────────────
    #[error("Command failed: {command}: {details}")]
    ToolFailed { command: String, details: String },

    #[error("Unexpected {tool} output: {details}")]
    Parse { tool: String, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Storage failures
    // ─────────────────────────────────────────────────────────────────────
    /// The database is locked by a concurrent writer. Transient; callers
    /// retry or skip the cycle.
    #[error("Status store is busy")]
    StorageBusy,

    #[error("Storage error: {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // I/O and configuration
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Home directory not found")]
    HomeDirNotFound,
}

impl CoreError {
    pub fn storage(context: impl Into<String>, source: rusqlite::Error) -> Self {
        if is_busy(&source) {
            return CoreError::StorageBusy;
        }
        CoreError::Storage {
            context: context.into(),
            source,
        }
    }

    /// True for conditions the caller should retry rather than report.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::StorageBusy)
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

/// Convenience type alias for Results using CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
