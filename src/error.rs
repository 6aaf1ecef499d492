//! Error types for txfs.
//!
//! All operations return `Result<T>` which aliases `Result<T, TxfsError>`.

use std::path::PathBuf;
use thiserror::Error;

use crate::txn::ResourceKey;

/// Errors from transactional file operations and the transaction host.
#[derive(Debug, Error)]
pub enum TxfsError {
    /// An action was registered while no transaction was active.
    #[error("No active transaction found")]
    NoActiveTransaction,

    /// `create` target is already present.
    #[error("File already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// Parent directories for a move destination could not be created.
    #[error("Failed to create destination directory {}: {source}", .path.display())]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A rename (move, staging or restore) failed.
    #[error("Failed to move {} → {}: {source}", .from.display(), .to.display())]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Source and destination of a copy resolve to the same file.
    #[error("Cannot copy {} onto itself", .0.display())]
    SameFile(PathBuf),

    /// Path cannot be used (no file name, no parent, ...).
    #[error("Invalid path '{}': {reason}", .path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// The transaction host reported a completion status outside the known set.
    ///
    /// Indicates a defect in the host; no queued action is run.
    #[error("Unknown completion status: {0}")]
    UnrecognizedCompletionStatus(i32),

    /// Commit was requested but the transaction had been marked rollback-only.
    #[error("Transaction rolled back because it has been marked as rollback-only")]
    UnexpectedRollback,

    /// Transaction handle used out of order or after completion.
    #[error("Illegal transaction state: {0}")]
    IllegalTransactionState(String),

    /// A resource slot holds a value of an unexpected type.
    #[error("Resource bound to {0} has an unexpected type")]
    ResourceTypeMismatch(ResourceKey),

    /// Plan file could not be parsed.
    #[error("Plan line {line}: {msg}")]
    Plan { line: usize, msg: String },

    /// File system operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Unexpected error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for txfs operations.
pub type Result<T> = std::result::Result<T, TxfsError>;
