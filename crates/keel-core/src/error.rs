use std::path::PathBuf;

use thiserror::Error;

/// Core error type for keel operations.
#[derive(Error, Debug)]
pub enum KeelError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Cannot read migration source {}: {reason}", path.display())]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error("Statement {index} (line {line}) of '{filename}' failed: {detail}")]
    Statement {
        filename: String,
        /// 1-based position of the statement within its script.
        index: usize,
        /// 1-based line in the script where the statement starts.
        line: usize,
        detail: String,
    },

    #[error("Migration '{0}' is already recorded in the ledger")]
    DuplicateRecord(String),
}

impl KeelError {
    pub fn source_unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        KeelError::SourceUnreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias using KeelError.
pub type Result<T> = std::result::Result<T, KeelError>;
