//! Base error types for witnessd.

use thiserror::Error;

/// Errors surfaced by the core I/O and platform layers.
#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The supplied path is malformed or outside the allowed layout
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The supplied path escapes its base directory
    #[error("path traversal rejected: {0}")]
    PathTraversal(String),

    /// A file or socket has permissions wider than owner-only
    #[error("insecure permissions on {path}: mode {mode:o}")]
    InsecurePermissions { path: String, mode: u32 },

    /// Caller-supplied input failed validation
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An atomic write could not be completed
    #[error("write failed for {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    /// Dropping privileges failed; the daemon must not continue
    #[error("privilege drop failed: {0}")]
    PrivilegeDrop(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
