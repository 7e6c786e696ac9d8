//! Error kinds for fwpack operations.
//! Core code only returns these; mapping to messages and exit codes is the CLI's job.

use std::path::PathBuf;

/// Main error type for fwpack operations
#[derive(Debug, thiserror::Error)]
pub enum FwpackError {
    /// Object index, installation set, package uid or commit absent
    #[error("{0} not found")]
    NotFound(String),

    /// Caller violated a precondition
    #[error("{0}")]
    Usage(String),

    /// Option is not part of the schema of the object's mode
    #[error("option \"{option}\" is not valid for mode \"{mode}\"")]
    InvalidOption { mode: String, option: String },

    /// Option value failed the option's type or range check
    #[error("invalid value \"{value}\" for option \"{option}\": {reason}")]
    InvalidValue {
        option: String,
        value: String,
        reason: String,
    },

    /// Local artifact unreadable while loading
    #[error("cannot read {}: {source}", path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Server rejected the pushed content
    #[error("upload failed: {0}")]
    Upload(String),

    /// Server unreachable
    #[error("can't reach server: {0}")]
    Connection(String),

    /// Writing would overwrite a file the package does not control
    #[error("{} already exists", .0.display())]
    FileExists(PathBuf),

    /// Persisted manifest unreadable, unparseable or unwritable
    #[error("manifest error in {}: {reason}", path.display())]
    Manifest { path: PathBuf, reason: String },

    /// File content does not match the digest it was announced or loaded with
    #[error("integrity check failed for {} (expected {expected}, got {actual})", path.display())]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Server answered with a status outside the sync contract
    #[error("unexpected server response (status {status}): {message}")]
    UnexpectedResponse { status: u16, message: String },
}

pub type Result<T> = std::result::Result<T, FwpackError>;

impl FwpackError {
    pub fn not_found(what: impl Into<String>) -> Self {
        FwpackError::NotFound(what.into())
    }

    pub fn usage(message: impl Into<String>) -> Self {
        FwpackError::Usage(message.into())
    }

    pub fn manifest(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        FwpackError::Manifest {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
