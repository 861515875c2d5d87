//! Error types for the strata library
//!
//! This module defines every error a backup run can produce. Errors fall into
//! two groups:
//!
//! - **Fatal** errors ([`StrataError::Configuration`], [`StrataError::Schema`])
//!   abort a run before any file is processed.
//! - **Per-file** errors ([`StrataError::Hash`], [`StrataError::Persistence`],
//!   [`StrataError::Archival`]) are absorbed by the worker that hit them and
//!   folded into the run report as a [`RunFailure`](crate::types::RunFailure).
//!
//! [`FailureKind`] is the coarse classification stored in the report.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the strata library
pub type Result<T> = std::result::Result<T, StrataError>;

/// Main error type for all strata operations
#[derive(Debug, Error)]
pub enum StrataError {
    /// Source root missing/inaccessible or destination directories unusable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The state database could not be opened or its schema created
    #[error("Schema initialization failed: {0}")]
    Schema(#[source] rusqlite::Error),

    /// A file could not be read for hashing
    #[error("Failed to hash {path:?}: {source}")]
    Hash {
        /// File that could not be hashed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A read or write against the state database failed
    #[error("Persistence error for {path:?}: {source}")]
    Persistence {
        /// Backup-relative path the operation concerned
        path: String,
        /// Underlying SQLite error
        #[source]
        source: rusqlite::Error,
    },

    /// Copying or removing a file in the backup or history tree failed
    #[error("Archival error for {path:?}: {source}")]
    Archival {
        /// Path being copied or removed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A path could not be expressed relative to the source root
    #[error("Path {path:?} is not under source root {root:?}")]
    NotUnderRoot {
        /// Offending path
        path: PathBuf,
        /// Source root it was expected under
        root: PathBuf,
    },

    /// A path whose name cannot be stored as a state key
    #[error("Path {path:?} is not valid UTF-8")]
    NonUtf8Path {
        /// Offending relative path
        path: PathBuf,
    },

    /// I/O errors outside the categories above
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors while reading a JSON configuration file
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StrataError {
    /// Create a configuration error with a custom message
    pub fn configuration(msg: impl Into<String>) -> Self {
        StrataError::Configuration(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        StrataError::Internal(msg.into())
    }

    /// Wrap a SQLite error raised while operating on `path`
    pub fn persistence(path: impl Into<String>, source: rusqlite::Error) -> Self {
        StrataError::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Wrap an I/O error raised while copying or removing `path`
    pub fn archival(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StrataError::Archival {
            path: path.into(),
            source,
        }
    }

    /// Classify this error into the coarse kind recorded in run reports
    pub fn kind(&self) -> FailureKind {
        match self {
            StrataError::Configuration(_) | StrataError::Json(_) => FailureKind::Configuration,
            StrataError::Schema(_) => FailureKind::Schema,
            StrataError::Hash { .. } => FailureKind::Hash,
            StrataError::Persistence { .. } => FailureKind::Persistence,
            StrataError::Archival { .. } | StrataError::Io(_) => FailureKind::Archival,
            StrataError::NotUnderRoot { .. }
            | StrataError::NonUtf8Path { .. }
            | StrataError::Internal(_) => FailureKind::Internal,
        }
    }

    /// Check whether this error only affects a single file
    ///
    /// Fatal errors stop the run; everything else is recorded and the run
    /// carries on with the remaining files.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.kind(), FailureKind::Configuration | FailureKind::Schema)
    }

    /// Path the failing operation concerned, when the error carries one
    ///
    /// Persistence errors carry the backup-relative key, or `*` for
    /// operations over the whole table, which names no single path.
    pub fn failed_path(&self) -> Option<PathBuf> {
        match self {
            StrataError::Hash { path, .. }
            | StrataError::Archival { path, .. }
            | StrataError::NotUnderRoot { path, .. }
            | StrataError::NonUtf8Path { path } => Some(path.clone()),
            StrataError::Persistence { path, .. } if path != "*" => Some(PathBuf::from(path)),
            _ => None,
        }
    }

    /// Check whether this error came from SQLite lock contention
    pub fn is_busy(&self) -> bool {
        let source = match self {
            StrataError::Persistence { source, .. } | StrataError::Schema(source) => source,
            _ => return false,
        };
        matches!(
            source.sqlite_error_code(),
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
        )
    }
}

/// Coarse failure classification carried in a [`RunFailure`](crate::types::RunFailure)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Source or destination unusable
    Configuration,
    /// State store could not be initialized
    Schema,
    /// File could not be read for hashing
    Hash,
    /// State store read or write failed
    Persistence,
    /// Copy or remove in the backup/history tree failed
    Archival,
    /// Unexpected condition, including a panicking worker
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Configuration => "ConfigurationFailure",
            FailureKind::Schema => "SchemaFailure",
            FailureKind::Hash => "HashFailure",
            FailureKind::Persistence => "PersistenceFailure",
            FailureKind::Archival => "ArchivalFailure",
            FailureKind::Internal => "InternalFailure",
        };
        f.write_str(name)
    }
}
