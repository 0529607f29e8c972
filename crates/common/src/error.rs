//! Error types for Materialstore

use std::path::PathBuf;

use thiserror::Error;

use crate::types::FileType;

/// Result type alias using Materialstore Error
pub type Result<T> = std::result::Result<T, Error>;

/// Which input list of a pairing an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// Materialstore error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Store I/O error at {}: {source}", path.display())]
    StoreIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Integrity verification failed for {path}: expected {expected}, got {actual}")]
    Integrity {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Corrupt index {} at line {line}: {reason}", path.display())]
    IndexCorrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Invalid job name: {0:?}")]
    InvalidJobName(String),

    #[error("Invalid job timestamp: {0:?}")]
    InvalidTimestamp(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid pairing input: {0}")]
    InvalidPairing(String),

    #[error("Ambiguous match: {count} {side} materials reduce to metadata {key}")]
    AmbiguousMatch { side: Side, key: String, count: usize },

    #[error("No comparator registered for file type {0}")]
    UnsupportedFileType(FileType),

    #[error("Comparison failed: {0}")]
    Comparison(String),

    #[error("Report I/O error at {}: {source}", path.display())]
    ReportIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Wrap an I/O failure against a path inside the store
    pub fn store_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::StoreIo {
            path: path.into(),
            source,
        }
    }

    /// Wrap an I/O failure against a report destination
    pub fn report_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::ReportIo {
            path: path.into(),
            source,
        }
    }

    /// True when a store address (job, timestamp) or object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::StoreIo { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}
