use std::path::PathBuf;

use thiserror::Error;

/// Failures on the framed connection. Any of these ends the connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed mid-frame ({got} of {expected} bytes)")]
    Truncated { expected: usize, got: usize },

    #[error("invalid magic in frame header")]
    BadMagic,

    #[error("protocol version mismatch: got {got}, expected {expected}")]
    VersionMismatch { got: u16, expected: u16 },

    #[error("frame payload too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("unexpected frame type {got} (expected {expected})")]
    UnexpectedFrame { got: u8, expected: u8 },

    #[error("malformed frame payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("peer closed connection before {0}")]
    Closed(&'static str),

    #[error("{0} timed out after {1} ms")]
    Timeout(&'static str, u64),
}

/// Failures while persisting a received record.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("path {path:?} escapes storage root")]
    Escape { path: String },

    #[error("invalid relative path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    /// True when the record was refused by the traversal guard rather than
    /// failing on disk.
    pub fn is_rejection(&self) -> bool {
        matches!(self, StorageError::Escape { .. } | StorageError::InvalidPath { .. })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no search path given and home directory could not be determined")]
    NoSearchRoot,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.into(),
        source,
    }
}
