//! Error types for the download engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for download operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Errors that can occur while preparing, running, or verifying a download.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// A precondition on the engine configuration was violated.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The preflight probe or a request could not be issued.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A chunk exhausted its retry budget. The pool is aborted when this
    /// surfaces; the partial file on disk contains a hole for this range.
    #[error("chunk {index} abandoned after {attempts} attempts: {last_error}")]
    ChunkAbandoned {
        index: u64,
        attempts: u32,
        last_error: String,
    },

    /// Filesystem create/truncate/read/write failure. Always fatal.
    #[error("i/o error on {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The downloaded file does not hash to the expected digest.
    #[error("checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: String, got: String },

    /// Cooperative cancellation was observed.
    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Wrap an I/O error with the path it occurred on.
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
