//! Error types for ferry-core.

use thiserror::Error;

/// Main error type for synchronization operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// HTTP transport failure talking to an external service.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Requested hash algorithm is not supported.
    #[error("unsupported hash type: {0}")]
    UnsupportedHash(String),

    /// Storage identifier names a driver this build does not know.
    #[error("unsupported storage driver: {0}")]
    UnsupportedDriver(String),

    /// Persistent id lacks a scheme prefix.
    #[error("malformed persistent id: expected scheme and remainder, found: {0}")]
    MalformedPersistentId(String),

    /// Another job already holds the per-dataset lock.
    #[error("a job for dataset {0} is already in progress")]
    DatasetBusy(String),

    /// Caller lacks the required dataset permission.
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// The dataset repository answered with a non-success status.
    #[error("dataset repository request failed: {status}: {message}")]
    UpstreamHttp { status: u16, message: String },

    /// A source stream could not be opened.
    #[error("failed to open stream: {message}")]
    StreamOpen { message: String },

    /// Reading from a source stream failed mid-transfer.
    #[error("stream read failed: {message}")]
    StreamRead { message: String },

    /// Writing to a storage sink failed mid-transfer.
    #[error("stream write failed: {message}")]
    StreamWrite { message: String },

    /// The remote side of a streaming pipeline went away.
    #[error("remote closed: {message}")]
    RemoteClosed { message: String },

    /// The shared key-value store is unreachable.
    #[error("shared store unavailable: {message}")]
    CacheUnavailable { message: String },

    /// Operation was cancelled by the stop signal or a timeout.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Returns true if this error is the cooperative-cancellation signal.
    ///
    /// Cancellation is not surfaced to users; it only produces a residual.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Returns true if retrying against the same dataset later may succeed
    /// without any change on the caller's side.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::DatasetBusy(_) | Error::CacheUnavailable { .. } | Error::Cancelled
        )
    }
}

/// Convenience result type for ferry operations.
pub type Result<T> = std::result::Result<T, Error>;
