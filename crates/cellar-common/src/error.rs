//! Error types for cellar
//!
//! This module defines the common error type used throughout the system,
//! along with the mapping to the public error taxonomy exposed to the
//! S3-compatible layer above.

use thiserror::Error;

/// Common result type for cellar operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for cellar
#[derive(Debug, Error)]
pub enum Error {
    // Metadata errors
    #[error("no such bucket: {0}")]
    NoSuchBucket(String),

    #[error("bucket already exists: {0}")]
    BucketAlreadyExists(String),

    #[error("no such object: {bucket}/{key}")]
    NoSuchObject { bucket: String, key: String },

    /// The client's cached manifest does not advertise the namespace.
    /// Recoverable by a manifest reload through reconnect.
    #[error("namespace not in cached manifest: {0}")]
    StaleManifest(String),

    // Storage errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage engine error: {0}")]
    Storage(String),

    #[error("manifest error: {0}")]
    Manifest(String),

    // Network/RPC errors
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("wire protocol error: {0}")]
    Wire(String),

    // Internal errors
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a wire protocol error
    pub fn wire(msg: impl Into<String>) -> Self {
        Self::Wire(msg.into())
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NoSuchBucket(_) | Self::NoSuchObject { .. })
    }

    /// Public error code for the metadata API.
    ///
    /// Everything outside the bucket/object taxonomy collapses to
    /// `InternalError`; callers log the underlying error alongside it.
    #[must_use]
    pub fn api_error_code(&self) -> &'static str {
        match self {
            Self::NoSuchBucket(_) => "NoSuchBucket",
            Self::BucketAlreadyExists(_) => "BucketAlreadyExists",
            Self::NoSuchObject { .. } => "NoSuchObject",
            _ => "InternalError",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
