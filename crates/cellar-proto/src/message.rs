//! Wire message types.
//!
//! Scans are modeled as server-side cursors: `ScanOpen` returns an opaque
//! `scan_id`, `ScanPull` drains bounded batches, and `ScanClose` is
//! idempotent and valid even after the cursor reported `end`.

use cellar_common::Error;
use serde::{Deserialize, Serialize};

/// Range parameters for an ordered scan.
///
/// Bounds are raw-byte lexicographic. `gt` is exclusive, `gte` and
/// `start` are inclusive (`start` is an alias kept for callers that
/// phrase the lower bound that way), `lt` is exclusive, `lte` inclusive.
/// When several lower bounds are given the tightest one wins; same for
/// upper bounds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRange {
    pub gt: Option<Vec<u8>>,
    pub gte: Option<Vec<u8>>,
    pub start: Option<Vec<u8>>,
    pub lt: Option<Vec<u8>>,
    pub lte: Option<Vec<u8>>,
    pub limit: Option<u64>,
    pub reverse: bool,
}

/// One record yielded by a scan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Request from a worker to the master.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Request {
    Get {
        namespace: String,
        key: Vec<u8>,
    },
    Put {
        namespace: String,
        key: Vec<u8>,
        value: Vec<u8>,
        sync: bool,
    },
    Del {
        namespace: String,
        key: Vec<u8>,
        sync: bool,
    },
    ScanOpen {
        namespace: String,
        range: ScanRange,
    },
    ScanPull {
        scan_id: u64,
        max: u32,
    },
    ScanClose {
        scan_id: u64,
    },
    CreateNamespace {
        name: String,
    },
}

/// Response from the master to a worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Response {
    /// Result of a `Get`; `None` means the key is not present.
    Value { value: Option<Vec<u8>> },
    /// Acknowledges `Put`, `Del`, `ScanClose` and `CreateNamespace`.
    Done,
    /// A cursor was opened.
    ScanOpened { scan_id: u64 },
    /// A batch of records; `end` marks cursor exhaustion.
    ScanBatch { entries: Vec<ScanEntry>, end: bool },
    /// The operation failed.
    Error(WireError),
}

/// Error carried over the wire.
///
/// `bucket` and `key` carry the resource names for the public taxonomy
/// kinds so the typed error reconstructs exactly on the other side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

impl From<&Error> for WireError {
    fn from(err: &Error) -> Self {
        let (bucket, key) = match err {
            Error::NoSuchBucket(bucket) | Error::BucketAlreadyExists(bucket) => {
                (Some(bucket.clone()), None)
            }
            Error::NoSuchObject { bucket, key } => (Some(bucket.clone()), Some(key.clone())),
            _ => (None, None),
        };
        Self {
            code: err.api_error_code().to_string(),
            message: err.to_string(),
            bucket,
            key,
        }
    }
}

impl WireError {
    /// Reconstruct a typed error on the client side.
    ///
    /// The four public taxonomy kinds round-trip; everything else comes
    /// back as an internal error carrying the server's message.
    pub fn into_error(self) -> Error {
        match self.code.as_str() {
            "NoSuchBucket" => Error::NoSuchBucket(self.bucket.unwrap_or(self.message)),
            "BucketAlreadyExists" => Error::BucketAlreadyExists(self.bucket.unwrap_or(self.message)),
            "NoSuchObject" => Error::NoSuchObject {
                bucket: self.bucket.unwrap_or_default(),
                key: self.key.unwrap_or_default(),
            },
            _ => Error::Internal(self.message),
        }
    }
}
