//! Shared metadata types for cellar

use crate::clock::Clock;
use serde::{Deserialize, Serialize};

/// Distinguished namespace holding bucket metadata records.
pub const METASTORE_NAMESPACE: &str = "__metastore";

/// Well-known bucket created idempotently at master startup.
pub const USERS_BUCKET: &str = "usersBucket";

/// Owner of the well-known users bucket.
pub const USERS_BUCKET_OWNER: &str = "admin";

/// Bucket metadata record.
///
/// Stored in the metastore as JSON text; the core otherwise treats the
/// serialized form as an opaque byte string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketInfo {
    /// Canonical owner id
    pub owner: String,
    /// Display name of the owner
    pub owner_display_name: String,
    /// ISO-8601 UTC creation timestamp
    pub creation_date: String,
    /// Access control list
    pub acl: Acl,
}

impl BucketInfo {
    /// Create a bucket record owned by `owner`, stamped with the clock.
    pub fn new(owner: impl Into<String>, clock: &dyn Clock) -> Self {
        let owner = owner.into();
        Self {
            owner_display_name: owner.clone(),
            owner,
            creation_date: clock.now(),
            acl: Acl::default(),
        }
    }

    /// Serialize to the stored JSON form.
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from the stored JSON form.
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Bucket access control list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acl {
    /// Canned ACL name (e.g. "private")
    pub canned: String,
}

impl Default for Acl {
    fn default() -> Self {
        Self {
            canned: "private".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    #[test]
    fn test_bucket_info_roundtrip() {
        let info = BucketInfo::new("admin", &SystemClock);
        let bytes = info.to_bytes().unwrap();
        let parsed = BucketInfo::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, info);
        assert_eq!(parsed.owner, "admin");
        assert_eq!(parsed.acl.canned, "private");
    }

    #[test]
    fn test_bucket_info_json_shape() {
        let info = BucketInfo::new("admin", &SystemClock);
        let value: serde_json::Value = serde_json::from_slice(&info.to_bytes().unwrap()).unwrap();
        assert!(value.get("owner").is_some());
        assert!(value.get("ownerDisplayName").is_some());
        assert!(value.get("creationDate").is_some());
    }
}
