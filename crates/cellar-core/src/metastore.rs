//! Metastore
//!
//! The distinguished `__metastore` namespace maps bucket names to their
//! serialized metadata records and is the source of truth for bucket
//! existence. All writes are synchronous.

use crate::kv::Namespace;
use cellar_common::{Error, Result};

/// Bucket metadata store over any view of the metastore namespace.
pub struct Metastore<N> {
    ns: N,
}

impl<N: Namespace> Metastore<N> {
    pub fn new(ns: N) -> Self {
        Self { ns }
    }

    /// Whether the bucket exists.
    pub async fn has_bucket(&self, name: &str) -> Result<bool> {
        Ok(self.ns.get(name.as_bytes()).await?.is_some())
    }

    /// Fetch the serialized bucket record.
    pub async fn get_bucket_attrs(&self, name: &str) -> Result<Vec<u8>> {
        self.ns
            .get(name.as_bytes())
            .await?
            .ok_or_else(|| Error::NoSuchBucket(name.to_string()))
    }

    /// Store the serialized bucket record.
    pub async fn put_bucket_attrs(&self, name: &str, attrs: &[u8]) -> Result<()> {
        self.ns.put(name.as_bytes(), attrs, true).await
    }

    /// Remove the bucket record. Removing an absent record succeeds.
    pub async fn delete_bucket(&self, name: &str) -> Result<()> {
        self.ns.del(name.as_bytes(), true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::RootDb;
    use crate::namespace::LocalNamespace;
    use cellar_common::METASTORE_NAMESPACE;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn metastore(dir: &std::path::Path) -> Metastore<LocalNamespace> {
        let root = Arc::new(RootDb::open(dir).unwrap());
        Metastore::new(LocalNamespace::new(root, METASTORE_NAMESPACE).unwrap())
    }

    #[tokio::test]
    async fn test_bucket_lifecycle() {
        let dir = tempdir().unwrap();
        let store = metastore(dir.path());

        assert!(!store.has_bucket("alpha").await.unwrap());
        let missing = store.get_bucket_attrs("alpha").await.unwrap_err();
        assert!(matches!(missing, Error::NoSuchBucket(_)));

        store.put_bucket_attrs("alpha", b"{\"owner\":\"admin\"}").await.unwrap();
        assert!(store.has_bucket("alpha").await.unwrap());
        assert_eq!(
            store.get_bucket_attrs("alpha").await.unwrap(),
            b"{\"owner\":\"admin\"}".to_vec()
        );

        store.delete_bucket("alpha").await.unwrap();
        assert!(!store.has_bucket("alpha").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = metastore(dir.path());

        store.put_bucket_attrs("alpha", b"{}").await.unwrap();
        store.delete_bucket("alpha").await.unwrap();
        // second delete of an absent bucket still succeeds
        store.delete_bucket("alpha").await.unwrap();
    }
}
