//! Bucket/Object metadata API.
//!
//! The operation surface called by the S3-compatible layer. Every
//! operation resolves the bucket through the metastore, takes a
//! refcounted namespace handle and maps failures into the public error
//! taxonomy before returning.

use crate::handle::NsHandle;
use crate::session::Session;
use cellar_common::{BucketInfo, Error, Result, METASTORE_NAMESPACE};
use cellar_core::kv::Namespace;
use cellar_core::listing::{
    self, ListingParams, ListingType, ObjectListing, UploadListing,
};
use cellar_core::metastore::Metastore;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Bucket attributes together with an optional object record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketAndObject {
    pub bucket: BucketInfo,
    /// Absent when the object does not exist; that is not an error.
    pub object: Option<Value>,
}

/// Listing payload, shaped by the requested listing type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListingResult {
    Objects(ObjectListing),
    Uploads(UploadListing),
}

/// Worker-side metadata operations.
pub struct MetadataApi {
    session: Arc<Session>,
}

impl MetadataApi {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Convenience constructor: connect a session and wrap it.
    pub async fn connect(config: cellar_common::WorkerConfig) -> Result<Self> {
        Ok(Self::new(Session::connect(config).await?))
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    async fn metastore(&self) -> Result<Metastore<NsHandle>> {
        Ok(Metastore::new(
            self.session.namespace_handle(METASTORE_NAMESPACE).await?,
        ))
    }

    /// Resolve a bucket to its namespace handle, failing with
    /// `NoSuchBucket` when the metastore has no record of it.
    ///
    /// The metastore handle is released before the bucket handle is
    /// taken, so a deferred reconnect triggered by the second lookup is
    /// never blocked by the first.
    async fn load_db_if_exists(&self, bucket: &str) -> Result<NsHandle> {
        {
            let metastore = self.metastore().await?;
            metastore.get_bucket_attrs(bucket).await?;
        }
        self.session.namespace_handle(bucket).await
    }

    /// Create a bucket: reserve its namespace, then record its
    /// attributes in the metastore.
    pub async fn create_bucket(&self, bucket: &str, info: &BucketInfo) -> Result<()> {
        let metastore = self.metastore().await?;
        if metastore.has_bucket(bucket).await? {
            debug!(bucket, "createBucket on existing bucket");
            return Err(Error::BucketAlreadyExists(bucket.to_string()));
        }
        self.session.create_namespace(bucket).await?;
        metastore.put_bucket_attrs(bucket, &info.to_bytes()?).await?;
        info!(bucket, "created bucket");
        Ok(())
    }

    pub async fn get_bucket_attributes(&self, bucket: &str) -> Result<BucketInfo> {
        let metastore = self.metastore().await?;
        let attrs = metastore.get_bucket_attrs(bucket).await?;
        BucketInfo::from_bytes(&attrs).map_err(|e| {
            error!(bucket, error = %e, "corrupt bucket record");
            Error::internal(format!("corrupt bucket record for {bucket}: {e}"))
        })
    }

    /// Replace the attributes of an existing bucket.
    pub async fn put_bucket_attributes(&self, bucket: &str, info: &BucketInfo) -> Result<()> {
        let metastore = self.metastore().await?;
        // only createBucket may bring a bucket into existence
        metastore.get_bucket_attrs(bucket).await?;
        metastore.put_bucket_attrs(bucket, &info.to_bytes()?).await
    }

    /// Delete the bucket record. Succeeds even when the bucket is
    /// already gone or its namespace still holds residual keys.
    pub async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let metastore = self.metastore().await?;
        metastore.delete_bucket(bucket).await?;
        info!(bucket, "deleted bucket");
        Ok(())
    }

    pub async fn put_object(&self, bucket: &str, key: &str, value: &Value) -> Result<()> {
        let ns = self.load_db_if_exists(bucket).await?;
        ns.put(key.as_bytes(), &serde_json::to_vec(value)?, true).await
    }

    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<Value> {
        let ns = self.load_db_if_exists(bucket).await?;
        let bytes = ns
            .get(key.as_bytes())
            .await?
            .ok_or_else(|| Error::NoSuchObject {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            error!(bucket, key, error = %e, "corrupt object record");
            Error::internal(format!("corrupt object record for {bucket}/{key}: {e}"))
        })
    }

    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let ns = self.load_db_if_exists(bucket).await?;
        ns.del(key.as_bytes(), true).await
    }

    /// Fetch bucket attributes and, when present, the object record in
    /// one operation. A missing object is reported by omission.
    pub async fn get_bucket_and_object(&self, bucket: &str, key: &str) -> Result<BucketAndObject> {
        let info = self.get_bucket_attributes(bucket).await?;
        let ns = self.session.namespace_handle(bucket).await?;
        let object = match ns.get(key.as_bytes()).await? {
            Some(bytes) => Some(serde_json::from_slice(&bytes).map_err(|e| {
                error!(bucket, key, error = %e, "corrupt object record");
                Error::internal(format!("corrupt object record for {bucket}/{key}: {e}"))
            })?),
            None => None,
        };
        Ok(BucketAndObject {
            bucket: info,
            object,
        })
    }

    /// List objects of a bucket through the plain delimiter extension.
    pub async fn list_object(&self, bucket: &str, params: &ListingParams) -> Result<ObjectListing> {
        let ns = self.load_db_if_exists(bucket).await?;
        listing::list_objects(&ns, params).await
    }

    /// List in-progress multipart uploads of a bucket.
    pub async fn list_multipart_uploads(
        &self,
        bucket: &str,
        params: &ListingParams,
    ) -> Result<UploadListing> {
        let ns = self.load_db_if_exists(bucket).await?;
        listing::list_multipart_uploads(&ns, params).await
    }

    /// Dispatch a listing by its requested type.
    pub async fn list(&self, bucket: &str, params: &ListingParams) -> Result<ListingResult> {
        match params.listing_type {
            ListingType::Delimiter => Ok(ListingResult::Objects(
                self.list_object(bucket, params).await?,
            )),
            ListingType::MultipartUploads => Ok(ListingResult::Uploads(
                self.list_multipart_uploads(bucket, params).await?,
            )),
        }
    }
}
