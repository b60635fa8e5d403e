mod delete;
mod get;
mod info;
mod list;
mod list_cache;
mod put;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use xlstore_common::error::{Result, XlError};
use xlstore_common::types::{BucketInfo, ObjectInfo};

use crate::config::ObjectLayerConfig;
use crate::errors::to_object_err;
use crate::format;
use crate::multipart;
use crate::traits::{ListObjectsInfo, ObjectLayer, ObjectReader, StorageApi};
use crate::validate::{is_valid_bucket_name, is_valid_object_name, is_valid_object_prefix};

pub use get::PartStreamReader;
pub use list::{TreeWalker, WalkEntry};
pub use list_cache::{ListCache, ListParams};
pub use put::MD5_METADATA_KEY;

use put::Target;

/// Object layer over a mirrored disk set: simple objects are single files,
/// multipart objects are a directory of part files plus a descriptor.
#[derive(Debug, Clone)]
pub struct XlObjects {
    storage: Arc<dyn StorageApi>,
    list_cache: Arc<ListCache>,
    config: ObjectLayerConfig,
}

impl XlObjects {
    /// Bootstraps or validates the disk set format before serving requests.
    pub async fn new(
        storage: Arc<dyn StorageApi>,
        disks: &[String],
        config: ObjectLayerConfig,
    ) -> Result<Self> {
        format::initialize(storage.as_ref(), disks).await?;

        let list_cache = Arc::new(ListCache::new(
            config.list_cache_ttl,
            config.list_cache_capacity,
        ));
        info!(disks = disks.len(), "object layer initialized");

        Ok(Self {
            storage,
            list_cache,
            config,
        })
    }

    pub fn storage(&self) -> &dyn StorageApi {
        self.storage.as_ref()
    }

    pub fn list_cache(&self) -> &ListCache {
        &self.list_cache
    }

    async fn ensure_bucket_exists(&self, bucket: &str) -> Result<()> {
        validate_bucket_name(bucket)?;
        self.storage
            .stat_vol(bucket)
            .await
            .map_err(|err| to_object_err(err, bucket, ""))?;
        Ok(())
    }

    /// Stores one part of a multipart object. Parts become visible as an
    /// object only after [`XlObjects::complete_multipart_object`].
    pub async fn put_object_part(
        &self,
        bucket: &str,
        key: &str,
        part_number: i32,
        size: i64,
        data: ObjectReader,
        metadata: HashMap<String, String>,
    ) -> Result<String> {
        self.ensure_bucket_exists(bucket).await?;
        validate_object_key(bucket, key)?;
        if part_number < 1 {
            return Err(XlError::InvalidPart(part_number));
        }

        let dest = multipart::part_path(key, part_number);
        self.put_staged(bucket, &dest, Target::Part, size, data, &metadata)
            .await
    }

    /// Writes the descriptor for parts stored by [`XlObjects::put_object_part`]
    /// and returns the aggregate etag.
    pub async fn complete_multipart_object(
        &self,
        bucket: &str,
        key: &str,
        part_numbers: &[i32],
    ) -> Result<String> {
        self.ensure_bucket_exists(bucket).await?;
        validate_object_key(bucket, key)?;

        let info =
            multipart::complete_multipart_object(self.storage.as_ref(), bucket, key, part_numbers)
                .await?;
        Ok(info.md5_sum)
    }

    /// Drops the parts of an upload that was never completed, freeing its
    /// key. Returns how many parts were removed.
    pub async fn abort_multipart_object(&self, bucket: &str, key: &str) -> Result<usize> {
        self.ensure_bucket_exists(bucket).await?;
        validate_object_key(bucket, key)?;
        self.abort_multipart_inner(bucket, key).await
    }
}

#[async_trait]
impl ObjectLayer for XlObjects {
    async fn make_bucket(&self, bucket: &str) -> Result<()> {
        validate_bucket_name(bucket)?;
        self.storage
            .make_vol(bucket)
            .await
            .map_err(|err| to_object_err(err, bucket, ""))?;
        debug!(bucket, "bucket created");
        Ok(())
    }

    async fn get_bucket_info(&self, bucket: &str) -> Result<BucketInfo> {
        validate_bucket_name(bucket)?;
        let vol = self
            .storage
            .stat_vol(bucket)
            .await
            .map_err(|err| to_object_err(err, bucket, ""))?;
        Ok(BucketInfo {
            name: vol.name,
            created: vol.created,
        })
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        let vols = self
            .storage
            .list_vols()
            .await
            .map_err(|err| to_object_err(err, "", ""))?;

        // The meta volume and anything else that is not a valid bucket name stay hidden.
        let mut buckets: Vec<BucketInfo> = vols
            .into_iter()
            .filter(|vol| is_valid_bucket_name(&vol.name))
            .map(|vol| BucketInfo {
                name: vol.name,
                created: vol.created,
            })
            .collect();
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(buckets)
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        validate_bucket_name(bucket)?;
        self.storage
            .delete_vol(bucket)
            .await
            .map_err(|err| to_object_err(err, bucket, ""))?;
        self.list_cache.purge_bucket(bucket).await;
        debug!(bucket, "bucket deleted");
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        size: i64,
        data: ObjectReader,
        metadata: HashMap<String, String>,
    ) -> Result<String> {
        self.ensure_bucket_exists(bucket).await?;
        validate_object_key(bucket, key)?;
        self.put_staged(bucket, key, Target::Object, size, data, &metadata)
            .await
    }

    async fn get_object(&self, bucket: &str, key: &str, start_offset: i64) -> Result<ObjectReader> {
        self.ensure_bucket_exists(bucket).await?;
        validate_object_key(bucket, key)?;
        self.get_object_inner(bucket, key, start_offset).await
    }

    async fn get_object_info(&self, bucket: &str, key: &str) -> Result<ObjectInfo> {
        self.ensure_bucket_exists(bucket).await?;
        validate_object_key(bucket, key)?;
        self.get_object_info_inner(bucket, key).await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.ensure_bucket_exists(bucket).await?;
        validate_object_key(bucket, key)?;
        self.delete_object_inner(bucket, key).await
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        marker: &str,
        delimiter: &str,
        max_keys: i32,
    ) -> Result<ListObjectsInfo> {
        self.ensure_bucket_exists(bucket).await?;
        if !is_valid_object_prefix(prefix) {
            return Err(XlError::InvalidObjectName {
                bucket: bucket.to_string(),
                key: prefix.to_string(),
            });
        }
        if !delimiter.is_empty() && delimiter != "/" {
            return Err(XlError::UnsupportedDelimiter(delimiter.to_string()));
        }

        self.list_objects_inner(bucket, prefix, marker, delimiter, max_keys)
            .await
    }
}

fn validate_bucket_name(bucket: &str) -> Result<()> {
    if !is_valid_bucket_name(bucket) {
        return Err(XlError::InvalidBucketName(bucket.to_string()));
    }
    Ok(())
}

fn validate_object_key(bucket: &str, key: &str) -> Result<()> {
    if !is_valid_object_name(key) {
        return Err(XlError::InvalidObjectName {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
    }
    Ok(())
}
