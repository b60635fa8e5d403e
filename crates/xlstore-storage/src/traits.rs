use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use xlstore_common::error::Result;
use xlstore_common::types::{BucketInfo, ObjectInfo};

use crate::datatypes::{FileInfo, VolInfo};
use crate::errors::StorageResult;

pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write handle returned by [`StorageApi::create_file`]. Dropping it without
/// calling `close` abandons the write; the caller removes the file.
#[async_trait]
pub trait FileWriter: Send {
    async fn write_all(&mut self, buf: &[u8]) -> StorageResult<()>;
    async fn close(&mut self) -> StorageResult<()>;
}

/// Disk-set storage primitives, already quorum aware. Paths are relative to
/// a volume; directory entries returned by `list_dir` end with `/`.
#[async_trait]
pub trait StorageApi: Send + Sync + Debug {
    async fn make_vol(&self, volume: &str) -> StorageResult<()>;
    async fn list_vols(&self) -> StorageResult<Vec<VolInfo>>;
    async fn stat_vol(&self, volume: &str) -> StorageResult<VolInfo>;
    async fn delete_vol(&self, volume: &str) -> StorageResult<()>;

    async fn list_dir(&self, volume: &str, dir_path: &str) -> StorageResult<Vec<String>>;
    async fn create_file(&self, volume: &str, path: &str) -> StorageResult<Box<dyn FileWriter>>;
    async fn read_file(&self, volume: &str, path: &str, offset: u64) -> StorageResult<FileReader>;
    async fn stat_file(&self, volume: &str, path: &str) -> StorageResult<FileInfo>;
    /// Replaces an existing destination file. A source path ending in `/`
    /// moves the whole directory tree.
    async fn rename_file(
        &self,
        src_volume: &str,
        src_path: &str,
        dst_volume: &str,
        dst_path: &str,
    ) -> StorageResult<()>;
    /// Removes a file and prunes parent directories left empty.
    async fn delete_file(&self, volume: &str, path: &str) -> StorageResult<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListObjectsInfo {
    pub objects: Vec<ObjectInfo>,
    pub prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_marker: Option<String>,
}

#[async_trait]
pub trait ObjectLayer: Send + Sync {
    async fn make_bucket(&self, bucket: &str) -> Result<()>;
    async fn get_bucket_info(&self, bucket: &str) -> Result<BucketInfo>;
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>>;
    async fn delete_bucket(&self, bucket: &str) -> Result<()>;
    /// Stores `data` and returns its hex md5. `size > 0` bounds the copy.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        size: i64,
        data: ObjectReader,
        metadata: HashMap<String, String>,
    ) -> Result<String>;
    async fn get_object(&self, bucket: &str, key: &str, start_offset: i64) -> Result<ObjectReader>;
    async fn get_object_info(&self, bucket: &str, key: &str) -> Result<ObjectInfo>;
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        marker: &str,
        delimiter: &str,
        max_keys: i32,
    ) -> Result<ListObjectsInfo>;
}
