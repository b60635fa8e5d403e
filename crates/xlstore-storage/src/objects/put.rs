use std::collections::HashMap;

use md5::{Digest, Md5};
use tokio::io::AsyncReadExt;
use tracing::{debug, error, warn};
use uuid::Uuid;
use xlstore_common::error::{Result, XlError};

use super::XlObjects;
use crate::errors::{StorageError, to_object_err};
use crate::multipart::is_multipart_object;
use crate::traits::ObjectReader;
use crate::{META_BUCKET, TMP_PREFIX};

/// Metadata key carrying the md5 the client expects for the body.
pub const MD5_METADATA_KEY: &str = "md5Sum";

/// What a staged write is renamed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Target {
    /// A whole object; an existing multipart object at the key is replaced.
    Object,
    /// One part file of a multipart object.
    Part,
}

impl XlObjects {
    /// Stages `data` in the meta volume, verifies it, then renames it to
    /// `bucket/path`. The staged file never outlives the call.
    pub(super) async fn put_staged(
        &self,
        bucket: &str,
        path: &str,
        target: Target,
        size: i64,
        data: ObjectReader,
        metadata: &HashMap<String, String>,
    ) -> Result<String> {
        let tmp_path = format!("{TMP_PREFIX}/{}/{bucket}/{path}", Uuid::new_v4());

        let err = match self
            .write_and_activate(bucket, path, target, &tmp_path, size, data, metadata)
            .await
        {
            Ok(md5_sum) => {
                debug!(bucket, path, md5_sum, "object stored");
                return Ok(md5_sum);
            }
            Err(err) => err,
        };

        match self.storage.delete_file(META_BUCKET, &tmp_path).await {
            Ok(()) | Err(StorageError::FileNotFound) => Err(err),
            Err(cleanup_err) => {
                error!(
                    bucket,
                    path,
                    tmp_path,
                    error = %err,
                    cleanup_error = %cleanup_err,
                    "failed to remove staged object after failed write"
                );
                Err(to_object_err(cleanup_err, META_BUCKET, &tmp_path))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_and_activate(
        &self,
        bucket: &str,
        path: &str,
        target: Target,
        tmp_path: &str,
        size: i64,
        data: ObjectReader,
        metadata: &HashMap<String, String>,
    ) -> Result<String> {
        let md5_sum = self.stage(bucket, path, tmp_path, size, data).await?;

        if let Some(expected) = metadata
            .get(MD5_METADATA_KEY)
            .filter(|expected| !expected.is_empty())
        {
            if !expected.eq_ignore_ascii_case(&md5_sum) {
                return Err(XlError::BadDigest {
                    expected: expected.clone(),
                    calculated: md5_sum,
                });
            }
        }

        self.check_parent_is_object(bucket, path).await?;

        match target {
            Target::Part => self
                .storage
                .rename_file(META_BUCKET, tmp_path, bucket, path)
                .await
                .map_err(|err| to_object_err(err, bucket, path))?,
            Target::Object => self.activate(bucket, path, tmp_path).await?,
        }
        Ok(md5_sum)
    }

    /// Copies the body into the staging file while hashing it. A positive
    /// `size` copies exactly that many bytes.
    async fn stage(
        &self,
        bucket: &str,
        object: &str,
        tmp_path: &str,
        size: i64,
        mut data: ObjectReader,
    ) -> Result<String> {
        let mut writer = self
            .storage
            .create_file(META_BUCKET, tmp_path)
            .await
            .map_err(|err| to_object_err(err, bucket, object))?;

        let mut hasher = Md5::new();
        let mut buf = vec![0_u8; self.config.read_chunk_size.max(1)];
        let mut remaining = u64::try_from(size).ok().filter(|size| *size > 0);
        loop {
            let want = match remaining {
                Some(0) => break,
                Some(left) => buf.len().min(usize::try_from(left).unwrap_or(usize::MAX)),
                None => buf.len(),
            };

            let n = data.read(&mut buf[..want]).await?;
            if n == 0 {
                if remaining.is_some() {
                    return Err(XlError::IncompleteBody {
                        bucket: bucket.to_string(),
                        key: object.to_string(),
                    });
                }
                break;
            }

            hasher.update(&buf[..n]);
            writer
                .write_all(&buf[..n])
                .await
                .map_err(|err| to_object_err(err, bucket, object))?;
            if let Some(left) = remaining.as_mut() {
                *left -= n as u64;
            }
        }

        writer
            .close()
            .await
            .map_err(|err| to_object_err(err, bucket, object))?;
        Ok(hex::encode(hasher.finalize()))
    }

    /// Rejects a key whose ancestor path is itself an object.
    async fn check_parent_is_object(&self, bucket: &str, object: &str) -> Result<()> {
        for (idx, _) in object.match_indices('/') {
            let parent = &object[..idx];
            let file = match self.storage.stat_file(bucket, parent).await {
                Ok(file) => file,
                Err(StorageError::FileNotFound) => return Ok(()),
                Err(err) => return Err(to_object_err(err, bucket, parent)),
            };

            let is_object = !file.is_dir
                || is_multipart_object(self.storage.as_ref(), bucket, parent)
                    .await
                    .map_err(|err| to_object_err(err, bucket, parent))?;
            if is_object {
                return Err(XlError::ParentIsObject {
                    bucket: bucket.to_string(),
                    key: parent.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Renames the staged file over `bucket/object`. A multipart object at the
    /// key is moved to a shadow path first and restored if the rename fails.
    async fn activate(&self, bucket: &str, object: &str, tmp_path: &str) -> Result<()> {
        let is_dir = match self.storage.stat_file(bucket, object).await {
            Ok(file) => file.is_dir,
            Err(StorageError::FileNotFound) => false,
            Err(err) => return Err(to_object_err(err, bucket, object)),
        };

        let replaces_multipart = is_dir
            && is_multipart_object(self.storage.as_ref(), bucket, object)
                .await
                .map_err(|err| to_object_err(err, bucket, object))?;
        if !replaces_multipart {
            return self
                .storage
                .rename_file(META_BUCKET, tmp_path, bucket, object)
                .await
                .map_err(|err| to_object_err(err, bucket, object));
        }

        let object_dir = format!("{object}/");
        let shadow = format!("{TMP_PREFIX}/{}-shadow/{bucket}/{object}", Uuid::new_v4());
        let shadow_dir = format!("{shadow}/");
        self.storage
            .rename_file(bucket, &object_dir, META_BUCKET, &shadow_dir)
            .await
            .map_err(|err| to_object_err(err, bucket, object))?;

        if let Err(err) = self
            .storage
            .rename_file(META_BUCKET, tmp_path, bucket, object)
            .await
        {
            if let Err(restore_err) = self
                .storage
                .rename_file(META_BUCKET, &shadow_dir, bucket, &object_dir)
                .await
            {
                error!(
                    bucket,
                    object,
                    shadow,
                    error = %restore_err,
                    "failed to restore multipart object after failed replace"
                );
            }
            return Err(to_object_err(err, bucket, object));
        }

        if let Err(err) = self.delete_object_inner(META_BUCKET, &shadow).await {
            warn!(bucket, object, shadow, error = %err, "failed to remove replaced multipart object");
        }
        Ok(())
    }
}
