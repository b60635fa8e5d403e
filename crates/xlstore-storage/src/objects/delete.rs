use futures::future::join_all;
use tracing::{debug, warn};
use xlstore_common::error::{Result, XlError};

use super::XlObjects;
use crate::errors::{StorageError, to_object_err};
use crate::multipart::{self, MULTIPART_META_FILE, is_multipart_object, load_multipart_info};

impl XlObjects {
    /// Removes a simple object, or every part of a multipart object followed
    /// by its descriptor. The descriptor survives a partial failure so the
    /// delete can be retried.
    pub(super) async fn delete_object_inner(&self, bucket: &str, object: &str) -> Result<()> {
        let multipart = is_multipart_object(self.storage.as_ref(), bucket, object)
            .await
            .map_err(|err| to_object_err(err, bucket, object))?;
        if !multipart {
            return match self.storage.delete_file(bucket, object).await {
                Ok(()) => Ok(()),
                // A bare directory is a prefix, not an object.
                Err(StorageError::IsNotRegular) => Err(XlError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: object.to_string(),
                }),
                Err(err) => Err(to_object_err(err, bucket, object)),
            };
        }

        let info = load_multipart_info(self.storage.as_ref(), bucket, object).await?;
        let results = join_all(info.parts.iter().map(|part| {
            let path = multipart::part_path(object, part.part_number);
            async move { (part.part_number, self.storage.delete_file(bucket, &path).await) }
        }))
        .await;

        let mut failed_parts = 0_usize;
        for (part_number, result) in results {
            match result {
                Ok(()) | Err(StorageError::FileNotFound) => {}
                Err(err) => {
                    warn!(bucket, object, part_number, error = %err, "failed to delete part");
                    failed_parts += 1;
                }
            }
        }
        if failed_parts > 0 {
            return Err(XlError::PartialDelete {
                bucket: bucket.to_string(),
                key: object.to_string(),
                failed_parts,
            });
        }

        self.storage
            .delete_file(bucket, &multipart::meta_path(object))
            .await
            .map_err(|err| to_object_err(err, bucket, object))?;
        debug!(bucket, object, parts = info.parts.len(), "multipart object deleted");
        Ok(())
    }

    /// Removes the part files of an upload that was never completed. A
    /// completed multipart object is left for `delete_object`.
    pub(super) async fn abort_multipart_inner(&self, bucket: &str, object: &str) -> Result<usize> {
        let no_upload = || XlError::NoSuchUpload {
            bucket: bucket.to_string(),
            key: object.to_string(),
        };

        let entries = match self.storage.list_dir(bucket, &format!("{object}/")).await {
            Ok(entries) => entries,
            Err(StorageError::FileNotFound) => return Err(no_upload()),
            Err(err) => return Err(to_object_err(err, bucket, object)),
        };
        if entries.iter().any(|entry| entry == MULTIPART_META_FILE) {
            return Err(no_upload());
        }

        let part_numbers: Vec<i32> = entries
            .iter()
            .filter_map(|entry| multipart::part_number_of(entry))
            .collect();
        if part_numbers.is_empty() {
            return Err(no_upload());
        }

        let results = join_all(part_numbers.iter().map(|&part_number| {
            let path = multipart::part_path(object, part_number);
            async move { (part_number, self.storage.delete_file(bucket, &path).await) }
        }))
        .await;

        let mut failed_parts = 0_usize;
        for (part_number, result) in results {
            match result {
                Ok(()) | Err(StorageError::FileNotFound) => {}
                Err(err) => {
                    warn!(bucket, object, part_number, error = %err, "failed to remove uploaded part");
                    failed_parts += 1;
                }
            }
        }
        if failed_parts > 0 {
            return Err(XlError::PartialDelete {
                bucket: bucket.to_string(),
                key: object.to_string(),
                failed_parts,
            });
        }

        debug!(bucket, object, parts = part_numbers.len(), "aborted multipart upload");
        Ok(part_numbers.len())
    }
}
