use xlstore_common::error::Result;
use xlstore_common::mime::content_type_for;
use xlstore_common::types::ObjectInfo;

use super::XlObjects;
use crate::errors::{StorageError, to_object_err};
use crate::multipart::load_multipart_info;

impl XlObjects {
    /// Stats a simple object, falling back to the multipart descriptor when
    /// there is no regular file at the key.
    pub(super) async fn get_object_info_inner(
        &self,
        bucket: &str,
        object: &str,
    ) -> Result<ObjectInfo> {
        let file = match self.storage.stat_file(bucket, object).await {
            Ok(file) if !file.is_dir => Some(file),
            Ok(_) | Err(StorageError::FileNotFound) => None,
            Err(err) => return Err(to_object_err(err, bucket, object)),
        };

        let (size, last_modified, etag) = match file {
            Some(file) => (file.size, file.mod_time, file.md5_sum),
            None => {
                let info = load_multipart_info(self.storage.as_ref(), bucket, object).await?;
                (info.size, info.mod_time, info.md5_sum)
            }
        };

        Ok(ObjectInfo {
            bucket: bucket.to_string(),
            key: object.to_string(),
            size,
            etag,
            content_type: content_type_for(object).to_string(),
            last_modified,
            is_dir: false,
        })
    }
}
