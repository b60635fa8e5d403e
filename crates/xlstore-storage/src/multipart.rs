use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;
use xlstore_common::error::{Result, XlError};

use crate::errors::{StorageError, StorageResult, to_object_err};
use crate::fileio::{read_all_file, write_all_file};
use crate::traits::StorageApi;
use crate::{META_BUCKET, TMP_PREFIX};

/// Suffix shared by the descriptor and every part file of a multipart object.
pub const MULTIPART_SUFFIX: &str = ".xlstore.multipart";
/// Descriptor file; part number 0 is reserved for it.
pub const MULTIPART_META_FILE: &str = "00000.xlstore.multipart";

pub fn part_file_name(part_number: i32) -> String {
    format!("{part_number:05}{MULTIPART_SUFFIX}")
}

/// Inverse of [`part_file_name`] for uploaded parts; the descriptor and
/// anything that is not a part file yield `None`.
pub fn part_number_of(file_name: &str) -> Option<i32> {
    let digits = file_name.strip_suffix(MULTIPART_SUFFIX)?;
    if digits.len() < 5 || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|part_number| *part_number > 0)
}

pub fn part_path(object: &str, part_number: i32) -> String {
    format!("{object}/{}", part_file_name(part_number))
}

pub fn meta_path(object: &str) -> String {
    format!("{object}/{MULTIPART_META_FILE}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartPartInfo {
    pub part_number: i32,
    pub etag: String,
    pub size: i64,
}

/// Descriptor of an object stored as an ordered set of part files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartObjectInfo {
    pub size: i64,
    pub mod_time: DateTime<Utc>,
    pub md5_sum: String,
    pub parts: Vec<MultipartPartInfo>,
}

/// Byte window of one part file that a read from a given offset must cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    pub part_number: i32,
    pub offset: u64,
    pub length: u64,
}

/// Ranges of the remaining parts, in order, for a read starting mid-object.
#[derive(Debug, Clone)]
pub struct PartRanges {
    parts: std::vec::IntoIter<MultipartPartInfo>,
    offset: i64,
}

impl Iterator for PartRanges {
    type Item = PartRange;

    fn next(&mut self) -> Option<Self::Item> {
        let part = self.parts.next()?;
        // Only the first part starts at a non-zero offset.
        let offset = std::mem::take(&mut self.offset);
        Some(PartRange {
            part_number: part.part_number,
            offset: offset as u64,
            length: (part.size - offset) as u64,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.parts.size_hint()
    }
}

impl MultipartObjectInfo {
    /// Maps an object byte offset to `(part index, offset inside that part)`.
    /// An offset equal to the object size yields `(parts.len(), 0)`.
    pub fn part_offset(&self, offset: i64) -> Result<(usize, i64)> {
        if offset < 0 || offset > self.size {
            return Err(XlError::InvalidRange {
                offset,
                size: self.size,
            });
        }

        let mut remaining = offset;
        for (index, part) in self.parts.iter().enumerate() {
            if remaining < part.size {
                return Ok((index, remaining));
            }
            remaining -= part.size;
        }

        if remaining == 0 {
            return Ok((self.parts.len(), 0));
        }
        Err(XlError::MalformedDescriptor(format!(
            "parts cover fewer than {} bytes",
            self.size
        )))
    }

    pub fn part_ranges(&self, offset: i64) -> Result<PartRanges> {
        let (index, residual) = self.part_offset(offset)?;
        Ok(PartRanges {
            parts: self.parts[index..].to_vec().into_iter(),
            offset: residual,
        })
    }

    fn check(&self) -> std::result::Result<(), String> {
        let mut previous = 0;
        let mut total = 0_i64;
        for part in &self.parts {
            if part.part_number <= previous {
                return Err(format!("part {} is out of order", part.part_number));
            }
            if part.size < 0 {
                return Err(format!("part {} has negative size", part.part_number));
            }
            previous = part.part_number;
            total = total.saturating_add(part.size);
        }
        if total != self.size {
            return Err(format!(
                "parts total {total} bytes but object size is {}",
                self.size
            ));
        }
        Ok(())
    }
}

/// An object is multipart when its descriptor file exists.
pub async fn is_multipart_object(
    storage: &dyn StorageApi,
    bucket: &str,
    object: &str,
) -> StorageResult<bool> {
    match storage.stat_file(bucket, &meta_path(object)).await {
        Ok(info) => Ok(!info.is_dir),
        Err(StorageError::FileNotFound) => Ok(false),
        Err(err) => Err(err),
    }
}

pub async fn load_multipart_info(
    storage: &dyn StorageApi,
    bucket: &str,
    object: &str,
) -> Result<MultipartObjectInfo> {
    let bytes = read_all_file(storage, bucket, &meta_path(object))
        .await
        .map_err(|err| to_object_err(err, bucket, object))?;
    let info: MultipartObjectInfo = serde_json::from_slice(&bytes).map_err(|err| {
        XlError::MalformedDescriptor(format!("{bucket}/{object}: {err}"))
    })?;
    info.check()
        .map_err(|reason| XlError::MalformedDescriptor(format!("{bucket}/{object}: {reason}")))?;
    Ok(info)
}

/// Stages the descriptor in the meta volume and renames it into place.
pub async fn save_multipart_info(
    storage: &dyn StorageApi,
    bucket: &str,
    object: &str,
    info: &MultipartObjectInfo,
) -> Result<()> {
    let bytes = serde_json::to_vec(info).map_err(|err| {
        XlError::InternalError(format!("failed to serialize descriptor for {bucket}/{object}: {err}"))
    })?;

    let tmp_path = format!("{TMP_PREFIX}/{}/{bucket}/{}", Uuid::new_v4(), meta_path(object));
    write_all_file(storage, META_BUCKET, &tmp_path, &bytes)
        .await
        .map_err(|err| to_object_err(err, bucket, object))?;

    if let Err(err) = storage
        .rename_file(META_BUCKET, &tmp_path, bucket, &meta_path(object))
        .await
    {
        return match storage.delete_file(META_BUCKET, &tmp_path).await {
            Ok(()) | Err(StorageError::FileNotFound) => Err(to_object_err(err, bucket, object)),
            Err(cleanup_err) => {
                error!(
                    bucket,
                    object,
                    tmp_path,
                    error = %err,
                    cleanup_error = %cleanup_err,
                    "failed to remove staged descriptor after failed rename"
                );
                Err(to_object_err(cleanup_err, META_BUCKET, &tmp_path))
            }
        };
    }
    Ok(())
}

/// Builds and saves the descriptor for part files already stored under
/// `object`. The etag is the md5 of the concatenated binary part md5s,
/// suffixed with the part count.
pub async fn complete_multipart_object(
    storage: &dyn StorageApi,
    bucket: &str,
    object: &str,
    part_numbers: &[i32],
) -> Result<MultipartObjectInfo> {
    if part_numbers.is_empty() {
        return Err(XlError::InvalidPart(0));
    }

    let mut previous = 0;
    let mut parts = Vec::with_capacity(part_numbers.len());
    let mut hasher = Md5::new();
    for &part_number in part_numbers {
        if part_number <= previous {
            return Err(XlError::InvalidPart(part_number));
        }
        previous = part_number;

        let path = part_path(object, part_number);
        let file = match storage.stat_file(bucket, &path).await {
            Ok(file) if !file.is_dir => file,
            Ok(_) | Err(StorageError::FileNotFound) => {
                return Err(XlError::InvalidPart(part_number));
            }
            Err(err) => return Err(to_object_err(err, bucket, &path)),
        };

        let digest = hex::decode(&file.md5_sum).map_err(|err| {
            XlError::InternalError(format!("bad md5 {:?} for {bucket}/{path}: {err}", file.md5_sum))
        })?;
        hasher.update(&digest);
        parts.push(MultipartPartInfo {
            part_number,
            etag: file.md5_sum,
            size: file.size,
        });
    }

    let info = MultipartObjectInfo {
        size: parts.iter().map(|part| part.size).sum(),
        mod_time: Utc::now(),
        md5_sum: format!("{}-{}", hex::encode(hasher.finalize()), parts.len()),
        parts,
    };
    save_multipart_info(storage, bucket, object, &info).await?;
    debug!(bucket, object, parts = info.parts.len(), size = info.size, "completed multipart object");
    Ok(info)
}
