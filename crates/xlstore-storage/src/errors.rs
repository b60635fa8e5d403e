use std::mem::discriminant;

use thiserror::Error;
use xlstore_common::error::XlError;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Failures reported by a [`crate::traits::StorageApi`] implementation.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file not found")]
    FileNotFound,
    #[error("volume not found")]
    VolumeNotFound,
    #[error("volume already exists")]
    VolumeExists,
    #[error("volume is not empty")]
    VolumeNotEmpty,
    #[error("disk not found")]
    DiskNotFound,
    #[error("file access denied")]
    FileAccessDenied,
    #[error("volume access denied")]
    VolumeAccessDenied,
    #[error("read quorum not met")]
    ReadQuorum,
    #[error("write quorum not met")]
    WriteQuorum,
    #[error("not a regular file")]
    IsNotRegular,
    #[error("offset {offset} is beyond file size {size}")]
    InvalidOffset { offset: u64, size: u64 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FileNotFound)
    }

    pub(crate) fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory => Self::FileNotFound,
            std::io::ErrorKind::PermissionDenied => Self::FileAccessDenied,
            _ => Self::Io(err),
        }
    }
}

/// Picks the error reported by at least `quorum` disks, or `fallback` when no
/// single kind of failure reaches quorum.
pub(crate) fn reduce_errors(
    mut errors: Vec<StorageError>,
    quorum: usize,
    fallback: StorageError,
) -> StorageError {
    let mut best: Option<(usize, usize)> = None;
    for (idx, err) in errors.iter().enumerate() {
        let count = errors
            .iter()
            .filter(|other| discriminant(*other) == discriminant(err))
            .count();
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((idx, count));
        }
    }

    match best {
        Some((idx, count)) if count >= quorum => errors.swap_remove(idx),
        _ => fallback,
    }
}

/// Translates a storage failure into the caller-facing error for `bucket/object`.
pub fn to_object_err(err: StorageError, bucket: &str, object: &str) -> XlError {
    let path = if object.is_empty() {
        bucket.to_string()
    } else {
        format!("{bucket}/{object}")
    };

    match err {
        StorageError::VolumeNotFound => XlError::BucketNotFound(bucket.to_string()),
        StorageError::VolumeExists => XlError::BucketAlreadyExists(bucket.to_string()),
        StorageError::VolumeNotEmpty => XlError::BucketNotEmpty(bucket.to_string()),
        StorageError::FileNotFound if object.is_empty() => {
            XlError::BucketNotFound(bucket.to_string())
        }
        StorageError::FileNotFound => XlError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: object.to_string(),
        },
        StorageError::IsNotRegular => XlError::ObjectExistsAsPrefix {
            bucket: bucket.to_string(),
            key: object.to_string(),
        },
        StorageError::InvalidOffset { offset, size } => XlError::InvalidRange {
            offset: i64::try_from(offset).unwrap_or(i64::MAX),
            size: i64::try_from(size).unwrap_or(i64::MAX),
        },
        StorageError::ReadQuorum => XlError::InsufficientReadQuorum(path),
        StorageError::WriteQuorum => XlError::InsufficientWriteQuorum(path),
        StorageError::DiskNotFound => XlError::DiskNotFound(path),
        StorageError::FileAccessDenied | StorageError::VolumeAccessDenied => {
            XlError::AccessDenied(path)
        }
        StorageError::Io(err) => XlError::Io(err),
    }
}
