use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};
use xlstore_common::error::{Result, XlError};

use crate::errors::{StorageError, to_object_err};
use crate::fileio::{read_all_file, write_all_file};
use crate::traits::StorageApi;
use crate::{META_BUCKET, TMP_PREFIX};

pub const FORMAT_CONFIG_FILE: &str = "format.json";
pub const FORMAT_VERSION: &str = "1";

/// Disk set descriptor persisted as `format.json` in the meta volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatXl {
    pub version: String,
    pub disks: Vec<String>,
}

/// Outcome of comparing a persisted [`FormatXl`] with the runtime disk list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatCheck {
    Valid,
    UnsupportedVersion(String),
    DiskCountMismatch { expected: usize, got: usize },
    DiskOrderMismatch { expected: Vec<String>, got: Vec<String> },
}

impl FormatCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl fmt::Display for FormatCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => write!(f, "format is valid"),
            Self::UnsupportedVersion(version) => {
                write!(f, "unsupported backend format version {version:?}")
            }
            Self::DiskCountMismatch { expected, got } => write!(
                f,
                "number of disks {got} does not match the backend format {expected}"
            ),
            Self::DiskOrderMismatch { expected, got } => write!(
                f,
                "invalid order of disks {got:?}, required order is {expected:?}"
            ),
        }
    }
}

impl FormatXl {
    pub fn new(disks: &[String]) -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            disks: disks.to_vec(),
        }
    }

    /// Disks must match positionally; a reordered set is rejected.
    pub fn validate(&self, disks: &[String]) -> FormatCheck {
        if self.version != FORMAT_VERSION {
            return FormatCheck::UnsupportedVersion(self.version.clone());
        }
        if self.disks.len() != disks.len() {
            return FormatCheck::DiskCountMismatch {
                expected: self.disks.len(),
                got: disks.len(),
            };
        }
        if self.disks.iter().zip(disks).any(|(saved, given)| saved != given) {
            return FormatCheck::DiskOrderMismatch {
                expected: self.disks.clone(),
                got: disks.to_vec(),
            };
        }
        FormatCheck::Valid
    }
}

pub async fn load_format(storage: &dyn StorageApi) -> std::result::Result<FormatXl, FormatLoadError> {
    let bytes = read_all_file(storage, META_BUCKET, FORMAT_CONFIG_FILE)
        .await
        .map_err(FormatLoadError::Storage)?;
    serde_json::from_slice(&bytes).map_err(|err| {
        FormatLoadError::Malformed(XlError::MalformedDescriptor(format!(
            "failed to parse {FORMAT_CONFIG_FILE}: {err}"
        )))
    })
}

pub async fn save_format(storage: &dyn StorageApi, format: &FormatXl) -> Result<()> {
    let bytes = serde_json::to_vec(format).map_err(|err| {
        XlError::InternalError(format!("failed to serialize {FORMAT_CONFIG_FILE}: {err}"))
    })?;
    write_all_file(storage, META_BUCKET, FORMAT_CONFIG_FILE, &bytes)
        .await
        .map_err(|err| to_object_err(err, META_BUCKET, FORMAT_CONFIG_FILE))
}

#[derive(Debug, Error)]
pub enum FormatLoadError {
    #[error("failed to read format.json: {0}")]
    Storage(StorageError),
    #[error(transparent)]
    Malformed(XlError),
}

/// Loads the disk set descriptor, writing a fresh one on first start, and
/// rejects a runtime disk list that disagrees with it.
pub async fn initialize(storage: &dyn StorageApi, disks: &[String]) -> Result<FormatXl> {
    init_meta_volume(storage, disks).await?;

    let format = match load_format(storage).await {
        Ok(format) => format,
        Err(FormatLoadError::Storage(StorageError::FileNotFound)) => {
            let format = FormatXl::new(disks);
            save_format(storage, &format).await.inspect_err(|err| {
                error!(error = %err, "failed to save backend format");
            })?;
            info!(?disks, "initialized new backend format");
            format
        }
        Err(FormatLoadError::Storage(err)) => {
            error!(error = %err, "unable to check backend format");
            return Err(bootstrap_error(err, disks));
        }
        Err(FormatLoadError::Malformed(err)) => return Err(err),
    };

    match format.validate(disks) {
        FormatCheck::Valid => Ok(format),
        check => {
            error!(reason = %check, "backend format validation failed");
            Err(XlError::InvalidFormat(format!(
                "command-line disks {disks:?} are not valid: {check}"
            )))
        }
    }
}

/// Creates the meta volume and clears staged files left by an earlier run.
async fn init_meta_volume(storage: &dyn StorageApi, disks: &[String]) -> Result<()> {
    match storage.make_vol(META_BUCKET).await {
        Ok(()) | Err(StorageError::VolumeExists) => {}
        Err(err) => return Err(bootstrap_error(err, disks)),
    }

    let tmp_dir = format!("{TMP_PREFIX}/");
    let mut dirs = vec![tmp_dir];
    let mut removed = 0_usize;
    while let Some(dir) = dirs.pop() {
        let entries = match storage.list_dir(META_BUCKET, &dir).await {
            Ok(entries) => entries,
            Err(StorageError::FileNotFound) => continue,
            Err(err) => return Err(bootstrap_error(err, disks)),
        };
        for entry in entries {
            let path = format!("{dir}{entry}");
            if path.ends_with('/') {
                dirs.push(path);
                continue;
            }
            match storage.delete_file(META_BUCKET, &path).await {
                Ok(()) | Err(StorageError::FileNotFound) => removed += 1,
                Err(err) => {
                    warn!(path, error = %err, "failed to remove stale staged file");
                }
            }
        }
    }

    if removed > 0 {
        info!(removed, "removed stale staged files");
    }
    Ok(())
}

fn bootstrap_error(err: StorageError, disks: &[String]) -> XlError {
    match err {
        StorageError::ReadQuorum | StorageError::WriteQuorum => XlError::InsufficientReadQuorum(
            format!("not all disks {disks:?} are available"),
        ),
        StorageError::DiskNotFound => XlError::DiskNotFound(format!("{disks:?}")),
        StorageError::VolumeAccessDenied | StorageError::FileAccessDenied => {
            XlError::DiskAccessDenied(format!("{disks:?}"))
        }
        err => to_object_err(err, META_BUCKET, FORMAT_CONFIG_FILE),
    }
}
