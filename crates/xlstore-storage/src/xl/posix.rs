use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::datatypes::{FileInfo, VolInfo};
use crate::errors::{StorageError, StorageResult};
use crate::traits::{FileReader, FileWriter, StorageApi};

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Suffix of the file recording a data file's md5, kept next to it and
/// hidden from `list_dir`. Object names may not end with it.
pub const CHECKSUM_SUFFIX: &str = ".xlstore.md5";

/// One disk of the set: a root directory holding one sub-directory per volume.
#[derive(Debug, Clone)]
pub struct PosixDisk {
    root: PathBuf,
}

struct PosixWriter {
    file: fs::File,
    hasher: Md5,
    checksum_path: PathBuf,
}

#[async_trait]
impl FileWriter for PosixWriter {
    async fn write_all(&mut self, buf: &[u8]) -> StorageResult<()> {
        self.file.write_all(buf).await.map_err(StorageError::from_io)?;
        self.hasher.update(buf);
        Ok(())
    }

    async fn close(&mut self) -> StorageResult<()> {
        self.file.flush().await.map_err(StorageError::from_io)?;
        self.file.sync_all().await.map_err(StorageError::from_io)?;

        let md5_sum = hex::encode(std::mem::take(&mut self.hasher).finalize());
        fs::write(&self.checksum_path, md5_sum)
            .await
            .map_err(StorageError::from_io)
    }
}

impl PosixDisk {
    pub async fn new(root: PathBuf) -> StorageResult<Self> {
        fs::create_dir_all(&root).await.map_err(StorageError::from_io)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn check_disk(&self) -> StorageResult<()> {
        match fs::metadata(&self.root).await {
            Ok(metadata) if metadata.is_dir() => Ok(()),
            Ok(_) => Err(StorageError::DiskNotFound),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(StorageError::DiskNotFound),
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(StorageError::VolumeAccessDenied)
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    async fn volume_dir(&self, volume: &str) -> StorageResult<PathBuf> {
        self.check_disk().await?;
        let dir = self.root.join(volume);
        match fs::metadata(&dir).await {
            Ok(metadata) if metadata.is_dir() => Ok(dir),
            Ok(_) => Err(StorageError::VolumeNotFound),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(StorageError::VolumeNotFound),
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(StorageError::VolumeAccessDenied)
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }
}

#[async_trait]
impl StorageApi for PosixDisk {
    async fn make_vol(&self, volume: &str) -> StorageResult<()> {
        self.check_disk().await?;
        let dir = self.root.join(volume);
        match fs::metadata(&dir).await {
            Ok(_) => return Err(StorageError::VolumeExists),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(StorageError::from_io(err)),
        }
        fs::create_dir_all(dir).await.map_err(StorageError::from_io)
    }

    async fn list_vols(&self) -> StorageResult<Vec<VolInfo>> {
        self.check_disk().await?;
        let mut entries = fs::read_dir(&self.root).await.map_err(StorageError::from_io)?;
        let mut volumes = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(StorageError::from_io)? {
            let metadata = entry.metadata().await.map_err(StorageError::from_io)?;
            if !metadata.is_dir() {
                continue;
            }
            volumes.push(VolInfo {
                name: entry.file_name().to_string_lossy().to_string(),
                created: created_time(&metadata),
            });
        }

        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(volumes)
    }

    async fn stat_vol(&self, volume: &str) -> StorageResult<VolInfo> {
        let dir = self.volume_dir(volume).await?;
        let metadata = fs::metadata(dir).await.map_err(StorageError::from_io)?;
        Ok(VolInfo {
            name: volume.to_string(),
            created: created_time(&metadata),
        })
    }

    async fn delete_vol(&self, volume: &str) -> StorageResult<()> {
        let dir = self.volume_dir(volume).await?;
        let mut entries = fs::read_dir(&dir).await.map_err(StorageError::from_io)?;
        if entries
            .next_entry()
            .await
            .map_err(StorageError::from_io)?
            .is_some()
        {
            return Err(StorageError::VolumeNotEmpty);
        }
        fs::remove_dir(dir).await.map_err(StorageError::from_io)
    }

    async fn list_dir(&self, volume: &str, dir_path: &str) -> StorageResult<Vec<String>> {
        let dir = self.volume_dir(volume).await?.join(dir_path);
        let mut entries = fs::read_dir(&dir).await.map_err(StorageError::from_io)?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(StorageError::from_io)? {
            let mut name = entry.file_name().to_string_lossy().to_string();
            if entry
                .file_type()
                .await
                .map_err(StorageError::from_io)?
                .is_dir()
            {
                name.push('/');
            } else if name.ends_with(CHECKSUM_SUFFIX) {
                continue;
            }
            names.push(name);
        }

        names.sort();
        Ok(names)
    }

    async fn create_file(&self, volume: &str, path: &str) -> StorageResult<Box<dyn FileWriter>> {
        let file_path = self.volume_dir(volume).await?.join(path);
        if let Ok(metadata) = fs::metadata(&file_path).await {
            if metadata.is_dir() {
                return Err(StorageError::IsNotRegular);
            }
        }
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await.map_err(StorageError::from_io)?;
        }

        // A digest left from the previous contents must not outlive them.
        let checksum_path = checksum_path(&file_path);
        remove_if_exists(&checksum_path).await?;

        let file = fs::File::create(&file_path)
            .await
            .map_err(StorageError::from_io)?;
        Ok(Box::new(PosixWriter {
            file,
            hasher: Md5::new(),
            checksum_path,
        }))
    }

    async fn read_file(&self, volume: &str, path: &str, offset: u64) -> StorageResult<FileReader> {
        let file_path = self.volume_dir(volume).await?.join(path);
        let mut file = fs::File::open(&file_path)
            .await
            .map_err(StorageError::from_io)?;
        let metadata = file.metadata().await.map_err(StorageError::from_io)?;
        if metadata.is_dir() {
            return Err(StorageError::IsNotRegular);
        }

        let size = metadata.len();
        if offset > size {
            return Err(StorageError::InvalidOffset { offset, size });
        }
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(StorageError::from_io)?;
        }

        Ok(Box::new(file))
    }

    async fn stat_file(&self, volume: &str, path: &str) -> StorageResult<FileInfo> {
        let file_path = self.volume_dir(volume).await?.join(path);
        let metadata = fs::metadata(&file_path)
            .await
            .map_err(StorageError::from_io)?;
        let mod_time = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        if metadata.is_dir() {
            return Ok(FileInfo {
                volume: volume.to_string(),
                name: path.to_string(),
                size: 0,
                mod_time,
                md5_sum: String::new(),
                is_dir: true,
            });
        }

        Ok(FileInfo {
            volume: volume.to_string(),
            name: path.to_string(),
            size: i64::try_from(metadata.len()).unwrap_or(i64::MAX),
            mod_time,
            md5_sum: recorded_md5(&file_path).await?,
            is_dir: false,
        })
    }

    async fn rename_file(
        &self,
        src_volume: &str,
        src_path: &str,
        dst_volume: &str,
        dst_path: &str,
    ) -> StorageResult<()> {
        let src_volume_dir = self.volume_dir(src_volume).await?;
        let dst_volume_dir = self.volume_dir(dst_volume).await?;

        let src_is_dir = src_path.ends_with('/');
        if src_is_dir != dst_path.ends_with('/') {
            return Err(StorageError::FileAccessDenied);
        }

        let src = src_volume_dir.join(src_path.trim_end_matches('/'));
        let dst = dst_volume_dir.join(dst_path.trim_end_matches('/'));

        let src_metadata = fs::metadata(&src).await.map_err(StorageError::from_io)?;
        if src_metadata.is_dir() != src_is_dir {
            return Err(StorageError::IsNotRegular);
        }
        if !src_is_dir {
            if let Ok(metadata) = fs::metadata(&dst).await {
                if metadata.is_dir() {
                    return Err(StorageError::IsNotRegular);
                }
            }
        }

        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await.map_err(StorageError::from_io)?;
        }
        if src_is_dir {
            fs::rename(&src, &dst).await.map_err(StorageError::from_io)?;
        } else {
            // Until the digest follows the data, stat falls back to hashing.
            remove_if_exists(&checksum_path(&dst)).await?;
            fs::rename(&src, &dst).await.map_err(StorageError::from_io)?;
            match fs::rename(checksum_path(&src), checksum_path(&dst)).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(StorageError::from_io(err)),
            }
        }

        prune_empty_parents(&src, &src_volume_dir).await;
        Ok(())
    }

    async fn delete_file(&self, volume: &str, path: &str) -> StorageResult<()> {
        let volume_dir = self.volume_dir(volume).await?;
        let file_path = volume_dir.join(path);
        let metadata = fs::metadata(&file_path)
            .await
            .map_err(StorageError::from_io)?;
        if metadata.is_dir() {
            return Err(StorageError::IsNotRegular);
        }

        fs::remove_file(&file_path)
            .await
            .map_err(StorageError::from_io)?;
        remove_if_exists(&checksum_path(&file_path)).await?;
        prune_empty_parents(&file_path, &volume_dir).await;
        Ok(())
    }
}

/// Removes now-empty directories above `path`, stopping at the volume root or
/// at the first directory that still has entries.
async fn prune_empty_parents(path: &Path, volume_dir: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == volume_dir || !dir.starts_with(volume_dir) {
            break;
        }
        if fs::remove_dir(dir).await.is_err() {
            break;
        }
        current = dir.parent();
    }
}

fn checksum_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(CHECKSUM_SUFFIX);
    PathBuf::from(name)
}

async fn remove_if_exists(path: &Path) -> StorageResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StorageError::from_io(err)),
    }
}

/// The digest recorded when the file was written, or a fresh hash of the
/// data when none was recorded.
async fn recorded_md5(path: &Path) -> StorageResult<String> {
    match fs::read_to_string(checksum_path(path)).await {
        Ok(md5_sum) if is_md5_hex(md5_sum.trim()) => return Ok(md5_sum.trim().to_string()),
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(StorageError::from_io(err)),
    }
    md5_file(path).await
}

fn is_md5_hex(value: &str) -> bool {
    value.len() == 32 && value.bytes().all(|byte| byte.is_ascii_hexdigit())
}

async fn md5_file(path: &Path) -> StorageResult<String> {
    let mut file = fs::File::open(path).await.map_err(StorageError::from_io)?;
    let mut hasher = Md5::new();
    let mut buf = vec![0_u8; HASH_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).await.map_err(StorageError::from_io)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn created_time(metadata: &std::fs::Metadata) -> DateTime<Utc> {
    metadata
        .created()
        .or_else(|_| metadata.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::{CHECKSUM_SUFFIX, PosixDisk};
    use crate::fileio::write_all_file;
    use crate::traits::StorageApi;

    const HELLO_MD5: &str = "5eb63bbbe01eeed093cb22bb8f5acdc3";

    async fn disk() -> (tempfile::TempDir, PosixDisk) {
        let dir = tempfile::tempdir().unwrap();
        let disk = PosixDisk::new(dir.path().join("disk")).await.unwrap();
        disk.make_vol("bucket").await.unwrap();
        (dir, disk)
    }

    #[tokio::test]
    async fn stat_reports_digest_recorded_at_write() {
        let (_dir, disk) = disk().await;
        write_all_file(&disk, "bucket", "obj", b"hello world")
            .await
            .unwrap();

        let recorded =
            std::fs::read_to_string(disk.root().join(format!("bucket/obj{CHECKSUM_SUFFIX}")))
                .unwrap();
        assert_eq!(recorded, HELLO_MD5);

        // Rewritten behind the disk's back; stat must not rehash the data.
        std::fs::write(disk.root().join("bucket/obj"), b"HELLO WORLD").unwrap();
        let info = disk.stat_file("bucket", "obj").await.unwrap();
        assert_eq!(info.md5_sum, HELLO_MD5);
        assert_eq!(info.size, 11);
    }

    #[tokio::test]
    async fn digest_follows_rename_and_delete() {
        let (_dir, disk) = disk().await;
        disk.make_vol("meta").await.unwrap();
        write_all_file(&disk, "bucket", "obj", b"old").await.unwrap();
        write_all_file(&disk, "meta", "tmp/staged", b"hello world")
            .await
            .unwrap();

        disk.rename_file("meta", "tmp/staged", "bucket", "obj")
            .await
            .unwrap();

        assert_eq!(disk.list_dir("bucket", "").await.unwrap(), vec!["obj".to_string()]);
        assert!(disk.list_dir("meta", "").await.unwrap().is_empty());
        assert_eq!(disk.stat_file("bucket", "obj").await.unwrap().md5_sum, HELLO_MD5);

        disk.delete_file("bucket", "obj").await.unwrap();
        assert!(std::fs::read_dir(disk.root().join("bucket")).unwrap().next().is_none());
        disk.delete_vol("bucket").await.unwrap();
    }

    #[tokio::test]
    async fn unrecorded_file_is_hashed() {
        let (_dir, disk) = disk().await;
        std::fs::write(disk.root().join("bucket/external"), b"hello world").unwrap();

        assert_eq!(disk.stat_file("bucket", "external").await.unwrap().md5_sum, HELLO_MD5);
    }
}
