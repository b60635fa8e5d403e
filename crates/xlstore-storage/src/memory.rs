use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use tokio::sync::RwLock;

use crate::datatypes::{FileInfo, VolInfo};
use crate::errors::{StorageError, StorageResult};
use crate::traits::{FileReader, FileWriter, StorageApi};

/// Storage backend kept entirely in memory. Directories are implied by the
/// `/`-separated file paths stored in each volume.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    volumes: Arc<RwLock<BTreeMap<String, MemVolume>>>,
}

#[derive(Debug)]
struct MemVolume {
    created: DateTime<Utc>,
    files: BTreeMap<String, StoredFile>,
}

#[derive(Debug, Clone)]
struct StoredFile {
    data: Bytes,
    mod_time: DateTime<Utc>,
    md5_sum: String,
}

impl MemVolume {
    fn is_dir(&self, path: &str) -> bool {
        let dir = format!("{}/", path.trim_end_matches('/'));
        self.files
            .range(dir.clone()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(&dir))
    }

    /// Rejects a write to `path` when it names a directory or sits below an
    /// existing file.
    fn check_writable(&self, path: &str) -> StorageResult<()> {
        if self.is_dir(path) {
            return Err(StorageError::IsNotRegular);
        }

        let mut ancestor = path;
        while let Some((parent, _)) = ancestor.rsplit_once('/') {
            if self.files.contains_key(parent) {
                return Err(StorageError::FileAccessDenied);
            }
            ancestor = parent;
        }

        Ok(())
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemoryWriter {
    storage: MemoryStorage,
    volume: String,
    path: String,
    buf: Vec<u8>,
    closed: bool,
}

#[async_trait]
impl FileWriter for MemoryWriter {
    async fn write_all(&mut self, buf: &[u8]) -> StorageResult<()> {
        if self.closed {
            return Err(StorageError::FileAccessDenied);
        }
        self.buf.extend_from_slice(buf);
        Ok(())
    }

    async fn close(&mut self) -> StorageResult<()> {
        if self.closed {
            return Ok(());
        }

        let data = Bytes::from(std::mem::take(&mut self.buf));
        let file = StoredFile {
            md5_sum: hex::encode(Md5::digest(&data)),
            data,
            mod_time: Utc::now(),
        };

        let mut volumes = self.storage.volumes.write().await;
        let volume = volumes
            .get_mut(&self.volume)
            .ok_or(StorageError::VolumeNotFound)?;
        volume.check_writable(&self.path)?;
        volume.files.insert(self.path.clone(), file);
        self.closed = true;
        Ok(())
    }
}

#[async_trait]
impl StorageApi for MemoryStorage {
    async fn make_vol(&self, volume: &str) -> StorageResult<()> {
        let mut volumes = self.volumes.write().await;
        if volumes.contains_key(volume) {
            return Err(StorageError::VolumeExists);
        }

        volumes.insert(
            volume.to_string(),
            MemVolume {
                created: Utc::now(),
                files: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn list_vols(&self) -> StorageResult<Vec<VolInfo>> {
        let volumes = self.volumes.read().await;
        Ok(volumes
            .iter()
            .map(|(name, volume)| VolInfo {
                name: name.clone(),
                created: volume.created,
            })
            .collect())
    }

    async fn stat_vol(&self, volume: &str) -> StorageResult<VolInfo> {
        let volumes = self.volumes.read().await;
        let vol = volumes.get(volume).ok_or(StorageError::VolumeNotFound)?;
        Ok(VolInfo {
            name: volume.to_string(),
            created: vol.created,
        })
    }

    async fn delete_vol(&self, volume: &str) -> StorageResult<()> {
        let mut volumes = self.volumes.write().await;
        let vol = volumes.get(volume).ok_or(StorageError::VolumeNotFound)?;
        if !vol.files.is_empty() {
            return Err(StorageError::VolumeNotEmpty);
        }
        volumes.remove(volume);
        Ok(())
    }

    async fn list_dir(&self, volume: &str, dir_path: &str) -> StorageResult<Vec<String>> {
        let volumes = self.volumes.read().await;
        let vol = volumes.get(volume).ok_or(StorageError::VolumeNotFound)?;

        let mut entries = BTreeSet::new();
        for key in vol.files.keys().filter(|key| key.starts_with(dir_path)) {
            let rest = &key[dir_path.len()..];
            match rest.find('/') {
                Some(idx) => entries.insert(rest[..=idx].to_string()),
                None => entries.insert(rest.to_string()),
            };
        }

        if entries.is_empty() && !dir_path.is_empty() {
            return Err(StorageError::FileNotFound);
        }
        Ok(entries.into_iter().collect())
    }

    async fn create_file(&self, volume: &str, path: &str) -> StorageResult<Box<dyn FileWriter>> {
        let volumes = self.volumes.read().await;
        let vol = volumes.get(volume).ok_or(StorageError::VolumeNotFound)?;
        vol.check_writable(path)?;

        Ok(Box::new(MemoryWriter {
            storage: self.clone(),
            volume: volume.to_string(),
            path: path.to_string(),
            buf: Vec::new(),
            closed: false,
        }))
    }

    async fn read_file(&self, volume: &str, path: &str, offset: u64) -> StorageResult<FileReader> {
        let volumes = self.volumes.read().await;
        let vol = volumes.get(volume).ok_or(StorageError::VolumeNotFound)?;
        let file = vol.files.get(path).ok_or(StorageError::FileNotFound)?;

        let size = file.data.len() as u64;
        if offset > size {
            return Err(StorageError::InvalidOffset { offset, size });
        }

        let start = usize::try_from(offset).map_err(|_| StorageError::InvalidOffset { offset, size })?;
        Ok(Box::new(Cursor::new(file.data.slice(start..))))
    }

    async fn stat_file(&self, volume: &str, path: &str) -> StorageResult<FileInfo> {
        let volumes = self.volumes.read().await;
        let vol = volumes.get(volume).ok_or(StorageError::VolumeNotFound)?;

        if let Some(file) = vol.files.get(path) {
            return Ok(FileInfo {
                volume: volume.to_string(),
                name: path.to_string(),
                size: file.data.len() as i64,
                mod_time: file.mod_time,
                md5_sum: file.md5_sum.clone(),
                is_dir: false,
            });
        }

        if vol.is_dir(path) {
            return Ok(FileInfo {
                volume: volume.to_string(),
                name: path.to_string(),
                size: 0,
                mod_time: vol.created,
                md5_sum: String::new(),
                is_dir: true,
            });
        }

        Err(StorageError::FileNotFound)
    }

    async fn rename_file(
        &self,
        src_volume: &str,
        src_path: &str,
        dst_volume: &str,
        dst_path: &str,
    ) -> StorageResult<()> {
        let mut volumes = self.volumes.write().await;
        if !volumes.contains_key(src_volume) || !volumes.contains_key(dst_volume) {
            return Err(StorageError::VolumeNotFound);
        }

        let src_is_dir = src_path.ends_with('/');
        if src_is_dir != dst_path.ends_with('/') {
            return Err(StorageError::FileAccessDenied);
        }

        let moved: Vec<(String, StoredFile)> = {
            let src = volumes
                .get_mut(src_volume)
                .ok_or(StorageError::VolumeNotFound)?;
            if src_is_dir {
                let keys: Vec<String> = src
                    .files
                    .keys()
                    .filter(|key| key.starts_with(src_path))
                    .cloned()
                    .collect();
                keys.into_iter()
                    .filter_map(|key| {
                        let file = src.files.remove(&key)?;
                        Some((format!("{dst_path}{}", &key[src_path.len()..]), file))
                    })
                    .collect()
            } else {
                let file = src.files.remove(src_path).ok_or(StorageError::FileNotFound)?;
                vec![(dst_path.to_string(), file)]
            }
        };

        if moved.is_empty() {
            return Err(StorageError::FileNotFound);
        }

        let dst = volumes
            .get_mut(dst_volume)
            .ok_or(StorageError::VolumeNotFound)?;
        if !src_is_dir {
            if let Err(err) = dst.check_writable(dst_path) {
                // Put the source back untouched.
                let src = volumes
                    .get_mut(src_volume)
                    .ok_or(StorageError::VolumeNotFound)?;
                src.files.extend(moved);
                return Err(err);
            }
        }

        dst.files.extend(moved);
        Ok(())
    }

    async fn delete_file(&self, volume: &str, path: &str) -> StorageResult<()> {
        let mut volumes = self.volumes.write().await;
        let vol = volumes.get_mut(volume).ok_or(StorageError::VolumeNotFound)?;

        if vol.files.remove(path).is_some() {
            return Ok(());
        }
        if vol.is_dir(path) {
            return Err(StorageError::IsNotRegular);
        }
        Err(StorageError::FileNotFound)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::MemoryStorage;
    use crate::errors::StorageError;
    use crate::fileio::{read_all_file, write_all_file};
    use crate::traits::StorageApi;

    async fn storage_with(files: &[(&str, &str)]) -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage.make_vol("bucket").await.unwrap();
        for (path, data) in files {
            write_all_file(&storage, "bucket", path, data.as_bytes())
                .await
                .unwrap();
        }
        storage
    }

    #[tokio::test]
    async fn list_dir_marks_directories() {
        let storage = storage_with(&[("a/b/c", "1"), ("a/d", "2"), ("e", "3")]).await;

        assert_eq!(
            storage.list_dir("bucket", "").await.unwrap(),
            vec!["a/".to_string(), "e".to_string()]
        );
        assert_eq!(
            storage.list_dir("bucket", "a/").await.unwrap(),
            vec!["b/".to_string(), "d".to_string()]
        );
        assert!(matches!(
            storage.list_dir("bucket", "missing/").await,
            Err(StorageError::FileNotFound)
        ));
    }

    #[tokio::test]
    async fn read_from_offset_and_past_end() {
        let storage = storage_with(&[("obj", "hello world")]).await;

        let mut reader = storage.read_file("bucket", "obj", 6).await.unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "world");

        assert!(matches!(
            storage.read_file("bucket", "obj", 12).await,
            Err(StorageError::InvalidOffset { offset: 12, size: 11 })
        ));
    }

    #[tokio::test]
    async fn rename_directory_tree() {
        let storage = storage_with(&[("obj/part.1", "a"), ("obj/part.2", "b")]).await;
        storage.make_vol("shadow").await.unwrap();

        storage
            .rename_file("bucket", "obj/", "shadow", "x/obj/")
            .await
            .unwrap();

        assert!(matches!(
            storage.stat_file("bucket", "obj").await,
            Err(StorageError::FileNotFound)
        ));
        assert_eq!(
            read_all_file(&storage, "shadow", "x/obj/part.2").await.unwrap(),
            b"b"
        );
    }

    #[tokio::test]
    async fn rename_refuses_to_overwrite_directory() {
        let storage = storage_with(&[("obj/part.1", "a"), ("staged", "b")]).await;

        assert!(matches!(
            storage.rename_file("bucket", "staged", "bucket", "obj").await,
            Err(StorageError::IsNotRegular)
        ));
        assert_eq!(read_all_file(&storage, "bucket", "staged").await.unwrap(), b"b");
    }

    #[tokio::test]
    async fn stat_reports_implied_directories() {
        let storage = storage_with(&[("dir/file", "data")]).await;

        let dir = storage.stat_file("bucket", "dir").await.unwrap();
        assert!(dir.is_dir);

        let file = storage.stat_file("bucket", "dir/file").await.unwrap();
        assert!(!file.is_dir);
        assert_eq!(file.size, 4);
        assert_eq!(file.md5_sum, "8d777f385d3dfec8815d20f7496026dc");
    }
}
