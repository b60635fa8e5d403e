use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::future::join_all;
use tracing::warn;

use crate::datatypes::{FileInfo, VolInfo};
use crate::errors::{StorageError, StorageResult, reduce_errors};
use crate::traits::{FileReader, FileWriter, StorageApi};
use crate::xl::posix::PosixDisk;

/// Ordered disk set that mirrors every file on each disk. Mutations need a
/// write quorum of `n/2 + 1` disks; reads are served by the first disk that
/// answers.
#[derive(Debug, Clone)]
pub struct XlStorage {
    disks: Vec<PosixDisk>,
}

struct XlFileWriter {
    writers: Vec<Option<Box<dyn FileWriter>>>,
    write_quorum: usize,
}

impl XlFileWriter {
    fn live(&self) -> usize {
        self.writers.iter().filter(|writer| writer.is_some()).count()
    }
}

#[async_trait]
impl FileWriter for XlFileWriter {
    async fn write_all(&mut self, buf: &[u8]) -> StorageResult<()> {
        for (disk_idx, slot) in self.writers.iter_mut().enumerate() {
            let Some(writer) = slot else {
                continue;
            };
            let result = writer.write_all(buf).await;
            if let Err(err) = result {
                warn!(disk_idx, error = %err, "dropping disk from write");
                *slot = None;
            }
        }

        if self.live() < self.write_quorum {
            return Err(StorageError::WriteQuorum);
        }
        Ok(())
    }

    async fn close(&mut self) -> StorageResult<()> {
        for (disk_idx, slot) in self.writers.iter_mut().enumerate() {
            let Some(writer) = slot else {
                continue;
            };
            let result = writer.close().await;
            if let Err(err) = result {
                warn!(disk_idx, error = %err, "failed to close file on disk");
                *slot = None;
            }
        }

        if self.live() < self.write_quorum {
            return Err(StorageError::WriteQuorum);
        }
        Ok(())
    }
}

impl XlStorage {
    pub async fn new(disk_paths: Vec<PathBuf>) -> StorageResult<Self> {
        if disk_paths.is_empty() {
            return Err(StorageError::DiskNotFound);
        }

        let mut disks = Vec::with_capacity(disk_paths.len());
        for path in disk_paths {
            disks.push(PosixDisk::new(path).await?);
        }

        Ok(Self { disks })
    }

    pub fn disk_count(&self) -> usize {
        self.disks.len()
    }

    pub fn disk_path(&self, index: usize) -> Option<&Path> {
        self.disks.get(index).map(PosixDisk::root)
    }

    pub fn read_quorum(&self) -> usize {
        (self.disks.len() / 2).max(1)
    }

    pub fn write_quorum(&self) -> usize {
        self.disks.len() / 2 + 1
    }

    fn read_error(&self, errors: Vec<StorageError>) -> StorageError {
        reduce_errors(errors, self.read_quorum(), StorageError::ReadQuorum)
    }

    fn reduce_write(&self, results: Vec<StorageResult<()>>) -> StorageResult<()> {
        let successes = results.iter().filter(|result| result.is_ok()).count();
        if successes >= self.write_quorum() {
            return Ok(());
        }

        let errors = results.into_iter().filter_map(Result::err).collect();
        Err(reduce_errors(
            errors,
            self.write_quorum(),
            StorageError::WriteQuorum,
        ))
    }
}

#[async_trait]
impl StorageApi for XlStorage {
    async fn make_vol(&self, volume: &str) -> StorageResult<()> {
        let results = join_all(self.disks.iter().map(|disk| disk.make_vol(volume))).await;
        self.reduce_write(results)
    }

    async fn list_vols(&self) -> StorageResult<Vec<VolInfo>> {
        let mut errors = Vec::new();
        for disk in &self.disks {
            match disk.list_vols().await {
                Ok(volumes) => return Ok(volumes),
                Err(err) => errors.push(err),
            }
        }
        Err(self.read_error(errors))
    }

    async fn stat_vol(&self, volume: &str) -> StorageResult<VolInfo> {
        let mut errors = Vec::new();
        for disk in &self.disks {
            match disk.stat_vol(volume).await {
                Ok(info) => return Ok(info),
                Err(err) => errors.push(err),
            }
        }
        Err(self.read_error(errors))
    }

    async fn delete_vol(&self, volume: &str) -> StorageResult<()> {
        let results = join_all(self.disks.iter().map(|disk| disk.delete_vol(volume))).await;
        self.reduce_write(results)
    }

    async fn list_dir(&self, volume: &str, dir_path: &str) -> StorageResult<Vec<String>> {
        let mut errors = Vec::new();
        for disk in &self.disks {
            match disk.list_dir(volume, dir_path).await {
                Ok(entries) => return Ok(entries),
                Err(err) => errors.push(err),
            }
        }
        Err(self.read_error(errors))
    }

    async fn create_file(&self, volume: &str, path: &str) -> StorageResult<Box<dyn FileWriter>> {
        let results = join_all(self.disks.iter().map(|disk| disk.create_file(volume, path))).await;

        let mut writers = Vec::with_capacity(results.len());
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(writer) => writers.push(Some(writer)),
                Err(err) => {
                    writers.push(None);
                    errors.push(err);
                }
            }
        }

        let writer = XlFileWriter {
            writers,
            write_quorum: self.write_quorum(),
        };
        if writer.live() < writer.write_quorum {
            return Err(reduce_errors(
                errors,
                self.write_quorum(),
                StorageError::WriteQuorum,
            ));
        }

        Ok(Box::new(writer))
    }

    async fn read_file(&self, volume: &str, path: &str, offset: u64) -> StorageResult<FileReader> {
        let mut errors = Vec::new();
        for disk in &self.disks {
            match disk.read_file(volume, path, offset).await {
                Ok(reader) => return Ok(reader),
                Err(err) => errors.push(err),
            }
        }
        Err(self.read_error(errors))
    }

    async fn stat_file(&self, volume: &str, path: &str) -> StorageResult<FileInfo> {
        let mut errors = Vec::new();
        for disk in &self.disks {
            match disk.stat_file(volume, path).await {
                Ok(info) => return Ok(info),
                Err(err) => errors.push(err),
            }
        }
        Err(self.read_error(errors))
    }

    async fn rename_file(
        &self,
        src_volume: &str,
        src_path: &str,
        dst_volume: &str,
        dst_path: &str,
    ) -> StorageResult<()> {
        let results = join_all(
            self.disks
                .iter()
                .map(|disk| disk.rename_file(src_volume, src_path, dst_volume, dst_path)),
        )
        .await;
        self.reduce_write(results)
    }

    async fn delete_file(&self, volume: &str, path: &str) -> StorageResult<()> {
        let results = join_all(self.disks.iter().map(|disk| disk.delete_file(volume, path))).await;
        self.reduce_write(results)
    }
}
