use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::datatypes::{FileInfo, VolInfo};
use crate::errors::{StorageError, StorageResult};
use crate::memory::MemoryStorage;
use crate::traits::{FileReader, FileWriter, StorageApi};

/// Which backend failure to simulate for a faulted path.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Fault {
    Io,
    ReadQuorum,
    WriteQuorum,
}

impl Fault {
    fn to_error(self) -> StorageError {
        match self {
            Self::Io => StorageError::Io(std::io::Error::other("injected fault")),
            Self::ReadQuorum => StorageError::ReadQuorum,
            Self::WriteQuorum => StorageError::WriteQuorum,
        }
    }
}

/// Wraps [`MemoryStorage`] and fails selected operations on selected paths.
#[derive(Debug, Default)]
pub(crate) struct FaultyStorage {
    pub(crate) inner: MemoryStorage,
    delete_faults: Mutex<HashSet<String>>,
    read_faults: Mutex<HashSet<String>>,
    rename_faults: Mutex<HashSet<String>>,
    delete_prefix_faults: Mutex<Vec<(String, Fault)>>,
    fault: Mutex<Option<Fault>>,
}

impl FaultyStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_fault(&self, fault: Fault) {
        *self.fault.lock().unwrap() = Some(fault);
    }

    pub(crate) fn fail_delete(&self, path: &str) {
        self.delete_faults.lock().unwrap().insert(path.to_string());
    }

    /// Fails deletes of every path under `prefix` with `fault`, regardless of
    /// the fault set by [`FaultyStorage::set_fault`].
    pub(crate) fn fail_delete_under(&self, prefix: &str, fault: Fault) {
        self.delete_prefix_faults
            .lock()
            .unwrap()
            .push((prefix.to_string(), fault));
    }

    pub(crate) fn fail_read(&self, path: &str) {
        self.read_faults.lock().unwrap().insert(path.to_string());
    }

    pub(crate) fn fail_rename_to(&self, path: &str) {
        self.rename_faults.lock().unwrap().insert(path.to_string());
    }

    pub(crate) fn clear(&self) {
        self.delete_faults.lock().unwrap().clear();
        self.read_faults.lock().unwrap().clear();
        self.rename_faults.lock().unwrap().clear();
        self.delete_prefix_faults.lock().unwrap().clear();
    }

    fn check(&self, set: &Mutex<HashSet<String>>, path: &str) -> StorageResult<()> {
        if set.lock().unwrap().contains(path) {
            let fault = (*self.fault.lock().unwrap()).unwrap_or(Fault::Io);
            return Err(fault.to_error());
        }
        Ok(())
    }
}

#[async_trait]
impl StorageApi for FaultyStorage {
    async fn make_vol(&self, volume: &str) -> StorageResult<()> {
        self.inner.make_vol(volume).await
    }

    async fn list_vols(&self) -> StorageResult<Vec<VolInfo>> {
        self.inner.list_vols().await
    }

    async fn stat_vol(&self, volume: &str) -> StorageResult<VolInfo> {
        self.inner.stat_vol(volume).await
    }

    async fn delete_vol(&self, volume: &str) -> StorageResult<()> {
        self.inner.delete_vol(volume).await
    }

    async fn list_dir(&self, volume: &str, dir_path: &str) -> StorageResult<Vec<String>> {
        self.inner.list_dir(volume, dir_path).await
    }

    async fn create_file(&self, volume: &str, path: &str) -> StorageResult<Box<dyn FileWriter>> {
        self.inner.create_file(volume, path).await
    }

    async fn read_file(&self, volume: &str, path: &str, offset: u64) -> StorageResult<FileReader> {
        self.check(&self.read_faults, path)?;
        self.inner.read_file(volume, path, offset).await
    }

    async fn stat_file(&self, volume: &str, path: &str) -> StorageResult<FileInfo> {
        self.inner.stat_file(volume, path).await
    }

    async fn rename_file(
        &self,
        src_volume: &str,
        src_path: &str,
        dst_volume: &str,
        dst_path: &str,
    ) -> StorageResult<()> {
        self.check(&self.rename_faults, dst_path)?;
        self.inner
            .rename_file(src_volume, src_path, dst_volume, dst_path)
            .await
    }

    async fn delete_file(&self, volume: &str, path: &str) -> StorageResult<()> {
        self.check(&self.delete_faults, path)?;
        let prefix_fault = self
            .delete_prefix_faults
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, fault)| *fault);
        if let Some(fault) = prefix_fault {
            return Err(fault.to_error());
        }
        self.inner.delete_file(volume, path).await
    }
}
