use tokio::io::AsyncReadExt;

use crate::errors::{StorageError, StorageResult};
use crate::traits::StorageApi;

pub async fn read_all_file(
    storage: &dyn StorageApi,
    volume: &str,
    path: &str,
) -> StorageResult<Vec<u8>> {
    let mut reader = storage.read_file(volume, path, 0).await?;
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await.map_err(StorageError::Io)?;
    Ok(buf)
}

/// Writes `data` to `volume/path` in one shot, removing the file if the
/// write does not complete. A failed removal is returned in place of the
/// write error.
pub async fn write_all_file(
    storage: &dyn StorageApi,
    volume: &str,
    path: &str,
    data: &[u8],
) -> StorageResult<()> {
    let mut writer = storage.create_file(volume, path).await?;
    let written = match writer.write_all(data).await {
        Ok(()) => writer.close().await,
        Err(err) => Err(err),
    };
    drop(writer);

    if let Err(err) = written {
        return match storage.delete_file(volume, path).await {
            Ok(()) | Err(StorageError::FileNotFound) => Err(err),
            Err(cleanup_err) => {
                tracing::error!(
                    volume,
                    path,
                    error = %err,
                    cleanup_error = %cleanup_err,
                    "failed to remove partial file"
                );
                Err(cleanup_err)
            }
        };
    }

    Ok(())
}
