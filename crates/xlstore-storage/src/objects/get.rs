use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use xlstore_common::error::{Result, XlError};

use super::XlObjects;
use crate::errors::to_object_err;
use crate::multipart::{self, PartRanges, is_multipart_object, load_multipart_info};
use crate::traits::{ObjectReader, StorageApi};

/// Consumer half of the multipart read pipeline. Chunks arrive from a
/// producer task; dropping the reader stops the producer.
#[derive(Debug)]
pub struct PartStreamReader {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    chunk: Bytes,
}

impl PartStreamReader {
    fn new(rx: mpsc::Receiver<io::Result<Bytes>>) -> Self {
        Self {
            rx,
            chunk: Bytes::new(),
        }
    }
}

impl AsyncRead for PartStreamReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        while self.chunk.is_empty() {
            match ready!(self.rx.poll_recv(cx)) {
                Some(Ok(chunk)) => self.chunk = chunk,
                Some(Err(err)) => return Poll::Ready(Err(err)),
                None => return Poll::Ready(Ok(())),
            }
        }

        let n = buf.remaining().min(self.chunk.len());
        buf.put_slice(&self.chunk[..n]);
        self.chunk.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl XlObjects {
    pub(super) async fn get_object_inner(
        &self,
        bucket: &str,
        object: &str,
        start_offset: i64,
    ) -> Result<ObjectReader> {
        let multipart = is_multipart_object(self.storage.as_ref(), bucket, object)
            .await
            .map_err(|err| to_object_err(err, bucket, object))?;
        if multipart {
            return self.get_multipart(bucket, object, start_offset).await;
        }

        let file = self
            .storage
            .stat_file(bucket, object)
            .await
            .map_err(|err| to_object_err(err, bucket, object))?;
        if file.is_dir {
            return Err(XlError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: object.to_string(),
            });
        }
        if start_offset < 0 || start_offset > file.size {
            return Err(XlError::InvalidRange {
                offset: start_offset,
                size: file.size,
            });
        }

        self.storage
            .read_file(bucket, object, start_offset as u64)
            .await
            .map_err(|err| to_object_err(err, bucket, object))
    }

    async fn get_multipart(
        &self,
        bucket: &str,
        object: &str,
        start_offset: i64,
    ) -> Result<ObjectReader> {
        let info = load_multipart_info(self.storage.as_ref(), bucket, object).await?;
        let ranges = info.part_ranges(start_offset)?;

        let (tx, rx) = mpsc::channel(self.config.read_channel_capacity.max(1));
        tokio::spawn(stream_parts(
            Arc::clone(&self.storage),
            bucket.to_string(),
            object.to_string(),
            ranges,
            self.config.read_chunk_size.max(1),
            tx,
        ));

        Ok(Box::new(PartStreamReader::new(rx)))
    }
}

/// Producer half: opens each part only when the previous one is drained and
/// forwards its bytes. Any failure ends the stream with an error.
async fn stream_parts(
    storage: Arc<dyn StorageApi>,
    bucket: String,
    object: String,
    ranges: PartRanges,
    chunk_size: usize,
    tx: mpsc::Sender<io::Result<Bytes>>,
) {
    for range in ranges {
        let path = multipart::part_path(&object, range.part_number);
        let reader = match storage.read_file(&bucket, &path, range.offset).await {
            Ok(reader) => reader,
            Err(err) => {
                warn!(bucket, path, error = %err, "failed to open part for read");
                let err = io::Error::other(to_object_err(err, &bucket, &path));
                let _ = tx.send(Err(err)).await;
                return;
            }
        };

        let mut reader = reader.take(range.length);
        let mut sent = 0_u64;
        loop {
            let mut chunk = BytesMut::with_capacity(chunk_size);
            match reader.read_buf(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    sent += n as u64;
                    if tx.send(Ok(chunk.freeze())).await.is_err() {
                        debug!(bucket, object, "reader dropped, stopping part stream");
                        return;
                    }
                }
                Err(err) => {
                    warn!(bucket, path, error = %err, "failed to read part");
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            }
        }

        if sent < range.length {
            warn!(bucket, path, expected = range.length, read = sent, "part is shorter than its descriptor");
            let err = io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("part {path} ended after {sent} of {} bytes", range.length),
            );
            let _ = tx.send(Err(err)).await;
            return;
        }
    }
}
