use std::sync::Arc;

use tracing::debug;
use xlstore_common::error::Result;

use super::{ListParams, XlObjects};
use crate::errors::{StorageError, to_object_err};
use crate::multipart::{MULTIPART_SUFFIX, is_multipart_object};
use crate::traits::{ListObjectsInfo, StorageApi};

const DEFAULT_MAX_KEYS: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkEntry {
    Object(String),
    /// Common prefix, ending in `/`; only produced by non-recursive walks.
    Prefix(String),
}

impl WalkEntry {
    pub fn key(&self) -> &str {
        match self {
            Self::Object(key) | Self::Prefix(key) => key,
        }
    }
}

/// Pull-based depth-first walk over `list_dir`, yielding keys under `prefix`
/// in lexicographic order and strictly after `marker`. A multipart object
/// directory is yielded as a single object.
#[derive(Debug)]
pub struct TreeWalker {
    storage: Arc<dyn StorageApi>,
    bucket: String,
    prefix: String,
    marker: String,
    recursive: bool,
    /// Pending keys, smallest on top. Directory keys end with `/`.
    stack: Vec<String>,
    peeked: Option<WalkEntry>,
    started: bool,
}

impl TreeWalker {
    pub fn new(
        storage: Arc<dyn StorageApi>,
        bucket: &str,
        prefix: &str,
        marker: &str,
        recursive: bool,
    ) -> Self {
        Self {
            storage,
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            marker: marker.to_string(),
            recursive,
            stack: Vec::new(),
            peeked: None,
            started: false,
        }
    }

    pub async fn next_entry(&mut self) -> Result<Option<WalkEntry>> {
        if let Some(entry) = self.peeked.take() {
            return Ok(Some(entry));
        }
        if !self.started {
            self.started = true;
            let dir = match self.prefix.rfind('/') {
                Some(idx) => self.prefix[..=idx].to_string(),
                None => String::new(),
            };
            self.push_children(&dir).await?;
        }

        while let Some(key) = self.stack.pop() {
            if !key.ends_with('/') {
                if key > self.marker {
                    return Ok(Some(WalkEntry::Object(key)));
                }
                continue;
            }

            if !self.recursive {
                if key > self.marker {
                    return Ok(Some(WalkEntry::Prefix(key)));
                }
                continue;
            }

            // Everything below `key` sorts before the marker.
            if self.marker >= key && !self.marker.starts_with(&key) {
                continue;
            }
            self.push_children(&key).await?;
        }

        Ok(None)
    }

    pub async fn has_more(&mut self) -> Result<bool> {
        if self.peeked.is_none() {
            self.peeked = self.next_entry().await?;
        }
        Ok(self.peeked.is_some())
    }

    async fn push_children(&mut self, dir: &str) -> Result<()> {
        let entries = match self.storage.list_dir(&self.bucket, dir).await {
            Ok(entries) => entries,
            Err(StorageError::FileNotFound) => return Ok(()),
            Err(err) => return Err(to_object_err(err, &self.bucket, dir)),
        };

        let mut keys = Vec::with_capacity(entries.len());
        for entry in entries {
            let key = format!("{dir}{entry}");
            if !key.starts_with(&self.prefix) {
                continue;
            }

            match key.strip_suffix('/') {
                Some(object) => {
                    let multipart = is_multipart_object(self.storage.as_ref(), &self.bucket, object)
                        .await
                        .map_err(|err| to_object_err(err, &self.bucket, object))?;
                    if multipart {
                        keys.push(object.to_string());
                    } else {
                        keys.push(key);
                    }
                }
                // Parts of an upload that was never completed.
                None if key.ends_with(MULTIPART_SUFFIX) => {}
                None => keys.push(key),
            }
        }

        keys.sort();
        self.stack.extend(keys.into_iter().rev());
        Ok(())
    }
}

impl XlObjects {
    pub(super) async fn list_objects_inner(
        &self,
        bucket: &str,
        prefix: &str,
        marker: &str,
        delimiter: &str,
        max_keys: i32,
    ) -> Result<ListObjectsInfo> {
        let max_keys = usize::try_from(max_keys)
            .ok()
            .filter(|max_keys| *max_keys > 0)
            .unwrap_or(DEFAULT_MAX_KEYS);

        let params = ListParams {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            marker: marker.to_string(),
            delimiter: delimiter.to_string(),
        };
        let mut walker = match self.list_cache.take(&params).await {
            Some(walker) => {
                debug!(bucket, prefix, marker, "resuming cached listing");
                walker
            }
            None => TreeWalker::new(
                Arc::clone(&self.storage),
                bucket,
                prefix,
                marker,
                delimiter.is_empty(),
            ),
        };

        let mut objects = Vec::new();
        let mut prefixes = Vec::new();
        let mut last_key = None;
        while objects.len() + prefixes.len() < max_keys {
            let Some(entry) = walker.next_entry().await? else {
                break;
            };
            last_key = Some(entry.key().to_string());

            match entry {
                WalkEntry::Prefix(common_prefix) => prefixes.push(common_prefix),
                WalkEntry::Object(key) => match self.get_object_info_inner(bucket, &key).await {
                    Ok(info) => objects.push(info),
                    Err(err) if err.is_not_found() => {
                        debug!(bucket, key, "object removed during listing");
                    }
                    Err(err) => return Err(err),
                },
            }
        }

        let is_truncated = walker.has_more().await?;
        let next_marker = if is_truncated { last_key } else { None };
        if let Some(marker) = &next_marker {
            self.list_cache
                .park(
                    ListParams {
                        marker: marker.clone(),
                        ..params
                    },
                    walker,
                )
                .await;
        }

        Ok(ListObjectsInfo {
            objects,
            prefixes,
            is_truncated,
            next_marker,
        })
    }
}
