use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketInfo {
    pub name: String,
    pub created: DateTime<Utc>,
}

/// Caller-facing view of a stored object, simple or multipart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub bucket: String,
    pub key: String,
    pub size: i64,
    /// Hex md5 of the content, or the aggregate etag of a multipart object.
    pub etag: String,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
    pub is_dir: bool,
}
