use thiserror::Error;

#[derive(Debug, Error)]
pub enum XlError {
    #[error("bucket not found: {0}")]
    BucketNotFound(String),
    #[error("bucket already exists: {0}")]
    BucketAlreadyExists(String),
    #[error("bucket is not empty: {0}")]
    BucketNotEmpty(String),
    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },
    #[error("object name is an existing prefix: {bucket}/{key}")]
    ObjectExistsAsPrefix { bucket: String, key: String },
    #[error("an object already exists at parent path {bucket}/{key}")]
    ParentIsObject { bucket: String, key: String },
    #[error("invalid bucket name: {0}")]
    InvalidBucketName(String),
    #[error("invalid object name: {bucket}/{key}")]
    InvalidObjectName { bucket: String, key: String },
    #[error("no pending upload for {bucket}/{key}")]
    NoSuchUpload { bucket: String, key: String },
    #[error("invalid part number {0}")]
    InvalidPart(i32),
    #[error("invalid range: offset={offset}, size={size}")]
    InvalidRange { offset: i64, size: i64 },
    #[error("unsupported delimiter: {0:?}")]
    UnsupportedDelimiter(String),
    #[error("content md5 mismatch: expected={expected}, calculated={calculated}")]
    BadDigest { expected: String, calculated: String },
    #[error("request body ended early for {bucket}/{key}")]
    IncompleteBody { bucket: String, key: String },
    #[error("failed to delete {failed_parts} part(s) of {bucket}/{key}")]
    PartialDelete {
        bucket: String,
        key: String,
        failed_parts: usize,
    },
    #[error("read quorum not met: {0}")]
    InsufficientReadQuorum(String),
    #[error("write quorum not met: {0}")]
    InsufficientWriteQuorum(String),
    #[error("disks not found: {0}")]
    DiskNotFound(String),
    #[error("disk access denied: {0}")]
    DiskAccessDenied(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("invalid backend format: {0}")]
    InvalidFormat(String),
    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(String),
    #[error("internal error: {0}")]
    InternalError(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl XlError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BucketNotFound(_) => "NoSuchBucket",
            Self::BucketAlreadyExists(_) => "BucketAlreadyExists",
            Self::BucketNotEmpty(_) => "BucketNotEmpty",
            Self::ObjectNotFound { .. } => "NoSuchKey",
            Self::ObjectExistsAsPrefix { .. } | Self::ParentIsObject { .. } => {
                "XMinioObjectExistsAsDirectory"
            }
            Self::InvalidBucketName(_) => "InvalidBucketName",
            Self::InvalidObjectName { .. } => "XMinioInvalidObjectName",
            Self::NoSuchUpload { .. } => "NoSuchUpload",
            Self::InvalidPart(_) => "InvalidPart",
            Self::InvalidRange { .. } => "InvalidRange",
            Self::UnsupportedDelimiter(_) => "NotImplemented",
            Self::BadDigest { .. } => "BadDigest",
            Self::IncompleteBody { .. } => "IncompleteBody",
            Self::InsufficientReadQuorum(_) => "XMinioReadQuorum",
            Self::InsufficientWriteQuorum(_) => "XMinioWriteQuorum",
            Self::AccessDenied(_) | Self::DiskAccessDenied(_) => "AccessDenied",
            Self::PartialDelete { .. }
            | Self::DiskNotFound(_)
            | Self::InvalidFormat(_)
            | Self::MalformedDescriptor(_)
            | Self::InternalError(_)
            | Self::Io(_) => "InternalError",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::BucketNotFound(_) | Self::ObjectNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, XlError>;
