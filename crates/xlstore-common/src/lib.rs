pub mod error;
pub mod mime;
pub mod types;

pub use error::{Result, XlError};
pub use types::{BucketInfo, ObjectInfo};
