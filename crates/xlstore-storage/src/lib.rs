pub mod config;
pub mod datatypes;
pub mod errors;
pub mod fileio;
pub mod format;
pub mod memory;
pub mod multipart;
pub mod objects;
pub mod traits;
pub mod validate;
pub mod xl;

#[cfg(test)]
pub(crate) mod testing;

/// Reserved volume holding `format.json` and staged writes. Never exposed as a bucket.
pub const META_BUCKET: &str = ".xlstore.sys";
/// Prefix inside [`META_BUCKET`] under which in-flight writes are staged.
pub const TMP_PREFIX: &str = "tmp";

pub use config::ObjectLayerConfig;
pub use memory::MemoryStorage;
pub use objects::XlObjects;
pub use traits::{ObjectLayer, StorageApi};
pub use xl::storage::XlStorage;
