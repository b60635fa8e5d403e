use std::time::Duration;

pub const DEFAULT_LIST_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_LIST_CACHE_CAPACITY: usize = 1_024;
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;
pub const DEFAULT_READ_CHANNEL_CAPACITY: usize = 4;

#[derive(Debug, Clone)]
pub struct ObjectLayerConfig {
    /// How long a parked listing cursor stays reusable.
    pub list_cache_ttl: Duration,
    pub list_cache_capacity: usize,
    /// Largest chunk handed from the multipart read producer to the reader.
    pub read_chunk_size: usize,
    /// Chunks buffered between producer and reader before the producer waits.
    pub read_channel_capacity: usize,
}

impl Default for ObjectLayerConfig {
    fn default() -> Self {
        Self {
            list_cache_ttl: DEFAULT_LIST_CACHE_TTL,
            list_cache_capacity: DEFAULT_LIST_CACHE_CAPACITY,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            read_channel_capacity: DEFAULT_READ_CHANNEL_CAPACITY,
        }
    }
}
