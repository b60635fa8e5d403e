use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use super::TreeWalker;

/// Identity of a listing call; a parked walker is keyed by the marker the
/// next page will be requested with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListParams {
    pub bucket: String,
    pub prefix: String,
    pub marker: String,
    pub delimiter: String,
}

#[derive(Debug)]
struct CachedWalker {
    walker: TreeWalker,
    parked_at: Instant,
}

/// Parks the walkers of truncated listings so the next page resumes where the
/// previous one stopped. The lock is never held across storage I/O.
#[derive(Debug)]
pub struct ListCache {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<ListParams, Vec<CachedWalker>>>,
}

impl ListCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn take(&self, params: &ListParams) -> Option<TreeWalker> {
        let mut entries = self.entries.lock().await;
        let walkers = entries.get_mut(params)?;
        walkers.retain(|cached| cached.parked_at.elapsed() < self.ttl);
        let walker = walkers.pop().map(|cached| cached.walker);
        if walkers.is_empty() {
            entries.remove(params);
        }
        walker
    }

    pub async fn park(&self, params: ListParams, walker: TreeWalker) {
        if self.capacity == 0 {
            return;
        }

        let mut entries = self.entries.lock().await;
        for walkers in entries.values_mut() {
            walkers.retain(|cached| cached.parked_at.elapsed() < self.ttl);
        }
        entries.retain(|_, walkers| !walkers.is_empty());

        while entries.values().map(Vec::len).sum::<usize>() >= self.capacity {
            if !evict_oldest(&mut entries) {
                break;
            }
            debug!(capacity = self.capacity, "evicted oldest listing cursor");
        }

        entries.entry(params).or_default().push(CachedWalker {
            walker,
            parked_at: Instant::now(),
        });
    }

    /// Drops every walker for `bucket`.
    pub async fn purge_bucket(&self, bucket: &str) {
        self.entries
            .lock()
            .await
            .retain(|params, _| params.bucket != bucket);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn evict_oldest(entries: &mut HashMap<ListParams, Vec<CachedWalker>>) -> bool {
    let oldest = entries
        .iter()
        .flat_map(|(params, walkers)| {
            walkers
                .iter()
                .enumerate()
                .map(move |(idx, cached)| (cached.parked_at, params, idx))
        })
        .min_by_key(|(parked_at, _, _)| *parked_at)
        .map(|(_, params, idx)| (params.clone(), idx));

    let Some((params, idx)) = oldest else {
        return false;
    };
    if let Some(walkers) = entries.get_mut(&params) {
        walkers.remove(idx);
        if walkers.is_empty() {
            entries.remove(&params);
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{ListCache, ListParams};
    use crate::memory::MemoryStorage;
    use crate::objects::TreeWalker;

    fn params(marker: &str) -> ListParams {
        ListParams {
            bucket: "bucket".to_string(),
            prefix: String::new(),
            marker: marker.to_string(),
            delimiter: String::new(),
        }
    }

    fn walker(marker: &str) -> TreeWalker {
        TreeWalker::new(Arc::new(MemoryStorage::new()), "bucket", "", marker, true)
    }

    #[tokio::test]
    async fn take_returns_parked_walker_once() {
        let cache = ListCache::new(Duration::from_secs(60), 8);
        cache.park(params("a"), walker("a")).await;

        assert!(cache.take(&params("b")).await.is_none());
        assert!(cache.take(&params("a")).await.is_some());
        assert!(cache.take(&params("a")).await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn expired_walkers_are_not_returned() {
        let cache = ListCache::new(Duration::ZERO, 8);
        cache.park(params("a"), walker("a")).await;

        assert!(cache.take(&params("a")).await.is_none());
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let cache = ListCache::new(Duration::from_secs(60), 2);
        for marker in ["a", "b", "c"] {
            cache.park(params(marker), walker(marker)).await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(cache.len().await, 2);
        assert!(cache.take(&params("a")).await.is_none());
        assert!(cache.take(&params("c")).await.is_some());
    }

    #[tokio::test]
    async fn purge_drops_only_that_bucket() {
        let cache = ListCache::new(Duration::from_secs(60), 8);
        cache.park(params("a"), walker("a")).await;
        let mut other = params("a");
        other.bucket = "other".to_string();
        cache.park(other.clone(), walker("a")).await;

        cache.purge_bucket("bucket").await;

        assert!(cache.take(&params("a")).await.is_none());
        assert!(cache.take(&other).await.is_some());
    }
}
