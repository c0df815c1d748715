use super::cached_data::CachedData;
use crate::kubelet::pod::Pod;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Single-entry TTL cache for the node's pod list.
///
/// The entry is swapped as a whole under the write lock and readers only ever
/// clone the `Arc`, so a reader sees either the previous list or the new one.
#[derive(Debug)]
pub struct PodListCache {
    entry: RwLock<Option<CachedData<Arc<Vec<Pod>>>>>,
    ttl_nanos: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
}

impl PodListCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entry: RwLock::new(None),
            ttl_nanos: AtomicU64::new(duration_nanos(ttl)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stores: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_nanos(self.ttl_nanos.load(Ordering::Relaxed))
    }

    /// Applies to lists stored from now on
    pub fn set_ttl(&self, ttl: Duration) {
        self.ttl_nanos.store(duration_nanos(ttl), Ordering::Relaxed);
    }

    /// The cached list, if one is stored and still fresh
    pub async fn get(&self) -> Option<Arc<Vec<Pod>>> {
        let entry = self.entry.read().await;
        match entry.as_ref() {
            Some(cached) if cached.is_fresh() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Pod list cache HIT ({} pods)", cached.data.len());
                Some(cached.data.clone())
            }
            Some(_) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Pod list cache STALE");
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Pod list cache MISS");
                None
            }
        }
    }

    /// Replace the stored list and return it
    pub async fn put(&self, pods: Vec<Pod>) -> Arc<Vec<Pod>> {
        let pods = Arc::new(pods);
        let cached = CachedData::new(pods.clone(), self.ttl());
        *self.entry.write().await = Some(cached);
        self.stores.fetch_add(1, Ordering::Relaxed);
        pods
    }

    pub async fn clear(&self) {
        *self.entry.write().await = None;
    }

    pub async fn stats(&self) -> CacheStats {
        let entry = self.entry.read().await;
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            cached_pods: entry.as_ref().map(|c| c.data.len()),
            age: entry.as_ref().map(CachedData::age),
            expires_in: entry.as_ref().and_then(CachedData::time_until_expiry),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    /// Size of the stored list, fresh or not
    pub cached_pods: Option<usize>,
    pub age: Option<Duration>,
    /// Time left before the stored list stops being served
    pub expires_in: Option<Duration>,
}

/// Saturates at roughly 584 years
fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
