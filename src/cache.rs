//! Per-tenant partitioned LRU cache with entry TTL.
//!
//! Grounded in `mcp-agent-mail-db/src/cache.rs`'s `ReadCache` at the
//! *pattern* level — a TTL-wrapped entry, atomic hit/miss counters, and
//! per-scope partitioning — without its S3-FIFO eviction machinery, which
//! is more elaborate than the plain LRU this crate's cache layer needs.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::domain::TenantId;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// One tenant's LRU partition. `IndexMap` gives O(1) lookup while
/// preserving insertion order; `touch` moves a key to the back on access so
/// the front is always the least-recently-used candidate for eviction.
struct Partition<K, V> {
    entries: IndexMap<K, Entry<V>>,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V: Clone> Partition<K, V> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            capacity,
        }
    }

    fn get(&mut self, key: &K, ttl: Duration) -> Option<V> {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|e| e.inserted_at.elapsed() > ttl);
        if expired {
            self.entries.shift_remove(key);
            return None;
        }
        if let Some(idx) = self.entries.get_index_of(key) {
            // Move-to-back marks this key most-recently-used.
            let (k, v) = self.entries.shift_remove_index(idx).unwrap();
            let value = v.value.clone();
            self.entries.insert(k, v);
            return Some(value);
        }
        None
    }

    fn put(&mut self, key: K, value: V) {
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
        while self.entries.len() > self.capacity {
            self.entries.shift_remove_index(0);
        }
    }
}

/// Snapshot of cumulative cache counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
}

#[derive(Default)]
struct Metrics {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
}

/// Tenant-partitioned TTL cache. A cache miss never blocks longer than a
/// single lookup; writes are fire-and-forget from the caller's perspective.
pub struct TenantCache<K, V> {
    partitions: Mutex<std::collections::HashMap<TenantId, Partition<K, V>>>,
    capacity_per_tenant: usize,
    ttl: Duration,
    metrics: Metrics,
}

impl<K: Hash + Eq + Clone, V: Clone> TenantCache<K, V> {
    #[must_use]
    pub fn new(capacity_per_tenant: usize, ttl: Duration) -> Self {
        Self {
            partitions: Mutex::new(std::collections::HashMap::new()),
            capacity_per_tenant,
            ttl,
            metrics: Metrics::default(),
        }
    }

    #[must_use]
    pub fn get(&self, tenant: TenantId, key: &K) -> Option<V> {
        let mut partitions = self.partitions.lock();
        let result = partitions
            .get_mut(&tenant)
            .and_then(|p| p.get(key, self.ttl));
        if result.is_some() {
            self.metrics.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.misses.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    pub fn put(&self, tenant: TenantId, key: K, value: V) {
        let mut partitions = self.partitions.lock();
        partitions
            .entry(tenant)
            .or_insert_with(|| Partition::new(self.capacity_per_tenant))
            .put(key, value);
        self.metrics.puts.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn metrics(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            puts: self.metrics.puts.load(Ordering::Relaxed),
        }
    }

    /// Number of entries currently held for `tenant`, for tests and metrics.
    #[must_use]
    pub fn partition_len(&self, tenant: TenantId) -> usize {
        self.partitions
            .lock()
            .get(&tenant)
            .map_or(0, |p| p.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn hits_and_misses_are_counted() {
        let cache: TenantCache<String, u32> = TenantCache::new(10, Duration::from_secs(60));
        let tenant = Uuid::new_v4();
        assert!(cache.get(tenant, &"k".to_string()).is_none());
        cache.put(tenant, "k".to_string(), 1);
        assert_eq!(cache.get(tenant, &"k".to_string()), Some(1));
        let snap = cache.metrics();
        assert_eq!(snap.hits, 1);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.puts, 1);
    }

    #[test]
    fn partitions_evict_independently_per_tenant() {
        let cache: TenantCache<String, u32> = TenantCache::new(2, Duration::from_secs(60));
        let loud = Uuid::new_v4();
        let quiet = Uuid::new_v4();
        for i in 0..5 {
            cache.put(loud, format!("k{i}"), i);
        }
        cache.put(quiet, "only".to_string(), 99);
        assert_eq!(cache.partition_len(loud), 2);
        assert_eq!(cache.partition_len(quiet), 1);
        assert_eq!(cache.get(quiet, &"only".to_string()), Some(99));
    }

    #[test]
    fn expired_entries_are_treated_as_misses() {
        let cache: TenantCache<String, u32> = TenantCache::new(10, Duration::from_millis(1));
        let tenant = Uuid::new_v4();
        cache.put(tenant, "k".to_string(), 1);
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get(tenant, &"k".to_string()).is_none());
    }

    #[test]
    fn lru_eviction_drops_least_recently_used() {
        let cache: TenantCache<String, u32> = TenantCache::new(2, Duration::from_secs(60));
        let tenant = Uuid::new_v4();
        cache.put(tenant, "a".to_string(), 1);
        cache.put(tenant, "b".to_string(), 2);
        assert_eq!(cache.get(tenant, &"a".to_string()), Some(1)); // a is now MRU
        cache.put(tenant, "c".to_string(), 3); // evicts b
        assert!(cache.get(tenant, &"b".to_string()).is_none());
        assert_eq!(cache.get(tenant, &"c".to_string()), Some(3));
    }
}
