//! Positive-answer cache with a bounded time-to-live.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::observability::metrics;
use crate::resolver::QueryKey;

#[derive(Debug, Clone)]
struct CacheEntry {
    addrs: Arc<Vec<IpAddr>>,
    expires_at: Instant,
}

/// Thread-safe cache of successful lookups.
#[derive(Debug)]
pub struct DnsCache {
    entries: DashMap<QueryKey, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
}

impl DnsCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries,
        }
    }

    /// Fresh answer for `key`, if any. Expired entries are dropped on read.
    pub fn get(&self, key: &QueryKey) -> Option<Arc<Vec<IpAddr>>> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| Arc::clone(&entry.addrs));

        match hit {
            Some(addrs) => {
                metrics::record_resolver_cache("hit");
                Some(addrs)
            }
            None => {
                self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
                metrics::record_resolver_cache("miss");
                None
            }
        }
    }

    pub fn insert(&self, key: QueryKey, addrs: Arc<Vec<IpAddr>>) {
        if self.ttl.is_zero() || self.max_entries == 0 {
            return;
        }
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.evict_expired();
            if self.entries.len() >= self.max_entries {
                self.evict_soonest();
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                addrs,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    fn evict_soonest(&self) {
        let soonest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.expires_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = soonest {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::RecordType;

    fn key(host: &str) -> QueryKey {
        QueryKey::new(host, RecordType::A)
    }

    fn answer() -> Arc<Vec<IpAddr>> {
        Arc::new(vec!["10.0.0.1".parse().unwrap()])
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = DnsCache::new(Duration::from_secs(30), 16);
        cache.insert(key("example.com"), answer());
        assert!(cache.get(&key("example.com")).is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.get(&key("example.com")).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_is_bounded() {
        let cache = DnsCache::new(Duration::from_secs(30), 2);
        cache.insert(key("a.test"), answer());
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert(key("b.test"), answer());
        cache.insert(key("c.test"), answer());

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("a.test")).is_none());
        assert!(cache.get(&key("c.test")).is_some());
    }

    #[tokio::test]
    async fn zero_ttl_disables_caching() {
        let cache = DnsCache::new(Duration::ZERO, 16);
        cache.insert(key("example.com"), answer());
        assert!(cache.is_empty());
    }
}
