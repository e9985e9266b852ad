use crate::core::member::MemberId;
use crate::tree::snapshot::ClientTree;
use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Cache key for the snapshot rooted at `root`.
pub fn cache_key(root: &MemberId) -> String {
    format!("tree:{}", root)
}

/// Short-lived store of built snapshots, keyed by root member.
///
/// Entries are immutable and replaced wholesale.
#[async_trait]
pub trait TreeCache: Send + Sync {
    async fn get(&self, root: &MemberId) -> Option<Arc<ClientTree>>;

    async fn put(&self, root: &MemberId, tree: Arc<ClientTree>, ttl: Duration);

    /// Returns true when an entry was removed.
    async fn invalidate(&self, root: &MemberId) -> bool;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    tree: Arc<ClientTree>,
    cached_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// In-process TTL cache.
#[derive(Debug, Default)]
pub struct MemoryTreeCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryTreeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live (unexpired) entries.
    pub async fn len(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.is_expired())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired());
        before - entries.len()
    }
}

#[async_trait]
impl TreeCache for MemoryTreeCache {
    async fn get(&self, root: &MemberId) -> Option<Arc<ClientTree>> {
        let key = cache_key(root);
        let entries = self.entries.read().await;
        match entries.get(&key) {
            Some(entry) if !entry.is_expired() => {
                debug!("tree cache hit for {}", key);
                Some(entry.tree.clone())
            }
            _ => {
                debug!("tree cache miss for {}", key);
                None
            }
        }
    }

    async fn put(&self, root: &MemberId, tree: Arc<ClientTree>, ttl: Duration) {
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| !e.is_expired());
        entries.insert(
            cache_key(root),
            CacheEntry {
                tree,
                cached_at: Instant::now(),
                ttl,
            },
        );
    }

    async fn invalidate(&self, root: &MemberId) -> bool {
        self.entries.write().await.remove(&cache_key(root)).is_some()
    }
}
