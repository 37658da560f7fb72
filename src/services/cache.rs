use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::models::{AnnotationResponse, CacheEntry, CacheKey};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    /// Keys oldest-inserted first.
    order: VecDeque<CacheKey>,
}

/// Bounded in-memory store of raw annotation payloads.
///
/// Eviction is by insertion order, not access order. Entries never expire
/// unless a TTL is configured.
pub struct AnnotationCache {
    state: RwLock<CacheState>,
    capacity: usize,
    ttl: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl AnnotationCache {
    pub fn new(capacity: usize) -> Self {
        Self::with_ttl(capacity, None)
    }

    pub fn with_ttl(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            capacity,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Arc<AnnotationResponse>> {
        let state = self.state.read().await;
        match state.entries.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.response.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Like [`AnnotationCache::get`] but leaves the hit/miss counters alone.
    pub async fn peek(&self, key: &CacheKey) -> Option<Arc<AnnotationResponse>> {
        let state = self.state.read().await;
        state
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(Instant::now()))
            .map(|entry| entry.response.clone())
    }

    pub async fn put(&self, key: CacheKey, response: Arc<AnnotationResponse>) {
        if self.capacity == 0 {
            return;
        }

        let now = Instant::now();
        let mut state = self.state.write().await;
        let state = &mut *state;

        if self.ttl.is_some() {
            let expired: Vec<CacheKey> = state
                .entries
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();
            for stale in expired {
                state.entries.remove(&stale);
                state.order.retain(|k| k != &stale);
            }
        }

        if state.entries.remove(&key).is_some() {
            state.order.retain(|k| k != &key);
        }

        while state.entries.len() >= self.capacity {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            state.entries.remove(&oldest);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!("Evicted cache entry {}", oldest);
        }

        state.order.push_back(key.clone());
        state.entries.insert(
            key,
            CacheEntry {
                response,
                expires_at: self.ttl.map(|ttl| now + ttl),
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.order.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.len().await,
            capacity: self.capacity,
        }
    }
}
