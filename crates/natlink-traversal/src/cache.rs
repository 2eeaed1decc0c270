//! Time-bounded memo of the last classification.

use crate::behavior::DetectionResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Single-slot detection cache
///
/// Readers get an immutable `Arc` snapshot; [`store`](Self::store) swaps in a
/// new snapshot and never mutates the old one.
#[derive(Debug)]
pub struct DetectionCache {
    ttl: Duration,
    slot: RwLock<Option<Arc<DetectionResult>>>,
}

impl DetectionCache {
    /// Create an empty cache
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    /// Entry lifetime
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached result if it is still within the TTL
    pub async fn get_fresh(&self) -> Option<Arc<DetectionResult>> {
        self.slot
            .read()
            .await
            .as_ref()
            .filter(|result| result.is_fresh(self.ttl))
            .cloned()
    }

    /// Last stored result, fresh or not
    pub async fn latest(&self) -> Option<Arc<DetectionResult>> {
        self.slot.read().await.clone()
    }

    /// Replace the cached result
    pub async fn store(&self, result: DetectionResult) -> Arc<DetectionResult> {
        let snapshot = Arc::new(result);
        *self.slot.write().await = Some(Arc::clone(&snapshot));
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::{Evidence, NatBehavior};
    use tokio::time::Instant;

    fn result() -> DetectionResult {
        DetectionResult {
            behavior: NatBehavior::open(),
            public_endpoint: None,
            determined_at: Instant::now(),
            evidence: Evidence::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_expires_after_ttl() {
        let cache = DetectionCache::new(Duration::from_secs(300));
        assert!(cache.get_fresh().await.is_none());

        cache.store(result()).await;
        assert!(cache.get_fresh().await.is_some());

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.get_fresh().await.is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get_fresh().await.is_none());
        assert!(cache.latest().await.is_some());
    }

    #[tokio::test]
    async fn test_store_replaces_snapshot() {
        let cache = DetectionCache::new(Duration::from_secs(60));
        let first = cache.store(result()).await;

        let mut blocked = result();
        blocked.behavior = NatBehavior::blocked();
        cache.store(blocked).await;

        // Old snapshot unchanged, cache holds the new one
        assert_eq!(first.behavior, NatBehavior::open());
        let current = cache.get_fresh().await.unwrap();
        assert_eq!(current.behavior, NatBehavior::blocked());
        assert!(!Arc::ptr_eq(&first, &current));
    }
}
