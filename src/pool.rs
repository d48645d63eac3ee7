//! Origin Pool (component I): a concurrent mapping from origin to a bounded
//! FIFO of idle upstream bridges. Never blocks; disposes what it can't hold.

use crate::bridge::UpstreamBridge;
use crate::origin::Origin;
use dashmap::DashMap;
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// Bounded per-origin queue depth (§3 OriginPool).
pub const CAPACITY: usize = 128;

pub struct OriginPoolRegistry {
    pools: DashMap<Origin, Mutex<VecDeque<UpstreamBridge>>>,
}

impl OriginPoolRegistry {
    pub fn new() -> Self {
        Self {
            pools: DashMap::new(),
        }
    }

    /// Dequeue an idle, non-expired bridge for `origin`, or `None` if the
    /// pool is empty or every queued bridge had expired.
    pub async fn acquire(&self, origin: &Origin) -> Option<UpstreamBridge> {
        let queue = self.pools.get(origin)?;
        let mut queue = queue.lock().await;
        while let Some(bridge) = queue.pop_front() {
            if !bridge.is_expired() {
                metrics::gauge!("proxy_pool_bridges_idle").decrement(1.0);
                return Some(bridge);
            }
            metrics::gauge!("proxy_pool_bridges_idle").decrement(1.0);
            // expired: drop it and keep looking
        }
        None
    }

    /// Return a bridge to the pool for later reuse, or dispose it if the
    /// queue is already at capacity.
    pub async fn release(&self, origin: Origin, bridge: UpstreamBridge) {
        let queue = self.pools.entry(origin).or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut queue = queue.lock().await;
        if queue.len() < CAPACITY {
            queue.push_back(bridge);
            metrics::gauge!("proxy_pool_bridges_idle").increment(1.0);
        }
        // else: drop(bridge) disposes it
    }

    /// Current queue depth for `origin`, used by the entry point to decide
    /// whether `release` is worth attempting.
    pub async fn len(&self, origin: &Origin) -> usize {
        match self.pools.get(origin) {
            Some(queue) => queue.lock().await.len(),
            None => 0,
        }
    }

    /// Drain every pool, disposing all bridges. Called on shutdown.
    pub async fn drain_all(&self) {
        for entry in self.pools.iter() {
            let mut queue = entry.value().lock().await;
            metrics::gauge!("proxy_pool_bridges_idle").decrement(queue.len() as f64);
            queue.clear();
        }
    }
}

impl Default for OriginPoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Origin {
        Origin::new("http", "example.com", None)
    }

    #[tokio::test]
    async fn acquire_on_empty_pool_returns_none() {
        let registry = OriginPoolRegistry::new();
        assert!(registry.acquire(&origin()).await.is_none());
    }

    #[tokio::test]
    async fn release_then_acquire_round_trips() {
        let registry = OriginPoolRegistry::new();
        let bridge = UpstreamBridge::unconnected(origin());
        registry.release(origin(), bridge).await;
        assert_eq!(registry.len(&origin()).await, 1);

        let acquired = registry.acquire(&origin()).await;
        assert!(acquired.is_some());
        assert_eq!(registry.len(&origin()).await, 0);
    }

    #[tokio::test]
    async fn release_past_capacity_disposes_excess() {
        let registry = OriginPoolRegistry::new();
        for _ in 0..(CAPACITY + 5) {
            registry.release(origin(), UpstreamBridge::unconnected(origin())).await;
        }
        assert_eq!(registry.len(&origin()).await, CAPACITY);
    }

    #[tokio::test]
    async fn expired_bridge_is_skipped_on_acquire() {
        let registry = OriginPoolRegistry::new();
        let expired = UpstreamBridge::unconnected(origin());
        // Freshly unconnected bridges have their expire deadline set to "now",
        // so they read as already expired without needing a real connection.
        assert!(expired.is_expired());
        registry.release(origin(), expired).await;
        assert!(registry.acquire(&origin()).await.is_none());
    }
}
