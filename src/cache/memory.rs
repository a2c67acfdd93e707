use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{decode_window, fill_from_store, CacheResult, OrderCache};
use crate::domain::order::{Order, Pagination};
use crate::storage::{OrderStore, Scope};

/// Process-local order cache with the same key model as the Redis cache:
/// serialized values keyed by id plus an ordered id index.
///
/// Values are kept as JSON bytes so decode failures behave the same way in
/// both backends. Expiry uses the tokio clock.
#[derive(Clone, Default)]
pub struct MemoryOrderCache {
    inner: Arc<RwLock<CacheState>>,
    refill_ttl: Duration,
}

#[derive(Default)]
struct CacheState {
    values: HashMap<i64, CachedValue>,
    index: BTreeSet<i64>,
}

struct CachedValue {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CachedValue {
    fn new(bytes: Vec<u8>, ttl: Duration) -> Self {
        Self {
            bytes,
            expires_at: (!ttl.is_zero()).then(|| Instant::now() + ttl),
        }
    }

    fn is_live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

impl CacheState {
    fn live_bytes(&self, order_id: i64) -> Option<Vec<u8>> {
        self.values
            .get(&order_id)
            .filter(|value| value.is_live())
            .map(|value| value.bytes.clone())
    }
}

impl MemoryOrderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_refill_ttl(mut self, ttl: Duration) -> Self {
        self.refill_ttl = ttl;
        self
    }

    /// Drop every value and keep the index.
    pub async fn clear_values(&self) {
        self.inner.write().await.values.clear();
    }

    pub async fn index_len(&self) -> usize {
        self.inner.read().await.index.len()
    }

    pub async fn value_count(&self) -> usize {
        self.inner.read().await.values.values().filter(|v| v.is_live()).count()
    }

    #[cfg(test)]
    pub(crate) async fn insert_raw(&self, order_id: i64, bytes: &[u8]) {
        self.inner
            .write()
            .await
            .values
            .insert(order_id, CachedValue::new(bytes.to_vec(), Duration::ZERO));
    }
}

#[async_trait]
impl OrderCache for MemoryOrderCache {
    async fn get(&self, order_id: i64) -> CacheResult<Option<Order>> {
        let bytes = self.inner.read().await.live_bytes(order_id);

        Ok(bytes.and_then(|bytes| match serde_json::from_slice(&bytes) {
            Ok(order) => Some(order),
            Err(e) => {
                tracing::warn!(order_id = order_id, error = %e, "Undecodable cache value treated as miss");
                None
            }
        }))
    }

    async fn set(&self, order: &Order, ttl: Duration) -> CacheResult<()> {
        let bytes = serde_json::to_vec(order)?;
        self.inner
            .write()
            .await
            .values
            .insert(order.id, CachedValue::new(bytes, ttl));
        Ok(())
    }

    async fn delete(&self, order_id: i64) -> CacheResult<()> {
        self.inner.write().await.values.remove(&order_id);
        Ok(())
    }

    async fn add_to_index(&self, order: &Order) -> CacheResult<()> {
        self.inner.write().await.index.insert(order.id);
        Ok(())
    }

    async fn remove_from_index(&self, order_id: i64) -> CacheResult<()> {
        self.inner.write().await.index.remove(&order_id);
        Ok(())
    }

    async fn put(&self, order: &Order, ttl: Duration) -> CacheResult<()> {
        let bytes = serde_json::to_vec(order)?;
        let mut state = self.inner.write().await;
        state.values.insert(order.id, CachedValue::new(bytes, ttl));
        state.index.insert(order.id);
        Ok(())
    }

    async fn evict(&self, order_id: i64) -> CacheResult<()> {
        let mut state = self.inner.write().await;
        state.values.remove(&order_id);
        state.index.remove(&order_id);
        Ok(())
    }

    async fn get_list<S: OrderStore>(&self, pagination: Pagination, store: &S) -> CacheResult<Vec<Order>> {
        if pagination.is_empty() {
            return Ok(Vec::new());
        }

        let (ids, values) = {
            let state = self.inner.read().await;
            let ids: Vec<i64> = state
                .index
                .iter()
                .skip(pagination.offset as usize)
                .take(pagination.limit as usize)
                .copied()
                .collect();
            let values: Vec<Option<Vec<u8>>> = ids.iter().map(|id| state.live_bytes(*id)).collect();
            (ids, values)
        };

        let (slots, missing) = decode_window(&ids, values);
        let (page, fetched) = fill_from_store(&ids, slots, &missing, store).await?;

        if !fetched.is_empty() {
            tracing::debug!(refilled = fetched.len(), "Cache page had missing values");
            for order in &fetched {
                self.put(order, self.refill_ttl).await?;
            }
        }

        Ok(page)
    }

    async fn populate<S: OrderStore>(&self, store: &S, ttl: Duration) -> CacheResult<usize> {
        let orders = store.get_all(Scope::Pool).await?;
        for order in &orders {
            self.put(order, ttl).await?;
        }

        tracing::info!(count = orders.len(), "Order cache populated");
        Ok(orders.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderParams;
    use crate::storage::MemoryOrderStore;
    use chrono::{Duration as ChronoDuration, Utc};

    fn params() -> OrderParams {
        OrderParams {
            recipient_id: 7,
            expiration_date: Utc::now() + ChronoDuration::days(3),
            weight: 2.0,
            worth: 50.0,
        }
    }

    async fn seeded_store(count: usize) -> MemoryOrderStore {
        let store = MemoryOrderStore::new();
        for _ in 0..count {
            store.add(Scope::Pool, &Order::new(&params())).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = MemoryOrderCache::new();
        let mut order = Order::new(&params());
        order.id = 3;

        cache.put(&order, Duration::ZERO).await.unwrap();

        assert_eq!(cache.get(3).await.unwrap(), Some(order));
        assert_eq!(cache.index_len().await, 1);
    }

    #[tokio::test]
    async fn test_evict_removes_value_and_index_entry() {
        let cache = MemoryOrderCache::new();
        let mut order = Order::new(&params());
        order.id = 3;
        cache.put(&order, Duration::ZERO).await.unwrap();

        cache.evict(3).await.unwrap();

        assert_eq!(cache.get(3).await.unwrap(), None);
        assert_eq!(cache.index_len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expires_value() {
        let cache = MemoryOrderCache::new();
        let mut order = Order::new(&params());
        order.id = 1;
        cache.set(&order, Duration::from_secs(10)).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(cache.get(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_value_is_a_miss() {
        let cache = MemoryOrderCache::new();
        cache.insert_raw(9, b"{broken").await;

        assert_eq!(cache.get(9).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_populate_then_page() {
        let store = seeded_store(25).await;
        let cache = MemoryOrderCache::new();

        assert_eq!(cache.populate(&store, Duration::ZERO).await.unwrap(), 25);

        let page = cache.get_list(Pagination::new(10, 10), &store).await.unwrap();
        let ids: Vec<i64> = page.iter().map(|o| o.id).collect();
        assert_eq!(ids, (11..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_get_list_refills_cleared_values() {
        let store = seeded_store(5).await;
        let cache = MemoryOrderCache::new();
        cache.populate(&store, Duration::ZERO).await.unwrap();

        cache.clear_values().await;
        cache.insert_raw(2, b"not an order").await;

        let page = cache.get_list(Pagination::new(0, 5), &store).await.unwrap();

        assert_eq!(page.iter().map(|o| o.id).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
        assert_eq!(cache.value_count().await, 5);
        assert_eq!(cache.get(2).await.unwrap().map(|o| o.id), Some(2));
    }

    #[tokio::test]
    async fn test_get_list_skips_ids_gone_from_store() {
        let store = seeded_store(3).await;
        let cache = MemoryOrderCache::new();
        cache.populate(&store, Duration::ZERO).await.unwrap();

        store.delete(Scope::Pool, 2).await.unwrap();
        cache.delete(2).await.unwrap();

        let page = cache.get_list(Pagination::new(0, 10), &store).await.unwrap();
        assert_eq!(page.iter().map(|o| o.id).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_zero_limit_is_empty() {
        let store = seeded_store(3).await;
        let cache = MemoryOrderCache::new();
        cache.populate(&store, Duration::ZERO).await.unwrap();

        assert!(cache.get_list(Pagination::new(0, 0), &store).await.unwrap().is_empty());
    }
}
