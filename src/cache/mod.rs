// ============================================================================
// Order Cache (cache-aside)
// ============================================================================
//
// Two key spaces:
// - values: one serialized order per id
// - index:  a sorted set of order ids (score = member = id) used to walk
//           orders page by page in id order
//
// The index is the authoritative ordering. A value missing for an id that
// is in the index is a cache miss, never evidence that the order is gone:
// `get_list` fills such holes from the store and writes them back.
// The reverse is not repaired by paging: an order whose `put` failed after
// commit is absent from every page until the next `populate` or a by-id
// read writes it back, even though it is in the store.
//
// The cache is never part of a store transaction. Callers treat every
// cache error as non-fatal and fall back to the store.
//
// ============================================================================

pub mod memory;
pub mod redis;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::order::{Order, Pagination};
use crate::storage::{OrderStore, Scope, StoreError};

pub use self::memory::MemoryOrderCache;
pub use self::redis::RedisOrderCache;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache unavailable: circuit breaker is open")]
    Unavailable,

    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store fallback failed: {0}")]
    Store(#[from] StoreError),
}

#[async_trait]
pub trait OrderCache: Send + Sync + 'static {
    /// `Ok(None)` means "not cached"; the caller must ask the store.
    async fn get(&self, order_id: i64) -> CacheResult<Option<Order>>;

    /// Store the order's value. A zero `ttl` never expires.
    async fn set(&self, order: &Order, ttl: Duration) -> CacheResult<()>;

    async fn delete(&self, order_id: i64) -> CacheResult<()>;

    async fn add_to_index(&self, order: &Order) -> CacheResult<()>;

    async fn remove_from_index(&self, order_id: i64) -> CacheResult<()>;

    /// `set` and `add_to_index` as one operation.
    async fn put(&self, order: &Order, ttl: Duration) -> CacheResult<()> {
        self.set(order, ttl).await?;
        self.add_to_index(order).await
    }

    /// `delete` and `remove_from_index` as one operation.
    async fn evict(&self, order_id: i64) -> CacheResult<()> {
        self.delete(order_id).await?;
        self.remove_from_index(order_id).await
    }

    /// One page in index order. Values missing from the cache are fetched
    /// from `store` in a single batch and written back.
    async fn get_list<S: OrderStore>(&self, pagination: Pagination, store: &S) -> CacheResult<Vec<Order>>;

    /// Load every order from `store` into values and index. Returns the count.
    async fn populate<S: OrderStore>(&self, store: &S, ttl: Duration) -> CacheResult<usize>;
}

/// Decode the cached values of an index window. Returns one slot per id and
/// the ids whose value was absent or undecodable.
pub(crate) fn decode_window(ids: &[i64], values: Vec<Option<Vec<u8>>>) -> (Vec<Option<Order>>, Vec<i64>) {
    let mut slots = Vec::with_capacity(ids.len());
    let mut missing = Vec::new();

    for (id, value) in ids.iter().zip(values.into_iter().chain(std::iter::repeat(None))) {
        let decoded = value.and_then(|bytes| match serde_json::from_slice::<Order>(&bytes) {
            Ok(order) => Some(order),
            Err(e) => {
                tracing::debug!(order_id = id, error = %e, "Discarding undecodable cache value");
                None
            }
        });

        if decoded.is_none() {
            missing.push(*id);
        }
        slots.push(decoded);
    }

    (slots, missing)
}

/// Fill the empty slots of a window from the store.
///
/// Returns the completed page, in window order, and the orders that were
/// fetched so the caller can write them back. Ids the store no longer has
/// are dropped from the page.
pub(crate) async fn fill_from_store<S: OrderStore>(
    ids: &[i64],
    slots: Vec<Option<Order>>,
    missing: &[i64],
    store: &S,
) -> CacheResult<(Vec<Order>, Vec<Order>)> {
    if missing.is_empty() {
        return Ok((slots.into_iter().flatten().collect(), Vec::new()));
    }

    let fetched = store.get_by_ids(Scope::Pool, missing).await?;
    let by_id: HashMap<i64, &Order> = fetched.iter().map(|order| (order.id, order)).collect();

    let page = ids
        .iter()
        .zip(slots)
        .filter_map(|(id, slot)| slot.or_else(|| by_id.get(id).map(|order| (*order).clone())))
        .collect::<Vec<_>>();

    if fetched.len() < missing.len() {
        tracing::debug!(
            missing = missing.len(),
            found = fetched.len(),
            "Index holds ids the store no longer has"
        );
    }

    Ok((page, fetched))
}
