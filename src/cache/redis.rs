use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Cmd, Pipeline, RedisResult};

use super::{decode_window, fill_from_store, CacheError, CacheResult, OrderCache};
use crate::domain::order::{Order, Pagination};
use crate::storage::{OrderStore, Scope};
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};

/// Orders written per pipeline during a warm-up.
const POPULATE_CHUNK: usize = 500;

/// Redis-backed order cache.
///
/// Keys:
/// - `{namespace}:order:{id}` holds the JSON-encoded order
/// - `{namespace}:orders:idx` is a sorted set of ids, score = id
///
/// Every command goes through a circuit breaker; while it is open calls fail
/// with `CacheError::Unavailable` without touching the network.
#[derive(Clone)]
pub struct RedisOrderCache {
    manager: ConnectionManager,
    namespace: String,
    refill_ttl: Duration,
    breaker: CircuitBreaker,
}

impl RedisOrderCache {
    pub async fn new(url: &str, namespace: &str) -> CacheResult<Self> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;

        tracing::info!(namespace = namespace, "Connected to Redis order cache");

        Ok(Self {
            manager,
            namespace: namespace.to_string(),
            refill_ttl: Duration::ZERO,
            breaker: CircuitBreaker::new("redis-cache", CircuitBreakerConfig::default()),
        })
    }

    /// TTL used when `get_list` writes back values it had to load from the store.
    pub fn with_refill_ttl(mut self, ttl: Duration) -> Self {
        self.refill_ttl = ttl;
        self
    }

    /// Replace the default breaker thresholds.
    pub fn with_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = CircuitBreaker::new("redis-cache", config);
        self
    }

    async fn guarded<T, F>(&self, operation: &'static str, fut: F) -> CacheResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        self.breaker.call(fut).await.map_err(|e| match e {
            CircuitBreakerError::CircuitOpen => CacheError::Unavailable,
            CircuitBreakerError::OperationFailed(e) => {
                tracing::debug!(
                    breaker = self.breaker.name(),
                    operation = operation,
                    error = %e,
                    "Redis command failed"
                );
                CacheError::Redis(e)
            }
        })
    }

    fn set_cmd(&self, order: &Order, ttl: Duration) -> CacheResult<Cmd> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(order_key(&self.namespace, order.id)).arg(serde_json::to_vec(order)?);
        if let Some(ms) = expiry_millis(ttl) {
            cmd.arg("PX").arg(ms);
        }
        Ok(cmd)
    }

    fn index_add_cmd(&self, order_id: i64) -> Cmd {
        let mut cmd = redis::cmd("ZADD");
        cmd.arg(index_key(&self.namespace)).arg(order_id).arg(order_id);
        cmd
    }

    fn index_remove_cmd(&self, order_id: i64) -> Cmd {
        let mut cmd = redis::cmd("ZREM");
        cmd.arg(index_key(&self.namespace)).arg(order_id);
        cmd
    }

    fn queue_put(&self, pipe: &mut Pipeline, order: &Order, ttl: Duration) -> CacheResult<()> {
        pipe.add_command(self.set_cmd(order, ttl)?).ignore();
        pipe.add_command(self.index_add_cmd(order.id)).ignore();
        Ok(())
    }

    /// Write back orders that `get_list` loaded from the store. Runs in the
    /// background; the page has already been answered.
    fn spawn_refill(&self, orders: Vec<Order>) {
        let mut pipe = redis::pipe();
        for order in &orders {
            if let Err(e) = self.queue_put(&mut pipe, order, self.refill_ttl) {
                tracing::warn!(order_id = order.id, error = %e, "Skipping cache refill for order");
            }
        }

        let mut conn = self.manager.clone();
        let breaker = self.breaker.clone();
        let count = orders.len();

        tokio::spawn(async move {
            match breaker.call(pipe.query_async::<()>(&mut conn)).await {
                Ok(()) => tracing::debug!(count = count, "Refilled cache from store"),
                Err(e) => tracing::warn!(count = count, error = %e, "Cache refill failed"),
            }
        });
    }
}

#[async_trait]
impl OrderCache for RedisOrderCache {
    async fn get(&self, order_id: i64) -> CacheResult<Option<Order>> {
        let mut conn = self.manager.clone();
        let key = order_key(&self.namespace, order_id);

        let value = self
            .guarded("get", redis::cmd("GET").arg(&key).query_async::<Option<Vec<u8>>>(&mut conn))
            .await?;

        Ok(value.and_then(|bytes| match serde_json::from_slice(&bytes) {
            Ok(order) => Some(order),
            Err(e) => {
                tracing::warn!(order_id = order_id, error = %e, "Undecodable cache value treated as miss");
                None
            }
        }))
    }

    async fn set(&self, order: &Order, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.manager.clone();
        let cmd = self.set_cmd(order, ttl)?;
        self.guarded("set", cmd.query_async::<()>(&mut conn)).await
    }

    async fn delete(&self, order_id: i64) -> CacheResult<()> {
        let mut conn = self.manager.clone();
        let key = order_key(&self.namespace, order_id);
        self.guarded("delete", redis::cmd("DEL").arg(&key).query_async::<()>(&mut conn))
            .await
    }

    async fn add_to_index(&self, order: &Order) -> CacheResult<()> {
        let mut conn = self.manager.clone();
        let cmd = self.index_add_cmd(order.id);
        self.guarded("add_to_index", cmd.query_async::<()>(&mut conn)).await
    }

    async fn remove_from_index(&self, order_id: i64) -> CacheResult<()> {
        let mut conn = self.manager.clone();
        let cmd = self.index_remove_cmd(order_id);
        self.guarded("remove_from_index", cmd.query_async::<()>(&mut conn)).await
    }

    async fn put(&self, order: &Order, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        self.queue_put(&mut pipe, order, ttl)?;

        self.guarded("put", pipe.query_async::<()>(&mut conn)).await
    }

    async fn evict(&self, order_id: i64) -> CacheResult<()> {
        let mut conn = self.manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .add_command(redis::cmd("DEL").arg(order_key(&self.namespace, order_id)).clone())
            .ignore()
            .add_command(self.index_remove_cmd(order_id))
            .ignore();

        self.guarded("evict", pipe.query_async::<()>(&mut conn)).await
    }

    async fn get_list<S: OrderStore>(&self, pagination: Pagination, store: &S) -> CacheResult<Vec<Order>> {
        if pagination.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.manager.clone();
        let start = i64::from(pagination.offset);
        let stop = start + i64::from(pagination.limit) - 1;

        let ids = self
            .guarded(
                "get_list",
                redis::cmd("ZRANGE")
                    .arg(index_key(&self.namespace))
                    .arg(start)
                    .arg(stop)
                    .query_async::<Vec<i64>>(&mut conn),
            )
            .await?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| order_key(&self.namespace, *id)).collect();
        let values = self
            .guarded(
                "get_list",
                redis::cmd("MGET").arg(&keys).query_async::<Vec<Option<Vec<u8>>>>(&mut conn),
            )
            .await?;

        let (slots, missing) = decode_window(&ids, values);
        let (page, fetched) = fill_from_store(&ids, slots, &missing, store).await?;

        if !fetched.is_empty() {
            tracing::debug!(
                offset = pagination.offset,
                limit = pagination.limit,
                refilled = fetched.len(),
                "Cache page had missing values"
            );
            self.spawn_refill(fetched);
        }

        Ok(page)
    }

    async fn populate<S: OrderStore>(&self, store: &S, ttl: Duration) -> CacheResult<usize> {
        let orders = store.get_all(Scope::Pool).await?;

        for chunk in orders.chunks(POPULATE_CHUNK) {
            let mut conn = self.manager.clone();
            let mut pipe = redis::pipe();
            for order in chunk {
                self.queue_put(&mut pipe, order, ttl)?;
            }
            self.guarded("populate", pipe.query_async::<()>(&mut conn)).await?;
        }

        tracing::info!(count = orders.len(), "Order cache populated");
        Ok(orders.len())
    }
}

fn order_key(namespace: &str, order_id: i64) -> String {
    format!("{}:order:{}", namespace, order_id)
}

fn index_key(namespace: &str) -> String {
    format!("{}:orders:idx", namespace)
}

/// Milliseconds for `SET ... PX`, or `None` for a value that never expires.
fn expiry_millis(ttl: Duration) -> Option<u64> {
    if ttl.is_zero() {
        None
    } else {
        Some((ttl.as_millis() as u64).max(1))
    }
}
