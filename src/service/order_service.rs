use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::BoxFuture;

use super::{ServeAction, ServiceError, ServiceResult};
use crate::cache::{CacheResult, OrderCache};
use crate::domain::order::{Order, OrderError, OrderParams, OrderStatus, Packaging, Pagination};
use crate::metrics::Metrics;
use crate::storage::{OrderStore, Scope};
use crate::tx::{IsolationLevel, TransactionManager};

pub struct OrderService<S, M, C> {
    store: Arc<S>,
    tx: Arc<M>,
    cache: Arc<C>,
    cache_ttl: Duration,
    metrics: Arc<Metrics>,
}

impl<S, M, C> OrderService<S, M, C>
where
    S: OrderStore,
    M: TransactionManager<Conn = S::Conn>,
    C: OrderCache,
{
    pub fn new(store: Arc<S>, tx: Arc<M>, cache: Arc<C>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            tx,
            cache,
            cache_ttl: Duration::ZERO,
            metrics,
        }
    }

    /// TTL for cache values written by this service. Zero never expires.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Load every stored order into the cache.
    pub async fn warm_cache(&self) -> CacheResult<usize> {
        self.cache.populate(self.store.as_ref(), self.cache_ttl).await
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Take a parcel from a courier. Returns the new order's id.
    ///
    /// Packaging is validated before anything is written; an overweight
    /// parcel leaves storage untouched.
    pub async fn accept_from_courier(
        &self,
        params: OrderParams,
        packaging: &str,
        extra_membrane: bool,
    ) -> ServiceResult<i64> {
        let started = Instant::now();
        let packaging = Packaging::resolve(packaging, extra_membrane)?;
        let packaging_name = packaging.to_string();
        let store = Arc::clone(&self.store);

        let order = self
            .unit_of_work(IsolationLevel::ReadCommitted, move |conn| {
                Box::pin(async move {
                    let mut order = Order::new(&params);
                    packaging.apply(&mut order)?;

                    let id = store.add(Scope::Tx(&mut *conn), &order).await?;
                    order.id = id;
                    let record = order.mark_received_at(Utc::now());
                    store.add_history_record(Scope::Tx(&mut *conn), &record, id).await?;

                    let stored = store.get_by_id(Scope::Tx(conn), id).await?;
                    Ok::<_, ServiceError>(stored)
                })
            })
            .await?;

        tracing::info!(
            order_id = order.id,
            recipient_id = order.recipient_id,
            worth = order.worth,
            packaging = %packaging_name,
            "Order accepted from courier"
        );

        self.metrics.record_transition(order.status.as_str());
        self.cache_put(&order, "accept_from_courier").await;
        self.observe("accept_from_courier", started);

        Ok(order.id)
    }

    /// Hand an expired order back to the courier. The order is removed from
    /// storage; no terminal record is kept.
    pub async fn return_to_courier(&self, order_id: i64) -> ServiceResult<()> {
        let started = Instant::now();
        let store = Arc::clone(&self.store);

        self.unit_of_work(IsolationLevel::RepeatableRead, move |conn| {
            Box::pin(async move {
                let order = store.get_by_id(Scope::Tx(&mut *conn), order_id).await?;
                if !order.is_expired() {
                    return Err(OrderError::NotExpired { id: order_id }.into());
                }

                store.delete(Scope::Tx(conn), order_id).await?;
                Ok::<_, ServiceError>(())
            })
        })
        .await?;

        tracing::info!(order_id = order_id, "Order returned to courier");

        self.metrics.record_transition("returned");
        if let Err(e) = self.cache.evict(order_id).await {
            tracing::warn!(order_id = order_id, error = %e, "Cache eviction failed after commit");
        }
        self.observe("return_to_courier", started);

        Ok(())
    }

    /// Apply `action` to each order in turn, one unit of work per order.
    ///
    /// Stops at the first failure and returns it. Orders processed before the
    /// failure stay committed; the remaining ids are not attempted.
    pub async fn serve_recipient(
        &self,
        order_ids: &[i64],
        recipient_id: i64,
        action: ServeAction,
    ) -> ServiceResult<()> {
        for &order_id in order_ids {
            let result = match action {
                ServeAction::Deliver => self.deliver_one(order_id, recipient_id).await,
                ServeAction::Refund => self.refund_one(order_id, recipient_id).await,
            };

            if let Err(e) = result {
                tracing::warn!(
                    order_id = order_id,
                    recipient_id = recipient_id,
                    action = %action,
                    error = %e,
                    "Serving recipient stopped"
                );
                return Err(e);
            }
        }

        Ok(())
    }

    pub async fn deliver_orders(&self, order_ids: &[i64], recipient_id: i64) -> ServiceResult<()> {
        self.serve_recipient(order_ids, recipient_id, ServeAction::Deliver).await
    }

    pub async fn refund_orders(&self, order_ids: &[i64], recipient_id: i64) -> ServiceResult<()> {
        self.serve_recipient(order_ids, recipient_id, ServeAction::Refund).await
    }

    async fn deliver_one(&self, order_id: i64, recipient_id: i64) -> ServiceResult<Order> {
        let started = Instant::now();
        let store = Arc::clone(&self.store);

        let order = self
            .unit_of_work(IsolationLevel::RepeatableRead, move |conn| {
                Box::pin(async move {
                    let mut order = store.get_by_id(Scope::Tx(&mut *conn), order_id).await?;
                    ensure_recipient(&order, recipient_id)?;

                    let record = order.deliver()?;
                    store.update(Scope::Tx(&mut *conn), &order).await?;
                    store.add_history_record(Scope::Tx(conn), &record, order_id).await?;
                    Ok::<_, ServiceError>(order)
                })
            })
            .await?;

        tracing::info!(
            order_id = order_id,
            recipient_id = recipient_id,
            status = %order.status,
            "Order handed to recipient"
        );

        self.metrics.record_transition(order.status.as_str());
        self.cache_put(&order, "deliver").await;
        self.observe("deliver", started);

        Ok(order)
    }

    async fn refund_one(&self, order_id: i64, recipient_id: i64) -> ServiceResult<Order> {
        let started = Instant::now();
        let store = Arc::clone(&self.store);

        let order = self
            .unit_of_work(IsolationLevel::RepeatableRead, move |conn| {
                Box::pin(async move {
                    let mut order = store.get_by_id(Scope::Tx(&mut *conn), order_id).await?;
                    ensure_recipient(&order, recipient_id)?;

                    let record = order.refund()?;
                    store.update(Scope::Tx(&mut *conn), &order).await?;
                    store.add_history_record(Scope::Tx(conn), &record, order_id).await?;
                    Ok::<_, ServiceError>(order)
                })
            })
            .await?;

        tracing::info!(order_id = order_id, recipient_id = recipient_id, "Order refunded");

        self.metrics.record_transition(order.status.as_str());
        self.cache_put(&order, "refund").await;
        self.observe("refund", started);

        Ok(order)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// One page of orders in id order.
    pub async fn get_orders(&self, pagination: Pagination) -> ServiceResult<Vec<Order>> {
        self.page(pagination, "get_orders").await
    }

    /// The refunded orders within one page of orders.
    pub async fn get_all_refunds(&self, pagination: Pagination) -> ServiceResult<Vec<Order>> {
        let mut orders = self.page(pagination, "get_all_refunds").await?;
        orders.retain(|order| order.status == OrderStatus::Refunded);
        Ok(orders)
    }

    /// One page of orders, most recently active first. Orders without
    /// history come last.
    pub async fn get_history(&self, pagination: Pagination) -> ServiceResult<Vec<Order>> {
        let mut orders = self.page(pagination, "get_history").await?;
        orders.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
        Ok(orders)
    }

    pub async fn get_order_by_id(&self, order_id: i64) -> ServiceResult<Order> {
        match self.cache.get(order_id).await {
            Ok(Some(order)) => return Ok(order),
            Ok(None) => {}
            Err(e) => self.cache_fallback("get_order_by_id", &e),
        }

        let order = self.store.get_by_id(Scope::Pool, order_id).await?;
        self.cache_put(&order, "get_order_by_id").await;
        Ok(order)
    }

    /// Orders for `order_ids` in the caller's order. Unknown ids are skipped.
    pub async fn get_orders_by_ids(&self, order_ids: &[i64]) -> ServiceResult<Vec<Order>> {
        let mut found: HashMap<i64, Order> = HashMap::with_capacity(order_ids.len());
        let mut misses = Vec::new();
        let mut cache_failed = false;

        for &order_id in order_ids {
            if found.contains_key(&order_id) || misses.contains(&order_id) {
                continue;
            }

            if !cache_failed {
                match self.cache.get(order_id).await {
                    Ok(Some(order)) => {
                        found.insert(order_id, order);
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        self.cache_fallback("get_orders_by_ids", &e);
                        cache_failed = true;
                    }
                }
            }
            misses.push(order_id);
        }

        if !misses.is_empty() {
            for order in self.store.get_by_ids(Scope::Pool, &misses).await? {
                if !cache_failed {
                    self.cache_put(&order, "get_orders_by_ids").await;
                }
                found.insert(order.id, order);
            }
        }

        Ok(order_ids.iter().filter_map(|id| found.get(id).cloned()).collect())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn unit_of_work<T, F>(&self, level: IsolationLevel, f: F) -> ServiceResult<T>
    where
        F: for<'c> FnOnce(&'c mut S::Conn) -> BoxFuture<'c, ServiceResult<T>> + Send,
        T: Send,
    {
        self.tx.run(level, f).await
    }

    async fn page(&self, pagination: Pagination, operation: &'static str) -> ServiceResult<Vec<Order>> {
        match self.cache.get_list(pagination, self.store.as_ref()).await {
            Ok(orders) => Ok(orders),
            Err(e) => {
                self.cache_fallback(operation, &e);
                Ok(self.store.get_list(Scope::Pool, pagination).await?)
            }
        }
    }

    async fn cache_put(&self, order: &Order, operation: &'static str) {
        if let Err(e) = self.cache.put(order, self.cache_ttl).await {
            tracing::warn!(
                order_id = order.id,
                operation = operation,
                error = %e,
                "Cache write failed, continuing with stored state"
            );
        }
    }

    fn cache_fallback(&self, operation: &'static str, error: &dyn std::error::Error) {
        tracing::warn!(operation = operation, error = %error, "Cache read failed, falling back to store");
        self.metrics.record_cache_fallback(operation);
    }

    fn observe(&self, operation: &str, started: Instant) {
        self.metrics.observe_operation(operation, started.elapsed().as_secs_f64());
    }
}

fn ensure_recipient(order: &Order, recipient_id: i64) -> Result<(), OrderError> {
    if order.belongs_to(recipient_id) {
        Ok(())
    } else {
        Err(OrderError::WrongRecipient {
            id: order.id,
            recipient_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, MemoryOrderCache};
    use crate::storage::MemoryOrderStore;
    use crate::tx::MemoryTxManager;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    type MemoryService<C = MemoryOrderCache> = OrderService<MemoryOrderStore, MemoryTxManager, C>;

    struct Harness {
        service: MemoryService,
        store: MemoryOrderStore,
        cache: Arc<MemoryOrderCache>,
        metrics: Arc<Metrics>,
    }

    fn harness() -> Harness {
        let store = MemoryOrderStore::new();
        let cache = Arc::new(MemoryOrderCache::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let service = OrderService::new(
            Arc::new(store.clone()),
            Arc::new(store.transaction_manager()),
            cache.clone(),
            metrics.clone(),
        );
        Harness {
            service,
            store,
            cache,
            metrics,
        }
    }

    fn params(recipient_id: i64, expires_in: ChronoDuration, weight: f64) -> OrderParams {
        OrderParams {
            recipient_id,
            expiration_date: Utc::now() + expires_in,
            weight,
            worth: 100.0,
        }
    }

    async fn accept(service: &MemoryService, recipient_id: i64) -> i64 {
        service
            .accept_from_courier(params(recipient_id, ChronoDuration::days(5), 1.0), "box", false)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_accept_prices_and_records_history() {
        let h = harness();

        let id = h
            .service
            .accept_from_courier(params(1, ChronoDuration::days(5), 3.0), "box", true)
            .await
            .unwrap();

        let order = h.store.get_by_id(Scope::Pool, id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Received);
        assert_eq!(order.worth, 121.0);
        assert_eq!(order.history.len(), 1);
        assert_eq!(order.history[0].status, OrderStatus::Received);
    }

    #[tokio::test]
    async fn test_cached_and_stored_reads_agree_after_accept() {
        let h = harness();
        let id = accept(&h.service, 1).await;

        let from_cache = h.service.get_order_by_id(id).await.unwrap();
        h.cache.clear_values().await;
        let from_store = h.service.get_order_by_id(id).await.unwrap();

        assert_eq!(from_cache, from_store);
    }

    #[tokio::test]
    async fn test_overweight_parcel_writes_nothing() {
        let h = harness();

        let err = h
            .service
            .accept_from_courier(params(1, ChronoDuration::days(5), 10.01), "bag", false)
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Domain(OrderError::Overweight { .. })));
        assert!(h.store.get_all(Scope::Pool).await.unwrap().is_empty());
        assert_eq!(h.cache.index_len().await, 0);

        // The id counter was rolled back with the rest of the unit of work.
        assert_eq!(accept(&h.service, 1).await, 1);
    }

    #[tokio::test]
    async fn test_unknown_packaging_is_rejected() {
        let h = harness();

        let err = h
            .service
            .accept_from_courier(params(1, ChronoDuration::days(5), 1.0), "crate", false)
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Domain(OrderError::UnknownPackaging(_))));
    }

    #[tokio::test]
    async fn test_cache_page_matches_store_page() {
        let h = harness();
        for _ in 0..25 {
            h.store
                .add(Scope::Pool, &Order::new(&params(1, ChronoDuration::days(5), 1.0)))
                .await
                .unwrap();
        }
        assert_eq!(h.service.warm_cache().await.unwrap(), 25);

        let page = h.service.get_orders(Pagination::new(10, 10)).await.unwrap();
        let expected = h.store.get_list(Scope::Pool, Pagination::new(10, 10)).await.unwrap();

        let ids: Vec<i64> = page.iter().map(|o| o.id).collect();
        assert_eq!(ids.len(), 10);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(page, expected);
    }

    #[tokio::test]
    async fn test_return_to_courier_requires_expiry() {
        let h = harness();
        let fresh = accept(&h.service, 1).await;
        let expired = h
            .service
            .accept_from_courier(params(1, ChronoDuration::days(-1), 1.0), "bag", false)
            .await
            .unwrap();

        let err = h.service.return_to_courier(fresh).await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(OrderError::NotExpired { .. })));
        assert!(h.store.get_by_id(Scope::Pool, fresh).await.is_ok());

        h.service.return_to_courier(expired).await.unwrap();
        assert!(matches!(
            h.service.get_order_by_id(expired).await,
            Err(ServiceError::NotFound(_))
        ));
        assert_eq!(h.cache.index_len().await, 1);
    }

    #[tokio::test]
    async fn test_return_unknown_order_is_not_found() {
        let h = harness();
        assert!(matches!(
            h.service.return_to_courier(42).await,
            Err(ServiceError::NotFound(42))
        ));
    }

    #[tokio::test]
    async fn test_serve_stops_at_first_failure() {
        let h = harness();
        let first = accept(&h.service, 1).await;
        let foreign = accept(&h.service, 2).await;
        let last = accept(&h.service, 1).await;

        let err = h
            .service
            .serve_recipient(&[first, foreign, last], 1, ServeAction::Deliver)
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Domain(OrderError::WrongRecipient { .. })));
        assert_eq!(h.service.get_order_by_id(first).await.unwrap().status, OrderStatus::Delivered);
        assert_eq!(h.service.get_order_by_id(foreign).await.unwrap().status, OrderStatus::Received);
        assert_eq!(h.service.get_order_by_id(last).await.unwrap().status, OrderStatus::Received);
    }

    #[tokio::test]
    async fn test_deliver_expired_order_marks_it_expired() {
        let h = harness();
        let id = h
            .service
            .accept_from_courier(params(1, ChronoDuration::hours(-1), 1.0), "bag", false)
            .await
            .unwrap();

        h.service.deliver_orders(&[id], 1).await.unwrap();

        let order = h.store.get_by_id(Scope::Pool, id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Expired);
        assert!(order.delivered_date.is_none());
    }

    #[tokio::test]
    async fn test_second_delivery_is_rejected_without_new_history() {
        let h = harness();
        let id = accept(&h.service, 1).await;

        h.service.deliver_orders(&[id], 1).await.unwrap();
        let err = h.service.deliver_orders(&[id], 1).await.unwrap_err();

        assert!(matches!(err, ServiceError::Domain(OrderError::NotDeliverable { .. })));
        let order = h.store.get_by_id(Scope::Pool, id).await.unwrap();
        assert_eq!(order.history.len(), 2);
    }

    #[tokio::test]
    async fn test_refund_within_window() {
        let h = harness();
        let id = accept(&h.service, 1).await;
        let other = accept(&h.service, 1).await;
        h.service.deliver_orders(&[id, other], 1).await.unwrap();

        h.service.refund_orders(&[id], 1).await.unwrap();

        let refunds = h.service.get_all_refunds(Pagination::new(0, 10)).await.unwrap();
        assert_eq!(refunds.iter().map(|o| o.id).collect::<Vec<_>>(), vec![id]);
        assert!(refunds[0].refunded_date.is_some());
    }

    #[tokio::test]
    async fn test_refund_after_window_leaves_order_unchanged() {
        let h = harness();
        let id = accept(&h.service, 1).await;
        h.service.deliver_orders(&[id], 1).await.unwrap();

        let mut order = h.store.get_by_id(Scope::Pool, id).await.unwrap();
        order.delivered_date = Some(Utc::now() - ChronoDuration::days(3));
        h.store.update(Scope::Pool, &order).await.unwrap();

        let err = h.service.refund_orders(&[id], 1).await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(OrderError::NotRefundable { .. })));

        let stored = h.store.get_by_id(Scope::Pool, id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Delivered);
        assert!(stored.refunded_date.is_none());
    }

    #[tokio::test]
    async fn test_refund_by_other_recipient_is_rejected() {
        let h = harness();
        let id = accept(&h.service, 1).await;
        h.service.deliver_orders(&[id], 1).await.unwrap();

        let err = h.service.refund_orders(&[id], 9).await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(OrderError::WrongRecipient { .. })));
    }

    #[tokio::test]
    async fn test_history_is_most_recent_first() {
        let h = harness();
        let a = accept(&h.service, 1).await;
        let b = accept(&h.service, 1).await;
        let c = accept(&h.service, 1).await;
        h.service.deliver_orders(&[a], 1).await.unwrap();

        let history = h.service.get_history(Pagination::new(0, 10)).await.unwrap();
        let ids: Vec<i64> = history.iter().map(|o| o.id).collect();

        assert_eq!(ids[0], a);
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&b) && ids.contains(&c));
    }

    #[tokio::test]
    async fn test_history_puts_orders_without_records_last() {
        let h = harness();
        let bare = h
            .store
            .add(Scope::Pool, &Order::new(&params(1, ChronoDuration::days(5), 1.0)))
            .await
            .unwrap();
        let accepted = accept(&h.service, 1).await;
        h.service.warm_cache().await.unwrap();

        let history = h.service.get_history(Pagination::new(0, 10)).await.unwrap();

        assert_eq!(history.iter().map(|o| o.id).collect::<Vec<_>>(), vec![accepted, bare]);
        assert!(history[1].history.is_empty());
    }

    #[tokio::test]
    async fn test_order_missing_from_index_returns_after_warm_up() {
        let h = harness();
        let id = accept(&h.service, 1).await;
        h.cache.evict(id).await.unwrap();

        assert!(h.service.get_orders(Pagination::new(0, 10)).await.unwrap().is_empty());

        h.service.warm_cache().await.unwrap();
        let orders = h.service.get_orders(Pagination::new(0, 10)).await.unwrap();
        assert_eq!(orders.iter().map(|o| o.id).collect::<Vec<_>>(), vec![id]);
    }

    #[tokio::test]
    async fn test_read_by_id_restores_index_entry() {
        let h = harness();
        let id = accept(&h.service, 1).await;
        h.cache.evict(id).await.unwrap();

        assert_eq!(h.service.get_order_by_id(id).await.unwrap().id, id);

        let orders = h.service.get_orders(Pagination::new(0, 10)).await.unwrap();
        assert_eq!(orders.iter().map(|o| o.id).collect::<Vec<_>>(), vec![id]);
    }

    #[tokio::test]
    async fn test_get_orders_by_ids_keeps_caller_order() {
        let h = harness();
        let a = accept(&h.service, 1).await;
        let b = accept(&h.service, 1).await;
        let c = accept(&h.service, 1).await;
        h.cache.evict(b).await.unwrap();

        let orders = h.service.get_orders_by_ids(&[c, 99, a, b]).await.unwrap();

        assert_eq!(orders.iter().map(|o| o.id).collect::<Vec<_>>(), vec![c, a, b]);
        assert!(h.cache.get(b).await.unwrap().is_some());
    }

    /// A cache whose backend is always down.
    struct DownCache;

    #[async_trait]
    impl OrderCache for DownCache {
        async fn get(&self, _order_id: i64) -> CacheResult<Option<Order>> {
            Err(CacheError::Unavailable)
        }

        async fn set(&self, _order: &Order, _ttl: Duration) -> CacheResult<()> {
            Err(CacheError::Unavailable)
        }

        async fn delete(&self, _order_id: i64) -> CacheResult<()> {
            Err(CacheError::Unavailable)
        }

        async fn add_to_index(&self, _order: &Order) -> CacheResult<()> {
            Err(CacheError::Unavailable)
        }

        async fn remove_from_index(&self, _order_id: i64) -> CacheResult<()> {
            Err(CacheError::Unavailable)
        }

        async fn get_list<St: OrderStore>(&self, _pagination: Pagination, _store: &St) -> CacheResult<Vec<Order>> {
            Err(CacheError::Unavailable)
        }

        async fn populate<St: OrderStore>(&self, _store: &St, _ttl: Duration) -> CacheResult<usize> {
            Err(CacheError::Unavailable)
        }
    }

    #[tokio::test]
    async fn test_cache_outage_falls_back_to_store() {
        let store = MemoryOrderStore::new();
        let metrics = Arc::new(Metrics::new().unwrap());
        let service: MemoryService<DownCache> = OrderService::new(
            Arc::new(store.clone()),
            Arc::new(store.transaction_manager()),
            Arc::new(DownCache),
            metrics.clone(),
        );

        let id = service
            .accept_from_courier(params(1, ChronoDuration::days(5), 1.0), "bag", false)
            .await
            .unwrap();
        service.deliver_orders(&[id], 1).await.unwrap();

        assert_eq!(service.get_order_by_id(id).await.unwrap().status, OrderStatus::Delivered);
        assert_eq!(service.get_orders(Pagination::new(0, 5)).await.unwrap().len(), 1);
        assert_eq!(
            metrics.cache_fallbacks.with_label_values(&["get_orders"]).get(),
            1
        );
    }

    #[tokio::test]
    async fn test_unknown_order_is_not_found() {
        let h = harness();
        assert!(matches!(
            h.service.get_order_by_id(99).await,
            Err(ServiceError::NotFound(99))
        ));
        assert_eq!(h.metrics.cache_fallbacks.with_label_values(&["get_order_by_id"]).get(), 0);
    }
}
