// ============================================================================
// Order Storage
// ============================================================================
//
// The persistence contract for orders and the two backends implementing it:
// - postgres: the relational source of truth
// - memory:   process-local storage with optional JSON file persistence
//
// Every operation takes a `Scope`. `Scope::Pool` runs against the shared
// pool in autocommit mode; `Scope::Tx` routes the call to the open unit of
// work handed out by the matching `TransactionManager`.
//
// ============================================================================

pub mod audit_log;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::domain::order::{Order, OrderRecord, Pagination};

pub use audit_log::PgAuditLogRepository;
pub use memory::{MemoryConn, MemoryOrderStore};
pub use postgres::PgOrderStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Order {0} not found")]
    NotFound(i64),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to decode stored order: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Where a storage call executes.
#[derive(Debug)]
pub enum Scope<'c, C> {
    /// Autocommit against the shared pool.
    Pool,
    /// Inside the unit of work that owns this connection.
    Tx(&'c mut C),
}

#[async_trait]
pub trait OrderStore: Send + Sync + 'static {
    /// Connection type handed to units of work by the matching coordinator.
    type Conn: Send;

    /// Insert a new order and return its assigned id. History is not written.
    async fn add(&self, scope: Scope<'_, Self::Conn>, order: &Order) -> StoreResult<i64>;

    /// Append one history record to an existing order.
    async fn add_history_record(
        &self,
        scope: Scope<'_, Self::Conn>,
        record: &OrderRecord,
        order_id: i64,
    ) -> StoreResult<i64>;

    /// Overwrite the order's mutable columns. History is not touched.
    async fn update(&self, scope: Scope<'_, Self::Conn>, order: &Order) -> StoreResult<()>;

    /// Remove the order and its history. Fails with `NotFound` when nothing was deleted.
    async fn delete(&self, scope: Scope<'_, Self::Conn>, order_id: i64) -> StoreResult<()>;

    async fn get_by_id(&self, scope: Scope<'_, Self::Conn>, order_id: i64) -> StoreResult<Order>;

    /// Orders for the given ids, ordered by id. Unknown ids are skipped.
    async fn get_by_ids(&self, scope: Scope<'_, Self::Conn>, order_ids: &[i64]) -> StoreResult<Vec<Order>>;

    /// One page of orders ordered by id ascending.
    async fn get_list(&self, scope: Scope<'_, Self::Conn>, pagination: Pagination) -> StoreResult<Vec<Order>>;

    /// Every order, used to warm the cache.
    async fn get_all(&self, scope: Scope<'_, Self::Conn>) -> StoreResult<Vec<Order>>;
}
