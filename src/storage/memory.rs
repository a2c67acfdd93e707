use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{OrderStore, Scope, StoreError, StoreResult};
use crate::domain::order::{Order, OrderRecord, Pagination};
use crate::tx::MemoryTxManager;

// ============================================================================
// In-Memory Order Store
// ============================================================================
//
// Keeps every order in a BTreeMap behind one async mutex. When opened with a
// path, the full order list is written to that file as a JSON array after
// each committed change, and loaded from it on open.
//
// Units of work hold the mutex for their whole duration (see
// `MemoryTxManager`), so they are serialized. Calls with `Scope::Pool` must
// not be made from inside a unit of work.
//
// ============================================================================

#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryState {
    orders: BTreeMap<i64, Order>,
    last_order_id: i64,
    last_record_id: i64,
}

impl MemoryState {
    fn from_orders(orders: Vec<Order>) -> Self {
        let last_order_id = orders.iter().map(|order| order.id).max().unwrap_or(0);
        let last_record_id = orders.iter().map(|order| order.history.len() as i64).sum();

        Self {
            orders: orders.into_iter().map(|order| (order.id, order)).collect(),
            last_order_id,
            last_record_id,
        }
    }

    /// Write the order list to `path`, if the store is file-backed.
    pub(crate) async fn save(&self, path: Option<&Path>) -> StoreResult<()> {
        let Some(path) = path else {
            return Ok(());
        };

        let orders: Vec<&Order> = self.orders.values().collect();
        let bytes = serde_json::to_vec_pretty(&orders)?;
        tokio::fs::write(path, bytes).await?;

        tracing::debug!(path = %path.display(), orders = orders.len(), "Saved order storage file");

        Ok(())
    }

    fn order_mut(&mut self, order_id: i64) -> StoreResult<&mut Order> {
        self.orders.get_mut(&order_id).ok_or(StoreError::NotFound(order_id))
    }
}

/// Exclusive access to the store state for the duration of a unit of work.
pub struct MemoryConn {
    guard: OwnedMutexGuard<MemoryState>,
}

impl MemoryConn {
    pub(crate) fn new(guard: OwnedMutexGuard<MemoryState>) -> Self {
        Self { guard }
    }

    pub(crate) fn state(&self) -> &MemoryState {
        &self.guard
    }

    pub(crate) fn state_mut(&mut self) -> &mut MemoryState {
        &mut self.guard
    }
}

#[derive(Clone, Default)]
pub struct MemoryOrderStore {
    state: Arc<Mutex<MemoryState>>,
    path: Option<Arc<PathBuf>>,
}

impl MemoryOrderStore {
    /// A store with no backing file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load orders from a JSON file. A missing file starts an empty store
    /// that will be created on the first committed change.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let orders = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => serde_json::from_slice::<Vec<Order>>(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(path = %path.display(), orders = orders.len(), "Opened in-memory order storage");

        Ok(Self {
            state: Arc::new(Mutex::new(MemoryState::from_orders(orders))),
            path: Some(Arc::new(path)),
        })
    }

    /// Coordinator handing out units of work over this store's state.
    pub fn transaction_manager(&self) -> MemoryTxManager {
        MemoryTxManager::new(Arc::clone(&self.state), self.path.clone())
    }

    async fn read<R, F>(&self, scope: Scope<'_, MemoryConn>, f: F) -> StoreResult<R>
    where
        F: FnOnce(&MemoryState) -> StoreResult<R> + Send,
        R: Send,
    {
        match scope {
            Scope::Tx(conn) => f(conn.state()),
            Scope::Pool => {
                let guard = self.state.lock().await;
                f(&*guard)
            }
        }
    }

    // Pool-scoped writes are saved immediately; transactional writes are
    // saved by the coordinator on commit.
    async fn write<R, F>(&self, scope: Scope<'_, MemoryConn>, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut MemoryState) -> StoreResult<R> + Send,
        R: Send,
    {
        match scope {
            Scope::Tx(conn) => f(conn.state_mut()),
            Scope::Pool => {
                let mut guard = self.state.lock().await;
                let snapshot = guard.clone();
                let result = f(&mut *guard)?;
                if let Err(e) = guard.save(self.path.as_deref().map(PathBuf::as_path)).await {
                    *guard = snapshot;
                    return Err(e);
                }
                Ok(result)
            }
        }
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    type Conn = MemoryConn;

    async fn add(&self, scope: Scope<'_, MemoryConn>, order: &Order) -> StoreResult<i64> {
        self.write(scope, |state| {
            state.last_order_id += 1;
            let id = state.last_order_id;

            let mut stored = order.clone();
            stored.id = id;
            stored.history.clear();
            state.orders.insert(id, stored);

            Ok(id)
        })
        .await
    }

    async fn add_history_record(
        &self,
        scope: Scope<'_, MemoryConn>,
        record: &OrderRecord,
        order_id: i64,
    ) -> StoreResult<i64> {
        self.write(scope, |state| {
            let order = state.order_mut(order_id)?;
            let position = order
                .history
                .partition_point(|existing| existing.timestamp <= record.timestamp);
            order.history.insert(position, record.clone());

            state.last_record_id += 1;
            Ok(state.last_record_id)
        })
        .await
    }

    async fn update(&self, scope: Scope<'_, MemoryConn>, order: &Order) -> StoreResult<()> {
        self.write(scope, |state| {
            let stored = state.order_mut(order.id)?;
            let history = std::mem::take(&mut stored.history);
            *stored = order.clone();
            stored.history = history;
            Ok(())
        })
        .await
    }

    async fn delete(&self, scope: Scope<'_, MemoryConn>, order_id: i64) -> StoreResult<()> {
        self.write(scope, |state| {
            state
                .orders
                .remove(&order_id)
                .map(|_| ())
                .ok_or(StoreError::NotFound(order_id))
        })
        .await
    }

    async fn get_by_id(&self, scope: Scope<'_, MemoryConn>, order_id: i64) -> StoreResult<Order> {
        self.read(scope, |state| {
            state
                .orders
                .get(&order_id)
                .cloned()
                .ok_or(StoreError::NotFound(order_id))
        })
        .await
    }

    async fn get_by_ids(&self, scope: Scope<'_, MemoryConn>, order_ids: &[i64]) -> StoreResult<Vec<Order>> {
        if order_ids.is_empty() {
            return Ok(Vec::new());
        }

        let wanted: BTreeSet<i64> = order_ids.iter().copied().collect();

        self.read(scope, |state| {
            Ok(wanted
                .iter()
                .filter_map(|id| state.orders.get(id).cloned())
                .collect())
        })
        .await
    }

    async fn get_list(&self, scope: Scope<'_, MemoryConn>, pagination: Pagination) -> StoreResult<Vec<Order>> {
        self.read(scope, |state| {
            Ok(state
                .orders
                .values()
                .skip(pagination.offset as usize)
                .take(pagination.limit as usize)
                .cloned()
                .collect())
        })
        .await
    }

    async fn get_all(&self, scope: Scope<'_, MemoryConn>) -> StoreResult<Vec<Order>> {
        self.read(scope, |state| Ok(state.orders.values().cloned().collect()))
            .await
    }
}
