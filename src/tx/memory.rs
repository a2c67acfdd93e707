use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::Mutex;

use super::{IsolationLevel, TransactionManager};
use crate::storage::memory::MemoryState;
use crate::storage::{MemoryConn, StoreError};

/// Units of work over a `MemoryOrderStore`.
///
/// Each unit of work holds the store lock from begin to end, which is at
/// least as strong as any requested isolation level. A snapshot taken at
/// begin is restored when the callback fails or the file save on commit
/// fails.
#[derive(Clone)]
pub struct MemoryTxManager {
    state: Arc<Mutex<MemoryState>>,
    path: Option<Arc<PathBuf>>,
}

impl MemoryTxManager {
    pub(crate) fn new(state: Arc<Mutex<MemoryState>>, path: Option<Arc<PathBuf>>) -> Self {
        Self { state, path }
    }
}

impl TransactionManager for MemoryTxManager {
    type Conn = MemoryConn;

    fn run<'a, F, T, E>(&'a self, level: IsolationLevel, f: F) -> BoxFuture<'a, Result<T, E>>
    where
        F: for<'c> FnOnce(&'c mut MemoryConn) -> BoxFuture<'c, Result<T, E>> + Send + 'a,
        T: Send + 'a,
        E: From<StoreError> + Send + 'a,
    {
        Box::pin(async move {
            let guard = Arc::clone(&self.state).lock_owned().await;
            let snapshot = guard.clone();
            let mut conn = MemoryConn::new(guard);

            match f(&mut conn).await {
                Ok(value) => {
                    let path = self.path.as_deref().map(PathBuf::as_path);
                    if let Err(e) = conn.state().save(path).await {
                        *conn.state_mut() = snapshot;
                        return Err(E::from(e));
                    }
                    tracing::debug!(isolation = %level, "In-memory unit of work committed");
                    Ok(value)
                }
                Err(err) => {
                    *conn.state_mut() = snapshot;
                    tracing::debug!(isolation = %level, "In-memory unit of work rolled back");
                    Err(err)
                }
            }
        })
    }
}
