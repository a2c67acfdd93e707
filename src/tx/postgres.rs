use std::time::Instant;

use futures_util::future::BoxFuture;
use sqlx::{PgConnection, PgPool};

use super::{IsolationLevel, TransactionManager};
use crate::storage::StoreError;

/// Runs units of work as PostgreSQL transactions on the shared pool.
///
/// The isolation level is set as the first statement of each transaction.
/// `sqlx::Transaction` rolls back on drop unless committed, which covers a
/// panicking or cancelled callback.
#[derive(Clone)]
pub struct PgTxManager {
    pool: PgPool,
}

impl PgTxManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl TransactionManager for PgTxManager {
    type Conn = PgConnection;

    fn run<'a, F, T, E>(&'a self, level: IsolationLevel, f: F) -> BoxFuture<'a, Result<T, E>>
    where
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, E>> + Send + 'a,
        T: Send + 'a,
        E: From<StoreError> + Send + 'a,
    {
        Box::pin(async move {
            let started = Instant::now();

            let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

            sqlx::query(&format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql()))
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from)?;

            match f(&mut *tx).await {
                Ok(value) => {
                    tx.commit().await.map_err(StoreError::from)?;
                    tracing::debug!(
                        isolation = %level,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Transaction committed"
                    );
                    Ok(value)
                }
                Err(err) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        tracing::warn!(
                            isolation = %level,
                            error = %rollback_err,
                            "Transaction rollback failed"
                        );
                    } else {
                        tracing::debug!(isolation = %level, "Transaction rolled back");
                    }
                    Err(err)
                }
            }
        })
    }
}
