// ============================================================================
// Transaction Coordinator (Unit of Work)
// ============================================================================
//
// A unit of work is a callback run under one transaction at one isolation
// level. The callback receives the transaction's connection and passes it to
// storage calls as `Scope::Tx`, so every call it makes joins the same
// transaction.
//
// Contract for every implementation:
// - begin at the requested isolation level
// - run the callback
// - commit if it returned Ok, otherwise roll back and return its error
// - a transaction that was neither committed nor rolled back explicitly
//   (callback panicked, future dropped) is rolled back when released
//
// Nesting is not supported: a callback must not start another unit of work.
//
// ============================================================================

mod memory;
mod postgres;

use std::fmt;

use futures_util::future::BoxFuture;

use crate::storage::StoreError;

pub use memory::MemoryTxManager;
pub use postgres::PgTxManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

pub trait TransactionManager: Send + Sync + 'static {
    /// Connection handed to the callback; storage accepts it via `Scope::Tx`.
    type Conn: Send;

    fn run<'a, F, T, E>(&'a self, level: IsolationLevel, f: F) -> BoxFuture<'a, Result<T, E>>
    where
        F: for<'c> FnOnce(&'c mut Self::Conn) -> BoxFuture<'c, Result<T, E>> + Send + 'a,
        T: Send + 'a,
        E: From<StoreError> + Send + 'a;

    fn run_read_committed<'a, F, T, E>(&'a self, f: F) -> BoxFuture<'a, Result<T, E>>
    where
        F: for<'c> FnOnce(&'c mut Self::Conn) -> BoxFuture<'c, Result<T, E>> + Send + 'a,
        T: Send + 'a,
        E: From<StoreError> + Send + 'a,
    {
        self.run(IsolationLevel::ReadCommitted, f)
    }

    fn run_repeatable_read<'a, F, T, E>(&'a self, f: F) -> BoxFuture<'a, Result<T, E>>
    where
        F: for<'c> FnOnce(&'c mut Self::Conn) -> BoxFuture<'c, Result<T, E>> + Send + 'a,
        T: Send + 'a,
        E: From<StoreError> + Send + 'a,
    {
        self.run(IsolationLevel::RepeatableRead, f)
    }

    fn run_serializable<'a, F, T, E>(&'a self, f: F) -> BoxFuture<'a, Result<T, E>>
    where
        F: for<'c> FnOnce(&'c mut Self::Conn) -> BoxFuture<'c, Result<T, E>> + Send + 'a,
        T: Send + 'a,
        E: From<StoreError> + Send + 'a,
    {
        self.run(IsolationLevel::Serializable, f)
    }
}
