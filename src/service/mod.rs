// ============================================================================
// Order Service
// ============================================================================
//
// Orchestrates the order lifecycle on top of storage, the transaction
// coordinator and the cache:
//
// - every mutation runs inside one unit of work; the cache is written only
//   after that unit of work has committed
// - cache failures never fail an operation: writes are logged and dropped,
//   reads fall back to the store
// - guard failures (wrong status, wrong recipient, refund window, overweight)
//   are returned as `ServiceError::Domain`, missing orders as `NotFound`
//
// ============================================================================

mod order_service;

use std::fmt;
use std::str::FromStr;

use crate::domain::order::OrderError;
use crate::storage::StoreError;

pub use order_service::OrderService;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] OrderError),

    #[error("Order {0} not found")]
    NotFound(i64),

    #[error("Storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ServiceError::NotFound(id),
            other => ServiceError::Store(other),
        }
    }
}

/// What a recipient does with the orders they came for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeAction {
    Deliver,
    Refund,
}

impl ServeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServeAction::Deliver => "deliver",
            ServeAction::Refund => "refund",
        }
    }
}

impl fmt::Display for ServeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServeAction {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deliver" => Ok(ServeAction::Deliver),
            "refund" => Ok(ServeAction::Refund),
            other => Err(OrderError::UnknownAction(other.to_string())),
        }
    }
}
