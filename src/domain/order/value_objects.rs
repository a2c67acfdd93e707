use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::OrderError;

// ============================================================================
// Order Value Objects
// ============================================================================

/// Lifecycle status of a parcel held at the pickup point.
///
/// An order returned to the courier is removed from storage entirely, so
/// there is no variant for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    #[serde(rename = "received")]
    Received,
    #[serde(rename = "delivered")]
    Delivered,
    #[serde(rename = "refunded")]
    Refunded,
    #[serde(rename = "storage_ended")]
    Expired,
}

impl OrderStatus {
    /// Name used in the relational `status` column and in JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Received => "received",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Expired => "storage_ended",
        }
    }

    /// Human description stored alongside each history record.
    pub fn description(&self) -> &'static str {
        match self {
            OrderStatus::Received => "Order received from courier",
            OrderStatus::Delivered => "Order handed to recipient",
            OrderStatus::Refunded => "Order refunded by recipient",
            OrderStatus::Expired => "Order storage period has ended",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Refunded | OrderStatus::Expired)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(OrderStatus::Received),
            "delivered" => Ok(OrderStatus::Delivered),
            "refunded" => Ok(OrderStatus::Refunded),
            "storage_ended" => Ok(OrderStatus::Expired),
            other => Err(OrderError::UnknownStatus(other.to_string())),
        }
    }
}

/// One entry of an order's append-only audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub timestamp: DateTime<Utc>,
    pub status: OrderStatus,
    pub description: String,
}

impl OrderRecord {
    pub fn new(status: OrderStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            status,
            description: status.description().to_string(),
        }
    }
}

/// Courier-supplied data for a parcel being accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderParams {
    pub recipient_id: i64,
    pub expiration_date: DateTime<Utc>,
    pub weight: f64,
    pub worth: f64,
}

/// Offset/limit window over orders ordered by id ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub offset: u32,
    pub limit: u32,
}

impl Pagination {
    pub fn new(offset: u32, limit: u32) -> Self {
        Self { offset, limit }
    }

    pub fn is_empty(&self) -> bool {
        self.limit == 0
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self { offset: 0, limit: 20 }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
