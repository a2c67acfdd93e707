use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::errors::OrderError;
use super::value_objects::{OrderParams, OrderRecord, OrderStatus};

/// Days after hand-off during which a recipient may still refund.
pub const REFUND_WINDOW_DAYS: i64 = 2;

// ============================================================================
// Order Aggregate - Domain Logic
// ============================================================================
//
// Legal transitions:
//
//   Received ──deliver──> Delivered ──refund──> Refunded
//      │  └──deliver (after expiry)──> Expired
//      └──return to courier (after expiry)──> removed from storage
//
// Refunded, Expired and removed are terminal. Every successful transition
// appends exactly one record to `history`; a rejected one leaves the order
// untouched.
//
// The `*_at` methods take the clock explicitly; the plain variants read
// `Utc::now()`.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    // Identity
    pub id: i64,
    pub recipient_id: i64,

    // Lifecycle
    pub status: OrderStatus,
    pub expiration_date: DateTime<Utc>,
    pub delivered_date: Option<DateTime<Utc>>,
    pub refunded_date: Option<DateTime<Utc>>,
    pub returned_date: Option<DateTime<Utc>>,

    // Audit Trail
    #[serde(default, deserialize_with = "null_as_empty")]
    pub history: Vec<OrderRecord>,

    // Parcel
    pub weight: f64,
    pub worth: f64,
}

impl Order {
    /// A freshly received order. The id is assigned by storage on insert.
    pub fn new(params: &OrderParams) -> Self {
        Self {
            id: 0,
            recipient_id: params.recipient_id,
            status: OrderStatus::Received,
            expiration_date: params.expiration_date,
            delivered_date: None,
            refunded_date: None,
            returned_date: None,
            history: Vec::new(),
            weight: params.weight,
            worth: params.worth,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expiration_date
    }

    pub fn can_be_refunded(&self) -> bool {
        self.can_be_refunded_at(Utc::now())
    }

    pub fn can_be_refunded_at(&self, now: DateTime<Utc>) -> bool {
        if self.status != OrderStatus::Delivered {
            return false;
        }

        match self.delivered_date {
            Some(delivered) => now < delivered + Duration::days(REFUND_WINDOW_DAYS),
            None => false,
        }
    }

    pub fn belongs_to(&self, recipient_id: i64) -> bool {
        self.recipient_id == recipient_id
    }

    /// Hand the order to its recipient.
    ///
    /// Past its expiration the order moves to `Expired` instead; the caller
    /// learns which outcome happened from the returned record.
    pub fn deliver(&mut self) -> Result<OrderRecord, OrderError> {
        self.deliver_at(Utc::now())
    }

    pub fn deliver_at(&mut self, now: DateTime<Utc>) -> Result<OrderRecord, OrderError> {
        if self.status != OrderStatus::Received {
            return Err(OrderError::NotDeliverable {
                id: self.id,
                status: self.status,
            });
        }

        if self.is_expired_at(now) {
            self.status = OrderStatus::Expired;
        } else {
            self.status = OrderStatus::Delivered;
            self.delivered_date = Some(now);
        }

        Ok(self.append_record(now))
    }

    pub fn refund(&mut self) -> Result<OrderRecord, OrderError> {
        self.refund_at(Utc::now())
    }

    pub fn refund_at(&mut self, now: DateTime<Utc>) -> Result<OrderRecord, OrderError> {
        if !self.can_be_refunded_at(now) {
            return Err(OrderError::NotRefundable { id: self.id });
        }

        self.status = OrderStatus::Refunded;
        self.refunded_date = Some(now);

        Ok(self.append_record(now))
    }

    /// Record the initial `Received` entry for a freshly accepted order.
    pub fn mark_received_at(&mut self, now: DateTime<Utc>) -> OrderRecord {
        self.status = OrderStatus::Received;
        self.append_record(now)
    }

    /// Timestamp of the most recent history record, if any.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.history.last().map(|record| record.timestamp)
    }

    // History timestamps never go backwards, even if the clock does.
    fn append_record(&mut self, now: DateTime<Utc>) -> OrderRecord {
        let timestamp = match self.last_activity() {
            Some(last) if last > now => last,
            _ => now,
        };

        let record = OrderRecord::new(self.status, timestamp);
        self.history.push(record.clone());
        record
    }
}

/// Serialized orders with no records may carry `"history": null`.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<OrderRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<OrderRecord>>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// Unit Tests
// ============================================================================
