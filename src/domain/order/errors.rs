use super::value_objects::OrderStatus;

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("Order {id} cannot be delivered from status {status}")]
    NotDeliverable { id: i64, status: OrderStatus },

    #[error("Order {id} cannot be refunded: not delivered or refund window has elapsed")]
    NotRefundable { id: i64 },

    #[error("Order {id} cannot be returned to courier: storage period has not ended")]
    NotExpired { id: i64 },

    #[error("Order {id} does not belong to recipient {recipient_id}")]
    WrongRecipient { id: i64, recipient_id: i64 },

    #[error("Weight {weight}kg exceeds the {limit}kg limit for {packaging} packaging")]
    Overweight {
        packaging: &'static str,
        weight: f64,
        limit: f64,
    },

    #[error("Unknown packaging type: {0}")]
    UnknownPackaging(String),

    #[error("Unknown recipient action: {0}")]
    UnknownAction(String),

    #[error("Unknown order status: {0}")]
    UnknownStatus(String),
}
