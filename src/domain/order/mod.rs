// ============================================================================
// Order Domain - Parcel Lifecycle at the Pickup Point
// ============================================================================
//
// This module contains ALL Order-specific code:
// - Value objects (OrderStatus, OrderRecord, OrderParams, Pagination)
// - Errors (OrderError enum)
// - Aggregate (Order with its state machine)
// - Packaging pricer
//
// Nothing here touches storage, cache or the runtime.
//
// ============================================================================

pub mod value_objects;
pub mod errors;
pub mod aggregate;
pub mod packaging;

// Re-export for convenience
pub use value_objects::*;
pub use errors::*;
pub use aggregate::*;
pub use packaging::*;
