// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Pure domain types with no infrastructure dependencies:
// - order: the order aggregate, its state machine and packaging pricing
// - audit: the audit event recorded for each inbound request
//
// ============================================================================

pub mod audit;
pub mod order;
