mod server;

use prometheus::{Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Covers:
// - Audit pipeline throughput (received, persisted, failed)
// - Batch flushes by reason and batch sizes
// - Cache fallbacks to the store, by service operation
// - Order status transitions and service operation latency
//
// All metrics are registered with one Registry scraped via /metrics.
// ============================================================================

/// Why a batcher handed its batch to the persisters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Capacity,
    Timer,
    Shutdown,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::Capacity => "capacity",
            FlushReason::Timer => "timer",
            FlushReason::Shutdown => "shutdown",
        }
    }
}

pub struct Metrics {
    registry: Registry,

    // Audit pipeline
    pub audit_events_received: IntCounter,
    pub audit_events_persisted: IntCounterVec,
    pub audit_events_failed: IntCounterVec,
    pub audit_batches_flushed: IntCounterVec,
    pub audit_batch_size: Histogram,

    // Order service
    pub cache_fallbacks: IntCounterVec,
    pub order_transitions: IntCounterVec,
    pub operation_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let audit_events_received = IntCounter::new(
            "audit_events_received_total",
            "Audit events accepted into the pipeline",
        )?;
        registry.register(Box::new(audit_events_received.clone()))?;

        let audit_events_persisted = IntCounterVec::new(
            Opts::new("audit_events_persisted_total", "Audit events written by a sink"),
            &["sink"],
        )?;
        registry.register(Box::new(audit_events_persisted.clone()))?;

        let audit_events_failed = IntCounterVec::new(
            Opts::new("audit_events_failed_total", "Audit events a sink failed to write"),
            &["sink"],
        )?;
        registry.register(Box::new(audit_events_failed.clone()))?;

        let audit_batches_flushed = IntCounterVec::new(
            Opts::new("audit_batches_flushed_total", "Audit batches handed to persisters"),
            &["reason"],
        )?;
        registry.register(Box::new(audit_batches_flushed.clone()))?;

        let audit_batch_size = Histogram::with_opts(
            HistogramOpts::new("audit_batch_size", "Events per flushed audit batch")
                .buckets(vec![1.0, 2.0, 3.0, 4.0, 5.0, 10.0]),
        )?;
        registry.register(Box::new(audit_batch_size.clone()))?;

        let cache_fallbacks = IntCounterVec::new(
            Opts::new("order_cache_fallbacks_total", "Reads served by the store after a cache error"),
            &["operation"],
        )?;
        registry.register(Box::new(cache_fallbacks.clone()))?;

        let order_transitions = IntCounterVec::new(
            Opts::new("order_transitions_total", "Committed order status transitions"),
            &["status"],
        )?;
        registry.register(Box::new(order_transitions.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new("order_operation_duration_seconds", "Order service operation duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            registry,
            audit_events_received,
            audit_events_persisted,
            audit_events_failed,
            audit_batches_flushed,
            audit_batch_size,
            cache_fallbacks,
            order_transitions,
            operation_duration,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_batch_flush(&self, reason: FlushReason, size: usize) {
        self.audit_batches_flushed.with_label_values(&[reason.as_str()]).inc();
        self.audit_batch_size.observe(size as f64);
    }

    pub fn record_persist(&self, sink: &str, success: bool) {
        if success {
            self.audit_events_persisted.with_label_values(&[sink]).inc();
        } else {
            self.audit_events_failed.with_label_values(&[sink]).inc();
        }
    }

    pub fn record_cache_fallback(&self, operation: &str) {
        self.cache_fallbacks.with_label_values(&[operation]).inc();
    }

    pub fn record_transition(&self, status: &str) {
        self.order_transitions.with_label_values(&[status]).inc();
    }

    pub fn observe_operation(&self, operation: &str, duration_secs: f64) {
        self.operation_duration.with_label_values(&[operation]).observe(duration_secs);
    }
}
