// ============================================================================
// Audit Pipeline
// ============================================================================
//
//   AuditSender ──> jobs ──> batcher × N ──> results ──> persister × M ──> AuditSink
//
// Both queues are bounded: a full `jobs` queue blocks `AuditSender::send`,
// which is the pipeline's admission control.
//
// Batcher: accumulates events into a batch of `batch_capacity`.
// - batch full            -> flush now, disarm the timer
// - otherwise             -> (re)arm the inactivity timer to `flush_after`
//                            from this arrival
// - timer fires           -> flush the partial batch
// - cancellation / closed -> flush the partial batch within `drain_timeout`
//                            and stop
//
// Persister: takes one event at a time from `results` and writes it to the
// sink. A failed write is logged and counted, then the next event is taken.
// Persisters stop once every batcher has stopped and `results` is empty.
//
// ============================================================================

mod sink;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::domain::audit::AuditEvent;
use crate::metrics::{FlushReason, Metrics};

pub use sink::LogAuditSink;

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Audit pipeline is shut down")]
    Closed,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync + 'static {
    async fn persist(&self, event: &AuditEvent) -> Result<(), AuditError>;

    /// Label used in logs and metrics.
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
pub struct AuditPipelineConfig {
    pub batchers: usize,
    pub persisters: usize,
    /// Capacity of each of the two queues
    pub queue_capacity: usize,
    pub batch_capacity: usize,
    /// Quiet period after the last arrival before a partial batch is flushed
    pub flush_after: Duration,
    /// Upper bound on the shutdown flush and on waiting for persisters
    pub drain_timeout: Duration,
}

impl Default for AuditPipelineConfig {
    fn default() -> Self {
        Self {
            batchers: 2,
            persisters: 2,
            queue_capacity: 5,
            batch_capacity: 5,
            flush_after: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Write side of the pipeline handed to the transport layer.
#[derive(Clone)]
pub struct AuditSender {
    jobs: mpsc::Sender<AuditEvent>,
    metrics: Arc<Metrics>,
}

impl AuditSender {
    /// Enqueue one event, waiting while the queue is full.
    pub async fn send(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.jobs.send(event).await.map_err(|_| AuditError::Closed)?;
        self.metrics.audit_events_received.inc();
        Ok(())
    }
}

pub struct AuditPipeline {
    sender: AuditSender,
    cancel: CancellationToken,
    drain_timeout: Duration,
    batchers: Vec<JoinHandle<()>>,
    persisters: Vec<JoinHandle<()>>,
}

impl AuditPipeline {
    pub fn spawn(
        config: AuditPipelineConfig,
        sink: Arc<dyn AuditSink>,
        metrics: Arc<Metrics>,
        cancel: CancellationToken,
    ) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (results_tx, results_rx) = mpsc::channel(config.queue_capacity.max(1));
        let jobs_rx = Arc::new(Mutex::new(jobs_rx));
        let results_rx = Arc::new(Mutex::new(results_rx));

        let batchers = (0..config.batchers.max(1))
            .map(|worker| {
                let batcher = Batcher {
                    worker,
                    jobs: Arc::clone(&jobs_rx),
                    results: results_tx.clone(),
                    cancel: cancel.clone(),
                    batch_capacity: config.batch_capacity.max(1),
                    flush_after: config.flush_after,
                    drain_timeout: config.drain_timeout,
                    metrics: Arc::clone(&metrics),
                };
                tokio::spawn(batcher.run())
            })
            .collect();

        // Persisters see `results` close once every batcher's sender is gone.
        drop(results_tx);

        let persisters = (0..config.persisters.max(1))
            .map(|worker| {
                tokio::spawn(run_persister(
                    worker,
                    Arc::clone(&results_rx),
                    Arc::clone(&sink),
                    Arc::clone(&metrics),
                ))
            })
            .collect();

        tracing::info!(
            batchers = config.batchers,
            persisters = config.persisters,
            sink = sink.name(),
            "Audit pipeline started"
        );

        Self {
            sender: AuditSender { jobs: jobs_tx, metrics },
            cancel,
            drain_timeout: config.drain_timeout,
            batchers,
            persisters,
        }
    }

    pub fn sender(&self) -> AuditSender {
        self.sender.clone()
    }

    /// Signal cancellation, let batchers flush, then wait for persisters to
    /// empty `results`. Each stage gets `drain_timeout`; workers still busy
    /// after that are aborted and their remaining events are lost.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        drop(self.sender);

        // A batcher stuck mid-flush behind a full `results` queue never sees
        // the cancellation, so batchers are bounded too.
        join_within(self.batchers, self.drain_timeout, "batcher").await;
        join_within(self.persisters, self.drain_timeout, "persister").await;

        tracing::info!("Audit pipeline stopped");
    }
}

async fn join_within(handles: Vec<JoinHandle<()>>, limit: Duration, role: &'static str) {
    let deadline = Instant::now() + limit;
    for mut handle in handles {
        match timeout(deadline.saturating_duration_since(Instant::now()), &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(role = role, error = %e, "Audit worker panicked"),
            Err(_) => {
                tracing::warn!(role = role, "Audit worker did not drain in time, aborting");
                handle.abort();
            }
        }
    }
}

struct Batcher {
    worker: usize,
    jobs: Arc<Mutex<mpsc::Receiver<AuditEvent>>>,
    results: mpsc::Sender<AuditEvent>,
    cancel: CancellationToken,
    batch_capacity: usize,
    flush_after: Duration,
    drain_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl Batcher {
    async fn run(self) {
        tracing::debug!(worker = self.worker, "Audit batcher started");

        let mut batch: Vec<AuditEvent> = Vec::with_capacity(self.batch_capacity);
        let timer = sleep(self.flush_after);
        tokio::pin!(timer);
        let mut armed = false;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    self.drain(&mut batch).await;
                    break;
                }

                _ = &mut timer, if armed => {
                    armed = false;
                    self.flush(&mut batch, FlushReason::Timer).await;
                }

                event = next_event(&self.jobs) => {
                    let Some(event) = event else {
                        tracing::debug!(worker = self.worker, "Audit job queue closed");
                        self.drain(&mut batch).await;
                        break;
                    };

                    batch.push(event);
                    if batch.len() >= self.batch_capacity {
                        armed = false;
                        self.flush(&mut batch, FlushReason::Capacity).await;
                    } else {
                        timer.as_mut().reset(Instant::now() + self.flush_after);
                        armed = true;
                    }
                }
            }
        }

        tracing::debug!(worker = self.worker, "Audit batcher stopped");
    }

    async fn flush(&self, batch: &mut Vec<AuditEvent>, reason: FlushReason) {
        if batch.is_empty() {
            return;
        }

        let size = batch.len();
        tracing::debug!(worker = self.worker, size = size, reason = reason.as_str(), "Flushing audit batch");
        self.metrics.record_batch_flush(reason, size);

        for event in batch.drain(..) {
            if self.results.send(event).await.is_err() {
                tracing::warn!(worker = self.worker, "Audit results queue closed, dropping batch");
                return;
            }
        }
    }

    /// Shutdown flush. Gives up after `drain_timeout` if persisters cannot
    /// keep up; whatever is left in the batch is dropped.
    async fn drain(&self, batch: &mut Vec<AuditEvent>) {
        let pending = batch.len();
        if timeout(self.drain_timeout, self.flush(batch, FlushReason::Shutdown))
            .await
            .is_err()
        {
            tracing::warn!(
                worker = self.worker,
                pending = pending,
                "Audit shutdown flush timed out, events dropped"
            );
        }
    }
}

async fn next_event(jobs: &Mutex<mpsc::Receiver<AuditEvent>>) -> Option<AuditEvent> {
    jobs.lock().await.recv().await
}

async fn run_persister(
    worker: usize,
    results: Arc<Mutex<mpsc::Receiver<AuditEvent>>>,
    sink: Arc<dyn AuditSink>,
    metrics: Arc<Metrics>,
) {
    tracing::debug!(worker = worker, sink = sink.name(), "Audit persister started");

    while let Some(event) = next_event(&results).await {
        match sink.persist(&event).await {
            Ok(()) => metrics.record_persist(sink.name(), true),
            Err(e) => {
                metrics.record_persist(sink.name(), false);
                tracing::error!(
                    worker = worker,
                    request_id = %event.request_id,
                    error = %e,
                    "Failed to persist audit event"
                );
            }
        }
    }

    tracing::debug!(worker = worker, "Audit persister stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        events: std::sync::Mutex<Vec<AuditEvent>>,
    }

    impl RecordingSink {
        fn paths(&self) -> Vec<String> {
            self.events.lock().unwrap().iter().map(|e| e.path.clone()).collect()
        }
    }

    #[async_trait]
    impl AuditSink for RecordingSink {
        async fn persist(&self, event: &AuditEvent) -> Result<(), AuditError> {
            if event.path == "/fail" {
                return Err(AuditError::Closed);
            }
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn single_batcher() -> AuditPipelineConfig {
        AuditPipelineConfig {
            batchers: 1,
            persisters: 2,
            queue_capacity: 5,
            ..Default::default()
        }
    }

    fn start(config: AuditPipelineConfig) -> (AuditPipeline, Arc<RecordingSink>, Arc<Metrics>) {
        let sink = Arc::new(RecordingSink::default());
        let metrics = Arc::new(Metrics::new().unwrap());
        let pipeline = AuditPipeline::spawn(
            config,
            sink.clone() as Arc<dyn AuditSink>,
            metrics.clone(),
            CancellationToken::new(),
        );
        (pipeline, sink, metrics)
    }

    fn event(path: &str) -> AuditEvent {
        AuditEvent::new("POST", path)
    }

    fn flushes(metrics: &Metrics, reason: FlushReason) -> u64 {
        metrics.audit_batches_flushed.with_label_values(&[reason.as_str()]).get()
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_batch_flushes_before_timer() {
        let (pipeline, sink, metrics) = start(single_batcher());
        let sender = pipeline.sender();

        for i in 0..5 {
            sender.send(event(&format!("/orders/{}", i))).await.unwrap();
        }
        sleep(Duration::from_millis(100)).await;

        assert_eq!(sink.paths().len(), 5);
        assert_eq!(flushes(&metrics, FlushReason::Capacity), 1);
        assert_eq!(flushes(&metrics, FlushReason::Timer), 0);

        pipeline.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_batch_flushes_after_quiet_period() {
        let (pipeline, sink, metrics) = start(single_batcher());
        let sender = pipeline.sender();

        sender.send(event("/a")).await.unwrap();
        sender.send(event("/b")).await.unwrap();

        sleep(Duration::from_millis(4_900)).await;
        assert!(sink.paths().is_empty());

        sleep(Duration::from_millis(200)).await;
        let mut paths = sink.paths();
        paths.sort();
        assert_eq!(paths, vec!["/a", "/b"]);
        assert_eq!(flushes(&metrics, FlushReason::Timer), 1);

        pipeline.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_arrival_restarts_quiet_period() {
        let (pipeline, sink, _metrics) = start(single_batcher());
        let sender = pipeline.sender();

        sender.send(event("/a")).await.unwrap();
        sleep(Duration::from_secs(4)).await;
        sender.send(event("/b")).await.unwrap();

        // 8s after the first arrival but only 4s after the second.
        sleep(Duration::from_secs(4)).await;
        assert!(sink.paths().is_empty());

        sleep(Duration::from_millis(1_100)).await;
        assert_eq!(sink.paths().len(), 2);

        pipeline.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_partial_batch() {
        let (pipeline, sink, metrics) = start(single_batcher());
        let sender = pipeline.sender();

        sender.send(event("/a")).await.unwrap();
        sender.send(event("/b")).await.unwrap();
        sleep(Duration::from_millis(10)).await;

        pipeline.shutdown().await;

        assert_eq!(sink.paths().len(), 2);
        assert_eq!(flushes(&metrics, FlushReason::Shutdown), 1);
        assert_eq!(flushes(&metrics, FlushReason::Timer), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_does_not_block_later_events() {
        let (pipeline, sink, metrics) = start(single_batcher());
        let sender = pipeline.sender();

        for path in ["/a", "/fail", "/b", "/c", "/d"] {
            sender.send(event(path)).await.unwrap();
        }
        sleep(Duration::from_millis(100)).await;

        assert_eq!(sink.paths().len(), 4);
        assert_eq!(metrics.audit_events_failed.with_label_values(&["recording"]).get(), 1);

        pipeline.shutdown().await;
    }

    /// Accepts events and never finishes writing them.
    struct StuckSink;

    #[async_trait]
    impl AuditSink for StuckSink {
        async fn persist(&self, _event: &AuditEvent) -> Result<(), AuditError> {
            std::future::pending().await
        }

        fn name(&self) -> &'static str {
            "stuck"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queues_block_sender() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let config = AuditPipelineConfig {
            batchers: 1,
            persisters: 1,
            queue_capacity: 1,
            ..Default::default()
        };
        let pipeline = AuditPipeline::spawn(config, Arc::new(StuckSink), metrics.clone(), CancellationToken::new());
        let sender = pipeline.sender();

        let mut accepted = 0;
        for i in 0..20 {
            let send = sender.send(event(&format!("/orders/{}", i)));
            if timeout(Duration::from_secs(60), send).await.is_err() {
                break;
            }
            accepted += 1;
        }

        // Bounded by the two queues, one batch and the write in flight.
        assert!(accepted > 0 && accepted < 20, "accepted {}", accepted);
        assert_eq!(metrics.audit_events_received.get(), accepted);

        // Still blocked, well past the flush timer.
        assert!(timeout(Duration::from_secs(60), sender.send(event("/late"))).await.is_err());

        pipeline.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_after_shutdown_is_rejected() {
        let (pipeline, _sink, _metrics) = start(AuditPipelineConfig::default());
        let sender = pipeline.sender();

        pipeline.shutdown().await;

        assert!(matches!(sender.send(event("/late")).await, Err(AuditError::Closed)));
    }
}
