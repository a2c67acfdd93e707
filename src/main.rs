use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use pickup_point::audit::{AuditPipeline, AuditSender, AuditSink, LogAuditSink};
use pickup_point::cache::{MemoryOrderCache, OrderCache, RedisOrderCache};
use pickup_point::config::{AuditSinkKind, CacheBackend, Config, StorageBackend};
use pickup_point::domain::audit::AuditEvent;
use pickup_point::domain::order::{OrderParams, Pagination};
use pickup_point::metrics::{self, Metrics};
use pickup_point::service::{OrderService, ServeAction};
use pickup_point::storage::{MemoryOrderStore, OrderStore, PgAuditLogRepository, PgOrderStore};
use pickup_point::tx::{PgTxManager, TransactionManager};
use pickup_point::utils::{retry_on_transient, retry_with_backoff, RetryConfig};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default filter, e.g. RUST_LOG=debug
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,pickup_point=debug")))
        .init();

    tracing::info!("🚀 Starting pickup point service");

    let config = Config::from_env()?;
    tracing::info!(
        storage = ?config.storage_backend,
        cache = ?config.cache_backend,
        audit_sink = ?config.audit_sink,
        "Configuration loaded"
    );

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    let registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let result = actix_web::rt::System::new().block_on(metrics::start_metrics_server(registry, metrics_port));
        if let Err(e) = result {
            tracing::error!(error = %e, "Metrics server error");
        }
    });

    // === 2. PostgreSQL (only when something needs it) ===
    let pool = match config.database_url.as_deref() {
        Some(url) if needs_postgres(&config) => Some(connect_postgres(url, config.db_max_connections).await?),
        _ => None,
    };

    // === 3. Audit pipeline ===
    let cancel = CancellationToken::new();
    let sink: Arc<dyn AuditSink> = match (config.audit_sink, &pool) {
        (AuditSinkKind::Postgres, Some(pool)) => Arc::new(PgAuditLogRepository::new(pool.clone())),
        _ => Arc::new(LogAuditSink),
    };
    let pipeline = AuditPipeline::spawn(config.audit_pipeline(), sink, Arc::clone(&metrics), cancel.clone());

    // === 4. Order storage, then cache, then serve ===
    let result = match (config.storage_backend, pool) {
        (StorageBackend::Postgres, Some(pool)) => {
            let store = PgOrderStore::new(pool.clone());
            let tx = PgTxManager::new(pool);
            with_cache(&config, store, tx, &metrics, pipeline.sender()).await
        }
        _ => {
            let store = match &config.storage_path {
                Some(path) => MemoryOrderStore::open(path.clone()).await?,
                None => MemoryOrderStore::new(),
            };
            let tx = store.transaction_manager();
            with_cache(&config, store, tx, &metrics, pipeline.sender()).await
        }
    };

    // === 5. Shutdown ===
    tracing::info!("🛑 Shutting down, draining audit pipeline");
    pipeline.shutdown().await;

    result
}

fn needs_postgres(config: &Config) -> bool {
    config.storage_backend == StorageBackend::Postgres || config.audit_sink == AuditSinkKind::Postgres
}

async fn connect_postgres(url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    tracing::info!(max_connections = max_connections, "Connecting to PostgreSQL...");

    let pool = retry_on_transient(RetryConfig::startup(), |_attempt| {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
    })
    .await
    .into_result()?;

    tracing::info!("✅ Connected to PostgreSQL");
    Ok(pool)
}

async fn with_cache<S, M>(
    config: &Config,
    store: S,
    tx: M,
    metrics: &Arc<Metrics>,
    audit: AuditSender,
) -> anyhow::Result<()>
where
    S: OrderStore,
    M: TransactionManager<Conn = S::Conn>,
{
    match config.cache_backend {
        CacheBackend::Redis => {
            let url = config.redis_url.clone();
            let namespace = config.cache_namespace.clone();
            let cache = retry_with_backoff(RetryConfig::startup(), |_attempt| {
                let url = url.clone();
                let namespace = namespace.clone();
                async move { RedisOrderCache::new(&url, &namespace).await }
            })
            .await
            .into_result()?
            .with_refill_ttl(config.cache_ttl)
            .with_breaker(config.cache_breaker());

            serve(config, store, tx, cache, metrics, audit).await
        }
        CacheBackend::Memory => {
            let cache = MemoryOrderCache::new().with_refill_ttl(config.cache_ttl);
            serve(config, store, tx, cache, metrics, audit).await
        }
    }
}

async fn serve<S, M, C>(
    config: &Config,
    store: S,
    tx: M,
    cache: C,
    metrics: &Arc<Metrics>,
    audit: AuditSender,
) -> anyhow::Result<()>
where
    S: OrderStore,
    M: TransactionManager<Conn = S::Conn>,
    C: OrderCache,
{
    let service = OrderService::new(Arc::new(store), Arc::new(tx), Arc::new(cache), Arc::clone(metrics))
        .with_cache_ttl(config.cache_ttl);

    // A cold cache only costs store round-trips, so warm-up failure is not fatal.
    match retry_with_backoff(RetryConfig::default(), |_attempt| service.warm_cache())
        .await
        .into_result()
    {
        Ok(count) => tracing::info!(count = count, "🔥 Cache warmed"),
        Err(e) => tracing::warn!(error = %e, "Cache warm-up failed, continuing cold"),
    }

    if config.demo {
        run_demo(&service, &audit).await?;
    }

    tracing::info!("✅ Ready, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    Ok(())
}

/// Walk two orders through their lifecycle and audit every step.
async fn run_demo<S, M, C>(service: &OrderService<S, M, C>, audit: &AuditSender) -> anyhow::Result<()>
where
    S: OrderStore,
    M: TransactionManager<Conn = S::Conn>,
    C: OrderCache,
{
    tracing::info!("📝 Demonstrating order lifecycle");
    let recipient_id = 1001;

    let mut ids = Vec::new();
    for (packaging, extra_membrane, weight) in [("bag", false, 4.5), ("box", true, 12.0)] {
        let started = Instant::now();
        let id = service
            .accept_from_courier(
                OrderParams {
                    recipient_id,
                    expiration_date: Utc::now() + chrono::Duration::days(7),
                    weight,
                    worth: 100.0,
                },
                packaging,
                extra_membrane,
            )
            .await?;
        ids.push(id);

        audit
            .send(
                AuditEvent::new("POST", "/orders/accept")
                    .with_client("127.0.0.1", "pickup-point-demo")
                    .with_response(201, started.elapsed())
                    .with_details(serde_json::json!({ "order_id": id, "packaging": packaging })),
            )
            .await?;
    }

    let started = Instant::now();
    service.serve_recipient(&ids, recipient_id, ServeAction::Deliver).await?;
    audit
        .send(
            AuditEvent::new("POST", "/orders/serve")
                .with_client("127.0.0.1", "pickup-point-demo")
                .with_response(200, started.elapsed())
                .with_details(serde_json::json!({ "order_ids": ids, "action": "deliver" })),
        )
        .await?;

    let started = Instant::now();
    service.serve_recipient(&ids[..1], recipient_id, ServeAction::Refund).await?;
    audit
        .send(
            AuditEvent::new("POST", "/orders/serve")
                .with_client("127.0.0.1", "pickup-point-demo")
                .with_response(200, started.elapsed())
                .with_details(serde_json::json!({ "order_ids": &ids[..1], "action": "refund" })),
        )
        .await?;

    for order in service.get_history(Pagination::default()).await? {
        tracing::info!(
            order_id = order.id,
            status = %order.status,
            worth = order.worth,
            records = order.history.len(),
            "History entry"
        );
    }

    let refunds = service.get_all_refunds(Pagination::default()).await?;
    tracing::info!(refunds = refunds.len(), "🎉 Demo complete");

    Ok(())
}
