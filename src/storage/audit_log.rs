// ============================================================================
// PostgreSQL Audit Log
// ============================================================================
//
// Schema:
//
//   audit_logs (
//       id              BIGSERIAL PRIMARY KEY,
//       request_id      UUID        NOT NULL,
//       timestamp       TIMESTAMPTZ NOT NULL,
//       method          TEXT        NOT NULL,
//       path            TEXT        NOT NULL,
//       remote_address  TEXT        NOT NULL,
//       user_agent      TEXT        NOT NULL,
//       status_response INTEGER     NOT NULL,
//       duration_ms     BIGINT      NOT NULL,
//       details         JSONB
//   )
//
// ============================================================================

use async_trait::async_trait;
use sqlx::PgPool;

use crate::audit::{AuditError, AuditSink};
use crate::domain::audit::AuditEvent;

#[derive(Clone)]
pub struct PgAuditLogRepository {
    pool: PgPool,
}

impl PgAuditLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditLogRepository {
    async fn persist(&self, event: &AuditEvent) -> Result<(), AuditError> {
        sqlx::query(
            "INSERT INTO audit_logs \
             (request_id, timestamp, method, path, remote_address, user_agent, status_response, duration_ms, details) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(event.request_id)
        .bind(event.timestamp)
        .bind(&event.method)
        .bind(&event.path)
        .bind(&event.remote_address)
        .bind(&event.user_agent)
        .bind(i32::from(event.response_status))
        .bind(event.duration_ms())
        .bind(&event.details)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
