use async_trait::async_trait;

use super::{AuditError, AuditSink};
use crate::domain::audit::AuditEvent;

/// Writes each audit event as one structured log line under the `audit`
/// target. Used when no audit table is configured.
#[derive(Debug, Default, Clone)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn persist(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let details = event
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?
            .unwrap_or_default();

        tracing::info!(
            target: "audit",
            request_id = %event.request_id,
            timestamp = %event.timestamp.to_rfc3339(),
            method = %event.method,
            path = %event.path,
            remote_address = %event.remote_address,
            user_agent = %event.user_agent,
            status = event.response_status,
            duration_ms = event.duration_ms(),
            details = %details,
            "audit"
        );

        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
