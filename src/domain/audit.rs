use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Audit Event
// ============================================================================

/// One inbound request as seen by the transport layer.
///
/// Built once per request and handed to the audit pipeline, which owns it
/// until it is persisted or dropped at shutdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub request_id: Uuid,
    pub method: String,
    pub path: String,
    pub remote_address: String,
    pub user_agent: String,
    pub response_status: u16,
    #[serde(rename = "duration_ms", with = "duration_millis")]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: Uuid::now_v7(),
            method: method.into(),
            path: path.into(),
            remote_address: String::new(),
            user_agent: String::new(),
            response_status: 0,
            duration: Duration::ZERO,
            details: None,
        }
    }

    pub fn with_client(mut self, remote_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        self.remote_address = remote_address.into();
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_response(mut self, status: u16, duration: Duration) -> Self {
        self.response_status = status;
        self.duration = duration;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn duration_ms(&self) -> i64 {
        i64::try_from(self.duration.as_millis()).unwrap_or(i64::MAX)
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
