//! Audit trail
//!
//! Every terminal verdict becomes an [`AuditEvent`]. The orchestrator hands
//! events to an [`AuditPublisher`]; an [`AuditSink`] on the other side of the
//! channel persists them through an [`AuditStore`]. Delivery is
//! at-least-once, so persistence is keyed by request id and ignores repeats.

pub mod channel;
pub mod sink;
pub mod store;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Action, RequestId, Verdict, VerdictSource};

pub use channel::{audit_channel, AuditMessage, AuditSubscription, ChannelAuditPublisher, AUDIT_SUBJECT};
pub use sink::{AuditSink, SinkOutcome, SinkStats};
pub use store::{AuditPage, AuditQuery, AuditStore, SqliteAuditStore};

/// One persisted verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub request_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub action: Action,
    pub reason: String,
    pub source: VerdictSource,
    /// When the orchestrator emitted the event.
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn from_verdict(verdict: &Verdict, user_id: Option<String>) -> Self {
        Self {
            request_id: verdict.request_id,
            user_id,
            action: verdict.action,
            reason: verdict.reason.clone(),
            source: verdict.source,
            timestamp: Utc::now(),
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, AuditError> {
        serde_json::to_vec(self).map_err(|e| AuditError::Serialization(e.to_string()))
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, AuditError> {
        serde_json::from_slice(payload).map_err(|e| AuditError::Serialization(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Audit channel closed")]
    ChannelClosed,
    #[error("Audit publish timed out after {0:?}")]
    PublishTimeout(Duration),
    #[error("SQLite error: {0}")]
    Sqlite(String),
}

impl From<rusqlite::Error> for AuditError {
    fn from(e: rusqlite::Error) -> Self {
        AuditError::Sqlite(e.to_string())
    }
}

/// Publishing side of the audit channel.
#[async_trait]
pub trait AuditPublisher: Send + Sync {
    async fn publish(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_verdict_fields() {
        let verdict = Verdict::block(RequestId::new(), "spam", VerdictSource::RuleTier);
        let event = AuditEvent::from_verdict(&verdict, Some("u-1".into()));
        let payload = event.to_payload().unwrap();

        let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(json["action"], "block");
        assert_eq!(json["source"], "rule-tier");
        assert_eq!(json["user_id"], "u-1");

        assert_eq!(AuditEvent::from_payload(&payload).unwrap(), event);
    }

    #[test]
    fn garbage_payload_is_rejected() {
        assert!(matches!(
            AuditEvent::from_payload(b"{not json"),
            Err(AuditError::Serialization(_))
        ));
    }
}
