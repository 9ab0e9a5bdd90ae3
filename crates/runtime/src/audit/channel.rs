//! In-process audit channel.
//!
//! A bounded `mpsc` queue carrying serialized events under a subject name,
//! shaped like a broker topic so a durable transport can replace it.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{AuditError, AuditEvent, AuditPublisher};

pub const AUDIT_SUBJECT: &str = "content.result";

/// One message on the audit channel.
#[derive(Debug, Clone)]
pub struct AuditMessage {
    pub subject: String,
    /// JSON-encoded [`AuditEvent`].
    pub payload: Vec<u8>,
}

/// Create a channel holding at most `capacity` undelivered messages.
pub fn audit_channel(capacity: usize) -> (ChannelAuditPublisher, AuditSubscription) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelAuditPublisher { tx }, AuditSubscription { rx })
}

#[derive(Debug, Clone)]
pub struct ChannelAuditPublisher {
    tx: mpsc::Sender<AuditMessage>,
}

impl ChannelAuditPublisher {
    /// Publish an already-encoded payload. Waits while the channel is full.
    pub async fn publish_raw(&self, payload: Vec<u8>) -> Result<(), AuditError> {
        self.tx
            .send(AuditMessage {
                subject: AUDIT_SUBJECT.to_string(),
                payload,
            })
            .await
            .map_err(|_| AuditError::ChannelClosed)
    }
}

#[async_trait]
impl AuditPublisher for ChannelAuditPublisher {
    async fn publish(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.publish_raw(event.to_payload()?).await
    }
}

/// Receiving side of the audit channel.
#[derive(Debug)]
pub struct AuditSubscription {
    rx: mpsc::Receiver<AuditMessage>,
}

impl AuditSubscription {
    /// Next message, or `None` once every publisher is dropped.
    pub async fn recv(&mut self) -> Option<AuditMessage> {
        self.rx.recv().await
    }

    /// A message that is already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<AuditMessage> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RequestId, Verdict, VerdictSource};

    #[tokio::test]
    async fn published_events_arrive_on_the_subject() {
        let (publisher, mut sub) = audit_channel(4);
        let verdict = Verdict::allow(RequestId::new(), "ok", VerdictSource::ReasoningTier);
        publisher
            .publish(&AuditEvent::from_verdict(&verdict, None))
            .await
            .unwrap();

        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.subject, AUDIT_SUBJECT);
        let event = AuditEvent::from_payload(&msg.payload).unwrap();
        assert_eq!(event.request_id, verdict.request_id);
    }

    #[tokio::test]
    async fn publish_fails_once_subscriber_is_gone() {
        let (publisher, sub) = audit_channel(4);
        drop(sub);
        let verdict = Verdict::allow(RequestId::new(), "ok", VerdictSource::ReasoningTier);
        let err = publisher
            .publish(&AuditEvent::from_verdict(&verdict, None))
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::ChannelClosed));
    }

    #[tokio::test]
    async fn subscription_ends_when_publishers_drop() {
        let (publisher, mut sub) = audit_channel(1);
        drop(publisher);
        assert!(sub.recv().await.is_none());
    }
}
