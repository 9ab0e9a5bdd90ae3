//! Audit channel consumer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::{AuditEvent, AuditMessage, AuditStore, AuditSubscription};

/// What happened to one delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    Persisted,
    /// Already stored; a redelivery.
    Duplicate,
    /// Logged and dropped. Nothing is requeued.
    Failed,
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    pub received: u64,
    pub persisted: u64,
    pub duplicates: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    persisted: AtomicU64,
    duplicates: AtomicU64,
    failures: AtomicU64,
}

/// Persists audit events idempotently by request id.
pub struct AuditSink {
    store: Arc<dyn AuditStore>,
    counters: Counters,
    shutdown_notify: Notify,
}

impl AuditSink {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            counters: Counters::default(),
            shutdown_notify: Notify::new(),
        }
    }

    /// Persist one message.
    #[tracing::instrument(name = "audit_sink", skip_all, fields(subject = %message.subject))]
    pub async fn handle(&self, message: &AuditMessage) -> SinkOutcome {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let event = match AuditEvent::from_payload(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "Dropping undecodable audit message");
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                return SinkOutcome::Failed;
            }
        };

        match self.store.insert_if_absent(&event).await {
            Ok(true) => {
                self.counters.persisted.fetch_add(1, Ordering::Relaxed);
                SinkOutcome::Persisted
            }
            Ok(false) => {
                tracing::debug!(request_id = %event.request_id, "Duplicate audit event ignored");
                self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
                SinkOutcome::Duplicate
            }
            Err(e) => {
                tracing::error!(
                    request_id = %event.request_id,
                    error = %e,
                    "Failed to persist audit event; event lost unless redelivered"
                );
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                SinkOutcome::Failed
            }
        }
    }

    /// Consume `subscription` until it closes or [`AuditSink::shutdown`] is
    /// called. Messages already queued at shutdown are still persisted.
    pub fn spawn(self: &Arc<Self>, mut subscription: AuditSubscription) -> JoinHandle<()> {
        let sink = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = subscription.recv() => match msg {
                        Some(msg) => {
                            sink.handle(&msg).await;
                        }
                        None => {
                            tracing::info!("Audit channel closed");
                            break;
                        }
                    },
                    _ = sink.shutdown_notify.notified() => {
                        while let Some(msg) = subscription.try_recv() {
                            sink.handle(&msg).await;
                        }
                        break;
                    }
                }
            }
            let stats = sink.stats();
            tracing::info!(
                received = stats.received,
                persisted = stats.persisted,
                duplicates = stats.duplicates,
                failures = stats.failures,
                "Audit sink stopped"
            );
        })
    }

    pub fn shutdown(&self) {
        self.shutdown_notify.notify_one();
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            received: self.counters.received.load(Ordering::Relaxed),
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{audit_channel, AuditError, AuditPage, AuditQuery, AuditPublisher, SqliteAuditStore};
    use crate::types::{RequestId, Verdict, VerdictSource};
    use async_trait::async_trait;
    use std::time::Duration;

    struct FailingStore;

    #[async_trait]
    impl AuditStore for FailingStore {
        async fn insert_if_absent(&self, _event: &AuditEvent) -> Result<bool, AuditError> {
            Err(AuditError::Sqlite("disk full".into()))
        }

        async fn get(&self, _request_id: RequestId) -> Result<Option<AuditEvent>, AuditError> {
            Ok(None)
        }

        async fn query(&self, _query: &AuditQuery) -> Result<AuditPage, AuditError> {
            Err(AuditError::Sqlite("disk full".into()))
        }
    }

    fn sample_event() -> AuditEvent {
        let verdict = Verdict::block(RequestId::new(), "spam", VerdictSource::RuleTier);
        AuditEvent::from_verdict(&verdict, Some("u".into()))
    }

    #[tokio::test]
    async fn redelivery_is_a_no_op() {
        let store = Arc::new(SqliteAuditStore::open_in_memory().unwrap());
        let sink = AuditSink::new(store.clone());
        let event = sample_event();
        let msg = AuditMessage {
            subject: "content.result".into(),
            payload: event.to_payload().unwrap(),
        };

        assert_eq!(sink.handle(&msg).await, SinkOutcome::Persisted);
        assert_eq!(sink.handle(&msg).await, SinkOutcome::Duplicate);

        let page = store.query(&AuditQuery::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(
            sink.stats(),
            SinkStats {
                received: 2,
                persisted: 1,
                duplicates: 1,
                failures: 0
            }
        );
    }

    #[tokio::test]
    async fn persistence_failure_is_counted_not_retried() {
        let sink = AuditSink::new(Arc::new(FailingStore));
        let msg = AuditMessage {
            subject: "content.result".into(),
            payload: sample_event().to_payload().unwrap(),
        };
        assert_eq!(sink.handle(&msg).await, SinkOutcome::Failed);

        let garbage = AuditMessage {
            subject: "content.result".into(),
            payload: b"nope".to_vec(),
        };
        assert_eq!(sink.handle(&garbage).await, SinkOutcome::Failed);
        assert_eq!(sink.stats().failures, 2);
    }

    #[tokio::test]
    async fn spawned_sink_stops_when_channel_closes() {
        let store = Arc::new(SqliteAuditStore::open_in_memory().unwrap());
        let sink = Arc::new(AuditSink::new(store.clone()));
        let (publisher, subscription) = audit_channel(8);
        let handle = sink.spawn(subscription);

        let event = sample_event();
        publisher.publish(&event).await.unwrap();
        publisher.publish(&event).await.unwrap();
        drop(publisher);

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sink did not stop")
            .unwrap();
        assert!(store.get(event.request_id).await.unwrap().is_some());
        assert_eq!(sink.stats().duplicates, 1);
    }

    #[tokio::test]
    async fn shutdown_drains_queued_messages() {
        let store = Arc::new(SqliteAuditStore::open_in_memory().unwrap());
        let sink = Arc::new(AuditSink::new(store.clone()));
        let (publisher, subscription) = audit_channel(8);

        for _ in 0..3 {
            publisher.publish(&sample_event()).await.unwrap();
        }
        sink.shutdown();
        let handle = sink.spawn(subscription);

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sink did not stop")
            .unwrap();
        assert_eq!(sink.stats().persisted, 3);
        drop(publisher);
    }
}
