//! Escalation bus: per-session fan-out to teacher observers.
//!
//! Observers (teacher dashboards, monitoring) subscribe per session and
//! receive escalations, transcript turns and hints. Delivery is
//! best-effort; a sink that fails to accept a message is dropped from the
//! subscription set. Subscriber churn is expected and is not an error of
//! the bus.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::audit::{AuditSink, EscalationRecord};
use crate::models::SubjectRoute;

/// Messages pushed to session observers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverMessage {
    /// A human teacher is needed; `observer_url` is where to attach.
    Escalation {
        session_id: String,
        reason: String,
        observer_url: String,
    },
    /// Free-form guidance relayed between observers.
    TeacherHint { session_id: String, text: String },
    /// One completed turn of the conversation.
    TranscriptTurn {
        session_id: String,
        speaker: String,
        text: String,
        subject: SubjectRoute,
    },
    /// Sent to a fresh observer on attach.
    Connected { session_id: String },
}

/// A push endpoint for observer messages.
#[async_trait]
pub trait EscalationSink: Send + Sync {
    async fn send(&self, message: &ObserverMessage) -> Result<()>;
}

/// Fan-out of observer messages, keyed by session id.
pub struct EscalationBus {
    subscribers: RwLock<HashMap<String, Vec<Arc<dyn EscalationSink>>>>,
    audit: Arc<dyn AuditSink>,
    observer_base_url: String,
}

impl EscalationBus {
    pub fn new(audit: Arc<dyn AuditSink>, observer_base_url: impl Into<String>) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            audit,
            observer_base_url: observer_base_url.into(),
        }
    }

    /// The attach point handed to teachers for a session.
    pub fn observer_url(&self, session_id: &str) -> String {
        format!("{}/ws/teacher/{}", self.observer_base_url, session_id)
    }

    pub async fn subscribe(&self, session_id: &str, sink: Arc<dyn EscalationSink>) {
        let mut subscribers = self.subscribers.write().await;
        subscribers
            .entry(session_id.to_string())
            .or_default()
            .push(sink);
    }

    pub async fn unsubscribe(&self, session_id: &str, sink: &Arc<dyn EscalationSink>) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(sinks) = subscribers.get_mut(session_id) {
            sinks.retain(|existing| !Arc::ptr_eq(existing, sink));
            if sinks.is_empty() {
                subscribers.remove(session_id);
            }
        }
    }

    pub async fn subscriber_count(&self, session_id: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(session_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Deliver `message` to every current subscriber of the session.
    ///
    /// Sinks that fail are removed from the subscription set. Returns the
    /// number of successful deliveries.
    pub async fn broadcast(&self, session_id: &str, message: &ObserverMessage) -> usize {
        let sinks: Vec<Arc<dyn EscalationSink>> = {
            let subscribers = self.subscribers.read().await;
            match subscribers.get(session_id) {
                Some(sinks) => sinks.clone(),
                None => return 0,
            }
        };

        let mut failed: Vec<Arc<dyn EscalationSink>> = Vec::new();
        let mut delivered = 0;
        for sink in sinks {
            match sink.send(message).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(session_id, error = %e, "observer delivery failed, pruning");
                    failed.push(sink);
                }
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            if let Some(sinks) = subscribers.get_mut(session_id) {
                sinks.retain(|existing| !failed.iter().any(|dead| Arc::ptr_eq(existing, dead)));
                if sinks.is_empty() {
                    subscribers.remove(session_id);
                }
            }
        }

        delivered
    }

    /// Raise an escalation: broadcast to already-attached observers, write
    /// the audit row (best-effort), and return the attach handle for the
    /// incoming teacher.
    pub async fn notify(&self, session_id: &str, reason: &str) -> String {
        let observer_url = self.observer_url(session_id);
        info!(session_id, reason, "escalating to human teacher");

        self.broadcast(
            session_id,
            &ObserverMessage::Escalation {
                session_id: session_id.to_string(),
                reason: reason.to_string(),
                observer_url: observer_url.clone(),
            },
        )
        .await;

        let record = EscalationRecord {
            session_id: session_id.to_string(),
            reason: reason.to_string(),
            observer_url: observer_url.clone(),
        };
        if let Err(e) = self.audit.record_escalation(&record).await {
            warn!(session_id, error = %e, "escalation audit write failed");
        }

        observer_url
    }

    /// Broadcast a teacher hint to the session's observers.
    pub async fn push_hint(&self, session_id: &str, text: &str) {
        self.broadcast(
            session_id,
            &ObserverMessage::TeacherHint {
                session_id: session_id.to_string(),
                text: text.to_string(),
            },
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NoopAuditSink;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        received: AtomicUsize,
        fail: bool,
    }

    impl CountingSink {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                received: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl EscalationSink for CountingSink {
        async fn send(&self, _message: &ObserverMessage) -> Result<()> {
            if self.fail {
                anyhow::bail!("socket closed");
            }
            self.received.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn bus() -> EscalationBus {
        EscalationBus::new(Arc::new(NoopAuditSink), "ws://localhost:8001")
    }

    fn hint() -> ObserverMessage {
        ObserverMessage::TeacherHint {
            session_id: "s1".into(),
            text: "try drawing it".into(),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let bus = bus();
        let a = CountingSink::new(false);
        let b = CountingSink::new(false);
        bus.subscribe("s1", a.clone()).await;
        bus.subscribe("s1", b.clone()).await;

        let delivered = bus.broadcast("s1", &hint()).await;
        assert_eq!(delivered, 2);
        assert_eq!(a.received.load(Ordering::SeqCst), 1);
        assert_eq!(b.received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_subscriber_is_pruned() {
        let bus = bus();
        let healthy = CountingSink::new(false);
        let dead = CountingSink::new(true);
        bus.subscribe("s1", healthy.clone()).await;
        bus.subscribe("s1", dead.clone()).await;

        assert_eq!(bus.broadcast("s1", &hint()).await, 1);
        assert_eq!(bus.subscriber_count("s1").await, 1);

        // The healthy sink keeps receiving.
        assert_eq!(bus.broadcast("s1", &hint()).await, 1);
        assert_eq!(healthy.received.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let bus = bus();
        let a = CountingSink::new(false);
        bus.subscribe("s1", a.clone()).await;

        assert_eq!(bus.broadcast("s2", &hint()).await, 0);
        assert_eq!(a.received.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unsubscribe_removes_only_that_sink() {
        let bus = bus();
        let a = CountingSink::new(false);
        let b = CountingSink::new(false);
        bus.subscribe("s1", a.clone()).await;
        bus.subscribe("s1", b.clone()).await;

        let a_dyn: Arc<dyn EscalationSink> = a.clone();
        bus.unsubscribe("s1", &a_dyn).await;
        assert_eq!(bus.subscriber_count("s1").await, 1);

        bus.broadcast("s1", &hint()).await;
        assert_eq!(a.received.load(Ordering::SeqCst), 0);
        assert_eq!(b.received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn notify_returns_the_attach_handle() {
        let bus = bus();
        let observer = CountingSink::new(false);
        bus.subscribe("s1", observer.clone()).await;

        let handle = bus.notify("s1", "student asked for a human").await;
        assert_eq!(handle, "ws://localhost:8001/ws/teacher/s1");
        assert_eq!(observer.received.load(Ordering::SeqCst), 1);
    }
}
