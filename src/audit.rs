//! Append-only audit seam.
//!
//! The pipeline records routing decisions, safety events, transcript turns,
//! escalations and session summaries. Every write is best-effort: callers
//! guard each call independently, log failures at `warn!`, and never let an
//! audit error touch the user-visible request. The relational store behind
//! this trait is someone else's problem.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::SubjectRoute;

/// One classification outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecisionRecord {
    pub session_id: String,
    pub subject: SubjectRoute,
    pub confidence: f64,
    pub latency_ms: i64,
    /// Leading slice of the student utterance, for review dashboards.
    pub transcript_excerpt: String,
}

/// One guardrail pass over a full response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyEventRecord {
    pub session_id: String,
    pub original: String,
    pub rewritten: String,
    pub flagged: bool,
    pub confidence: f64,
    pub categories: Vec<String>,
}

/// One spoken turn of the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptTurnRecord {
    pub session_id: String,
    pub speaker: String,
    pub text: String,
    pub subject: SubjectRoute,
    pub turn_index: u64,
}

/// A hand-off to a human teacher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub session_id: String,
    pub reason: String,
    pub observer_url: String,
}

/// End-of-session rollup, computed by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummaryRecord {
    pub session_id: String,
    pub turn_count: u64,
    pub subjects: Vec<SubjectRoute>,
    pub escalated: bool,
    pub safety_flag_count: u64,
    pub routing_decisions: Vec<SubjectRoute>,
}

/// Capability seam for the audit store.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record_routing_decision(&self, record: &RoutingDecisionRecord) -> Result<()>;
    async fn record_safety_event(&self, record: &SafetyEventRecord) -> Result<()>;
    async fn record_transcript_turn(&self, record: &TranscriptTurnRecord) -> Result<()>;
    async fn record_escalation(&self, record: &EscalationRecord) -> Result<()>;
    async fn record_session_summary(&self, record: &SessionSummaryRecord) -> Result<()>;
}

/// Emits audit rows as structured log lines under the `audit` target.
pub struct TracingAuditSink;

impl TracingAuditSink {
    fn emit<R: Serialize>(kind: &str, record: &R) {
        let payload = serde_json::to_string(record).unwrap_or_default();
        info!(target: "audit", kind, %payload);
    }
}

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record_routing_decision(&self, record: &RoutingDecisionRecord) -> Result<()> {
        Self::emit("routing_decision", record);
        Ok(())
    }

    async fn record_safety_event(&self, record: &SafetyEventRecord) -> Result<()> {
        Self::emit("safety_event", record);
        Ok(())
    }

    async fn record_transcript_turn(&self, record: &TranscriptTurnRecord) -> Result<()> {
        Self::emit("transcript_turn", record);
        Ok(())
    }

    async fn record_escalation(&self, record: &EscalationRecord) -> Result<()> {
        Self::emit("escalation", record);
        Ok(())
    }

    async fn record_session_summary(&self, record: &SessionSummaryRecord) -> Result<()> {
        Self::emit("session_summary", record);
        Ok(())
    }
}

/// Discards every record. For tests and audit-less deployments.
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record_routing_decision(&self, _record: &RoutingDecisionRecord) -> Result<()> {
        Ok(())
    }

    async fn record_safety_event(&self, _record: &SafetyEventRecord) -> Result<()> {
        Ok(())
    }

    async fn record_transcript_turn(&self, _record: &TranscriptTurnRecord) -> Result<()> {
        Ok(())
    }

    async fn record_escalation(&self, _record: &EscalationRecord) -> Result<()> {
        Ok(())
    }

    async fn record_session_summary(&self, _record: &SessionSummaryRecord) -> Result<()> {
        Ok(())
    }
}
