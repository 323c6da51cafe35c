//! The orchestrator: public entry point for student turns.
//!
//! `dispatch` is O(1) and never awaits a collaborator: it records the turn,
//! stores a pending job, and spawns the pipeline as an independent task.
//! Transports either poll `status` or long-poll `wait`; once dispatched, a
//! pipeline runs to completion or error even if every waiter goes away, so
//! a late poller can still retrieve the result until TTL expiry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_stream::try_stream;
use chrono::Utc;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::job_store::JobStore;
use super::sessions::SessionRegistry;
use crate::audit::{
    AuditSink, RoutingDecisionRecord, SafetyEventRecord, SessionSummaryRecord,
    TranscriptTurnRecord,
};
use crate::escalation::{EscalationBus, ObserverMessage};
use crate::guardrail::{SafetyChecker, check_stream_with_sentence_buffer};
use crate::models::{Job, JobSnapshot, RoutingResult, SessionState, SubjectRoute};
use crate::specialists::{IntentRouter, SpecialistRegistry};

/// Errors surfaced to transports by `status` and `wait`.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("job not found: {0}")]
    NotFound(String),

    /// The job is still running; the wait deadline passed.
    #[error("timed out waiting for job {0}")]
    Timeout(String),
}

/// Coordinates one student turn end to end.
pub struct Orchestrator {
    jobs: Arc<JobStore>,
    sessions: Arc<SessionRegistry>,
    router: Arc<dyn IntentRouter>,
    specialists: Arc<SpecialistRegistry>,
    safety: Arc<dyn SafetyChecker>,
    audit: Arc<dyn AuditSink>,
    escalation: Arc<EscalationBus>,
}

impl Orchestrator {
    pub fn new(
        jobs: Arc<JobStore>,
        sessions: Arc<SessionRegistry>,
        router: Arc<dyn IntentRouter>,
        specialists: Arc<SpecialistRegistry>,
        safety: Arc<dyn SafetyChecker>,
        audit: Arc<dyn AuditSink>,
        escalation: Arc<EscalationBus>,
    ) -> Self {
        Self {
            jobs,
            sessions,
            router,
            specialists,
            safety,
            audit,
            escalation,
        }
    }

    // ========================================================================
    // Orchestration API
    // ========================================================================

    /// Dispatch a student turn. Returns the job id immediately; the
    /// classify → stream → filter pipeline runs in the background.
    pub async fn dispatch(self: &Arc<Self>, session_id: &str, student_text: &str) -> String {
        let session = self.sessions.get_or_create(session_id).await;

        let job = Arc::new(Job::new(session_id, student_text));
        self.jobs.put(Arc::clone(&job)).await;

        {
            let mut state = session.lock().await;
            state.turn_count += 1;
            state.mark_routing();
        }

        let orchestrator = Arc::clone(self);
        let pipeline_job = Arc::clone(&job);
        tokio::spawn(async move {
            orchestrator.run_pipeline(pipeline_job, session).await;
        });

        info!(job_id = %job.id, session_id, "dispatched orchestration job");
        job.id.clone()
    }

    /// Snapshot a job's current state.
    pub async fn status(&self, job_id: &str) -> Result<JobSnapshot, OrchestratorError> {
        let job = self
            .jobs
            .get(job_id)
            .await
            .ok_or_else(|| OrchestratorError::NotFound(job_id.to_string()))?;
        Ok(job.snapshot().await)
    }

    /// Long-poll a job until terminal or until `timeout` elapses. On
    /// timeout the job keeps running.
    pub async fn wait(
        &self,
        job_id: &str,
        timeout: Duration,
    ) -> Result<JobSnapshot, OrchestratorError> {
        let job = self
            .jobs
            .get(job_id)
            .await
            .ok_or_else(|| OrchestratorError::NotFound(job_id.to_string()))?;

        if !job.wait_for_completion(timeout).await {
            return Err(OrchestratorError::Timeout(job_id.to_string()));
        }
        Ok(job.snapshot().await)
    }

    // ========================================================================
    // Session lifecycle API
    // ========================================================================

    /// Create the session state ahead of the first turn.
    pub async fn open_session(&self, session_id: &str) {
        self.sessions.get_or_create(session_id).await;
        info!(session_id, "session opened");
    }

    /// Drop the session and record the transport-computed summary.
    pub async fn close_session(&self, session_id: &str, summary: SessionSummaryRecord) {
        self.sessions.remove(session_id).await;
        if let Err(e) = self.audit.record_session_summary(&summary).await {
            warn!(session_id, error = %e, "session summary audit write failed");
        }
        info!(session_id, turns = summary.turn_count, "session closed");
    }

    // ========================================================================
    // Escalation API
    // ========================================================================

    /// Transport-initiated escalation: flags the session, counts as a
    /// routing operation, and returns the observer attach handle.
    pub async fn escalate(&self, session_id: &str, reason: &str) -> String {
        let session = self.sessions.get_or_create(session_id).await;
        {
            let mut state = session.lock().await;
            state.escalated = true;
            state.mark_routing();
        }
        self.escalation.notify(session_id, reason).await
    }

    // ========================================================================
    // Turn-skip protocol (media-runtime transports)
    // ========================================================================

    /// Whether the transport must drop the next user turn.
    pub async fn should_skip_turn(&self, session_id: &str) -> bool {
        match self.sessions.get(session_id).await {
            Some(session) => session.lock().await.should_skip_turn(),
            None => false,
        }
    }

    /// Consume one pending turn skip.
    pub async fn consume_skip(&self, session_id: &str) {
        if let Some(session) = self.sessions.get(session_id).await {
            session.lock().await.consume_skip();
        }
    }

    /// Copy of the session counters, for transports and tests.
    pub async fn session_snapshot(&self, session_id: &str) -> Option<SessionState> {
        match self.sessions.get(session_id).await {
            Some(session) => Some(session.lock().await.clone()),
            None => None,
        }
    }

    // ========================================================================
    // Background pipeline
    // ========================================================================

    async fn run_pipeline(self: Arc<Self>, job: Arc<Job>, session: Arc<Mutex<SessionState>>) {
        let started = Utc::now();

        // Step 1: classify. Failure degrades to the english fallback; an
        // outage must not silence the tutor.
        let routing = match self.router.route(&job.student_text).await {
            Ok(routing) => routing,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "classification failed, falling back to english");
                RoutingResult::fallback("")
            }
        };

        job.mark_processing(routing.subject).await;
        {
            let mut state = session.lock().await;
            state.current_subject = Some(routing.subject);
        }
        info!(
            job_id = %job.id,
            subject = %routing.subject,
            confidence = routing.confidence,
            "classified student turn"
        );

        if routing.subject == SubjectRoute::Escalate {
            {
                let mut state = session.lock().await;
                state.escalated = true;
            }
            self.escalation
                .notify(&job.session_id, "classifier routed to escalate")
                .await;
        }

        // Step 2: routing audit, guarded on its own.
        let routing_record = RoutingDecisionRecord {
            session_id: job.session_id.clone(),
            subject: routing.subject,
            confidence: routing.confidence,
            latency_ms: (Utc::now() - started).num_milliseconds(),
            transcript_excerpt: excerpt(&job.student_text, 200),
        };
        if let Err(e) = self.audit.record_routing_decision(&routing_record).await {
            warn!(job_id = %job.id, error = %e, "routing audit write failed");
        }

        // Steps 3-5: specialist stream through the sentence filter. A
        // stream failure is fail-closed — there is nothing meaningful to
        // speak.
        match self.stream_response(&job, routing.subject).await {
            // Completion requires speakable text; an empty stream is a
            // failed turn, not a silent success.
            Ok((safe_text, _)) if safe_text.is_empty() => {
                warn!(job_id = %job.id, "specialist stream produced no speakable text");
                job.mark_error("specialist returned no speakable text").await;
                session.lock().await.consume_skip();
            }
            Ok((safe_text, raw_text)) => {
                self.finish_job(&job, &session, routing.subject, safe_text, raw_text)
                    .await;
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "orchestration pipeline failed");
                job.mark_error(e.to_string()).await;
                session.lock().await.consume_skip();
            }
        }
    }

    /// Drain the specialist stream through the sentence-buffered safety
    /// filter, capturing the raw text verbatim via a tee.
    async fn stream_response(
        &self,
        job: &Job,
        subject: SubjectRoute,
    ) -> Result<(String, String)> {
        let raw_stream = self.specialists.open(subject, &job.student_text);
        let raw_chunks: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let tee = {
            let raw_chunks = Arc::clone(&raw_chunks);
            try_stream! {
                let mut inner = raw_stream;
                while let Some(chunk) = inner.next().await {
                    let chunk = chunk?;
                    raw_chunks.lock().await.push(chunk.clone());
                    yield chunk;
                }
            }
        };

        let filtered = check_stream_with_sentence_buffer(tee, Arc::clone(&self.safety));
        futures::pin_mut!(filtered);

        let mut safe_chunks: Vec<String> = Vec::new();
        while let Some(chunk) = filtered.next().await {
            safe_chunks.push(chunk?);
        }

        let raw_text = raw_chunks.lock().await.concat().trim().to_string();
        let safe_text = safe_chunks.concat().trim().to_string();
        Ok((safe_text, raw_text))
    }

    /// Steps 6-8: safety audit, terminal transition, counter upkeep,
    /// transcript audit and observer fan-out. Each audit write is guarded
    /// independently so one failure cannot stop the next.
    async fn finish_job(
        &self,
        job: &Job,
        session: &Arc<Mutex<SessionState>>,
        subject: SubjectRoute,
        safe_text: String,
        raw_text: String,
    ) {
        // Re-check the raw text once, purely to populate audit metadata.
        let mut confidence = 0.0;
        let mut categories = Vec::new();
        if safe_text != raw_text {
            match self.safety.check(&raw_text).await {
                Ok(result) => {
                    confidence = result.confidence;
                    categories = result.categories;
                }
                Err(e) => {
                    debug!(job_id = %job.id, error = %e, "raw-text recheck failed");
                }
            }
        }
        let safety_record = SafetyEventRecord {
            session_id: job.session_id.clone(),
            original: raw_text.clone(),
            rewritten: safe_text.clone(),
            flagged: safe_text != raw_text,
            confidence,
            categories,
        };
        if let Err(e) = self.audit.record_safety_event(&safety_record).await {
            warn!(job_id = %job.id, error = %e, "safety audit write failed");
        }

        job.mark_complete(safe_text.clone(), raw_text).await;

        let turn_index = {
            let mut state = session.lock().await;
            state.reset_filler();
            state.consume_skip();
            state.turn_count
        };

        let transcript_record = TranscriptTurnRecord {
            session_id: job.session_id.clone(),
            speaker: subject.to_string(),
            text: safe_text.clone(),
            subject,
            turn_index,
        };
        if let Err(e) = self.audit.record_transcript_turn(&transcript_record).await {
            warn!(job_id = %job.id, error = %e, "transcript audit write failed");
        }

        self.escalation
            .broadcast(
                &job.session_id,
                &ObserverMessage::TranscriptTurn {
                    session_id: job.session_id.clone(),
                    speaker: subject.to_string(),
                    text: safe_text.clone(),
                    subject,
                },
            )
            .await;

        info!(job_id = %job.id, chars = safe_text.len(), "job complete");
    }
}

/// Leading `max_chars` characters, never splitting a code point.
fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
