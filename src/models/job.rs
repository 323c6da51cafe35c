//! Job — the unit of work for a single student turn.
//!
//! A job is created at dispatch, moves one way through
//! `pending → processing → (complete | error)`, and fires a one-shot
//! completion signal on reaching a terminal state. Multiple waiters may
//! observe the signal; all of them see the same terminal snapshot.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use uuid::Uuid;

use super::routing::SubjectRoute;

/// Lifecycle states for an orchestration job.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Complete,
    Error,
}

impl JobStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
        }
    }
}

/// Mutable portion of a job, guarded by the job's own lock.
#[derive(Debug)]
struct JobState {
    status: JobStatus,
    subject: Option<SubjectRoute>,
    raw_text: Option<String>,
    safe_text: Option<String>,
    tts_ready: bool,
    error_message: Option<String>,
    classified_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

/// Tracks one student turn from dispatch to completion.
///
/// Identity fields are immutable after construction. The three `mark_*`
/// operations are idempotent guards: once a job is terminal, further
/// transitions are rejected silently.
#[derive(Debug)]
pub struct Job {
    pub id: String,
    pub session_id: String,
    pub student_text: String,
    pub dispatched_at: DateTime<Utc>,
    state: Mutex<JobState>,
    completion: watch::Sender<bool>,
}

impl Job {
    pub fn new(session_id: impl Into<String>, student_text: impl Into<String>) -> Self {
        let (completion, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            student_text: student_text.into(),
            dispatched_at: Utc::now(),
            state: Mutex::new(JobState {
                status: JobStatus::Pending,
                subject: None,
                raw_text: None,
                safe_text: None,
                tts_ready: false,
                error_message: None,
                classified_at: None,
                completed_at: None,
            }),
            completion,
        }
    }

    /// Record the classification result and move to `processing`.
    /// No-op unless the job is still `pending`.
    pub async fn mark_processing(&self, subject: SubjectRoute) {
        let mut state = self.state.lock().await;
        if state.status != JobStatus::Pending {
            return;
        }
        state.status = JobStatus::Processing;
        state.subject = Some(subject);
        state.classified_at = Some(Utc::now());
    }

    /// Move to `complete` with the filtered and raw response text, and fire
    /// the completion signal. No-op if already terminal.
    pub async fn mark_complete(&self, safe_text: impl Into<String>, raw_text: impl Into<String>) {
        {
            let mut state = self.state.lock().await;
            if state.status.is_terminal() {
                return;
            }
            state.status = JobStatus::Complete;
            state.safe_text = Some(safe_text.into());
            state.raw_text = Some(raw_text.into());
            state.tts_ready = true;
            state.completed_at = Some(Utc::now());
        }
        self.completion.send_replace(true);
    }

    /// Move to `error` and fire the completion signal. No-op if already
    /// terminal.
    pub async fn mark_error(&self, message: impl Into<String>) {
        {
            let mut state = self.state.lock().await;
            if state.status.is_terminal() {
                return;
            }
            state.status = JobStatus::Error;
            state.error_message = Some(message.into());
            state.completed_at = Some(Utc::now());
        }
        self.completion.send_replace(true);
    }

    /// Wait for the job to reach a terminal state.
    ///
    /// Returns `true` if the job completed (or errored) within `timeout`,
    /// `false` on timeout. An already-terminal job returns `true` even with
    /// a zero timeout: the completion signal is checked before the deadline.
    pub async fn wait_for_completion(&self, timeout: Duration) -> bool {
        let mut rx = self.completion.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|done| *done))
            .await
            .map(|res| res.is_ok())
            .unwrap_or(false)
    }

    pub async fn status(&self) -> JobStatus {
        self.state.lock().await.status
    }

    /// Set iff the job is terminal; drives TTL reclamation.
    pub async fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.completed_at
    }

    /// Point-in-time copy of the job for status pollers and audit rows.
    pub async fn snapshot(&self) -> JobSnapshot {
        let state = self.state.lock().await;
        JobSnapshot {
            job_id: self.id.clone(),
            session_id: self.session_id.clone(),
            status: state.status,
            subject: state.subject,
            raw_text: state.raw_text.clone(),
            safe_text: state.safe_text.clone(),
            tts_ready: state.tts_ready,
            error_message: state.error_message.clone(),
            dispatched_at: self.dispatched_at,
            completed_at: state.completed_at,
        }
    }
}

/// Read-only view of a job's state at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub session_id: String,
    pub status: JobStatus,
    pub subject: Option<SubjectRoute>,
    pub raw_text: Option<String>,
    pub safe_text: Option<String>,
    pub tts_ready: bool,
    pub error_message: Option<String>,
    pub dispatched_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
