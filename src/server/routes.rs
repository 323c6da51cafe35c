//! Route handlers and wire DTOs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

use crate::audit::SessionSummaryRecord;
use crate::escalation::{EscalationBus, EscalationSink, ObserverMessage};
use crate::models::{JobSnapshot, SubjectRoute};
use crate::orchestrator::{Orchestrator, OrchestratorError};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub escalation: Arc<EscalationBus>,
    /// Long-poll timeout used when the caller passes none.
    pub default_wait: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/orchestrate", post(dispatch_orchestration))
        .route("/orchestrate/:job_id", get(get_job_status))
        .route("/orchestrate/:job_id/wait", post(wait_for_job))
        .route("/session/open", post(open_session))
        .route("/session/close", post(close_session))
        .route("/escalate", post(trigger_escalation))
        .route("/ws/teacher/:session_id", get(teacher_websocket))
        .with_state(state)
}

// ============================================================================
// DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct OrchestrationRequest {
    pub session_id: String,
    pub student_text: String,
}

#[derive(Debug, Serialize)]
pub struct OrchestrationResponse {
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: &'static str,
    pub subject: Option<SubjectRoute>,
    pub safe_text: Option<String>,
    pub tts_ready: bool,
    pub error_message: Option<String>,
}

impl From<JobSnapshot> for JobStatusResponse {
    fn from(snapshot: JobSnapshot) -> Self {
        Self {
            job_id: snapshot.job_id,
            status: snapshot.status.as_str(),
            subject: snapshot.subject,
            safe_text: snapshot.safe_text,
            tts_ready: snapshot.tts_ready,
            error_message: snapshot.error_message,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WaitParams {
    /// Seconds; defaults to the configured long-poll timeout.
    pub timeout: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct EscalationRequest {
    pub session_id: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct EscalationResponse {
    pub session_id: String,
    pub observer_url: String,
}

fn into_http_error(e: OrchestratorError) -> (StatusCode, String) {
    match e {
        OrchestratorError::NotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
        OrchestratorError::Timeout(_) => (StatusCode::REQUEST_TIMEOUT, e.to_string()),
    }
}

// ============================================================================
// Orchestration
// ============================================================================

async fn healthz() -> &'static str {
    "ok"
}

async fn dispatch_orchestration(
    State(state): State<AppState>,
    Json(req): Json<OrchestrationRequest>,
) -> Json<OrchestrationResponse> {
    let job_id = state
        .orchestrator
        .dispatch(&req.session_id, &req.student_text)
        .await;
    Json(OrchestrationResponse { job_id })
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, (StatusCode, String)> {
    let snapshot = state
        .orchestrator
        .status(&job_id)
        .await
        .map_err(into_http_error)?;
    Ok(Json(snapshot.into()))
}

async fn wait_for_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(params): Query<WaitParams>,
) -> Result<Json<JobStatusResponse>, (StatusCode, String)> {
    let timeout = params
        .timeout
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(state.default_wait);
    let snapshot = state
        .orchestrator
        .wait(&job_id, timeout)
        .await
        .map_err(into_http_error)?;
    Ok(Json(snapshot.into()))
}

// ============================================================================
// Session lifecycle
// ============================================================================

async fn open_session(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> StatusCode {
    state.orchestrator.open_session(&req.session_id).await;
    StatusCode::NO_CONTENT
}

async fn close_session(
    State(state): State<AppState>,
    Json(summary): Json<SessionSummaryRecord>,
) -> StatusCode {
    let session_id = summary.session_id.clone();
    state.orchestrator.close_session(&session_id, summary).await;
    StatusCode::NO_CONTENT
}

// ============================================================================
// Escalation
// ============================================================================

async fn trigger_escalation(
    State(state): State<AppState>,
    Json(req): Json<EscalationRequest>,
) -> Json<EscalationResponse> {
    let observer_url = state
        .orchestrator
        .escalate(&req.session_id, &req.reason)
        .await;
    Json(EscalationResponse {
        session_id: req.session_id,
        observer_url,
    })
}

// ============================================================================
// Teacher observer WebSocket
// ============================================================================

/// Messages a connected teacher may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TeacherInbound {
    /// Relayed to every observer of the session.
    Hint { text: String },
    Ping,
}

/// Bridges the escalation bus onto one WebSocket via an unbounded channel.
/// Once the socket task is gone the channel send fails and the bus prunes
/// the subscription on its next broadcast.
struct WsObserver {
    tx: mpsc::UnboundedSender<ObserverMessage>,
}

#[async_trait]
impl EscalationSink for WsObserver {
    async fn send(&self, message: &ObserverMessage) -> Result<()> {
        self.tx
            .send(message.clone())
            .map_err(|_| anyhow!("observer socket closed"))
    }
}

async fn teacher_websocket(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_teacher_socket(socket, session_id, state))
}

async fn handle_teacher_socket(socket: WebSocket, session_id: String, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn EscalationSink> = Arc::new(WsObserver { tx });

    state.escalation.subscribe(&session_id, sink.clone()).await;
    info!(session_id, "teacher observer connected");

    let connected = ObserverMessage::Connected {
        session_id: session_id.clone(),
    };
    if let Ok(payload) = serde_json::to_string(&connected) {
        let _ = ws_tx.send(Message::Text(payload)).await;
    }

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(message) = outbound else { break };
                let Ok(payload) = serde_json::to_string(&message) else { continue };
                if ws_tx.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(raw))) => {
                        match serde_json::from_str::<TeacherInbound>(&raw) {
                            Ok(TeacherInbound::Hint { text }) => {
                                state.escalation.push_hint(&session_id, &text).await;
                                info!(session_id, "teacher hint relayed");
                            }
                            Ok(TeacherInbound::Ping) => {
                                let pong = serde_json::json!({ "type": "pong" }).to_string();
                                if ws_tx.send(Message::Text(pong)).await.is_err() {
                                    break;
                                }
                            }
                            Err(_) => {}
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    state.escalation.unsubscribe(&session_id, &sink).await;
    info!(session_id, "teacher observer disconnected");
}
