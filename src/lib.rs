pub mod audit;
pub mod config;
pub mod escalation;
pub mod guardrail;
pub mod models;
pub mod orchestrator;
pub mod server;
pub mod specialists;

// Re-export main types
pub use audit::{
    AuditSink, EscalationRecord, NoopAuditSink, RoutingDecisionRecord, SafetyEventRecord,
    SessionSummaryRecord, TracingAuditSink, TranscriptTurnRecord,
};
pub use config::{AppConfig, JobConfig, ServerConfig, UpstreamConfig};
pub use escalation::{EscalationBus, EscalationSink, ObserverMessage};
pub use guardrail::{
    ApiSafetyChecker, REWRITE_FALLBACK, SafetyChecker, SafetyResult, SentenceBuffer,
    check_stream_with_sentence_buffer,
};
pub use models::{Job, JobSnapshot, JobStatus, RoutingResult, SessionState, SubjectRoute};
pub use orchestrator::{
    Clock, JobStore, Orchestrator, OrchestratorError, SessionRegistry, SystemClock,
};
pub use server::AppState;
pub use specialists::{
    ApiIntentRouter, ApiSpecialist, ChatClient, ESCALATION_MESSAGE, IntentRouter, Specialist,
    SpecialistRegistry, TextStream, UpstreamError,
};
