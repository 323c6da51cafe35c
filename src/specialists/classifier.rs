//! Intent classification: one utterance in, one subject route out.
//!
//! The classifier answers with a single word at low temperature; mapping
//! that word onto the route enum (including every fallback) lives in
//! [`RoutingResult::from_classifier_output`], so the trait boundary carries
//! no free-form routing strings.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::client::ChatClient;
use crate::models::RoutingResult;

pub const CLASSIFIER_SYSTEM_PROMPT: &str = "\
You are a question classifier for an AI tutoring system.
Classify the student's question into exactly one category:

- math: arithmetic, algebra, geometry, calculus, statistics, any math topic
- history: historical events, dates, people, civilizations, wars, politics
- english: grammar, writing, literature, reading comprehension, language
- escalate: inappropriate content, safety concerns, or topics outside math/history/english

Respond with ONLY the single word: math, history, english, or escalate.
No explanation, no punctuation, just the single classification word.";

/// Capability seam for the upstream intent classifier.
///
/// Implementations may fail; the orchestrator degrades a failure to the
/// english/0.5 fallback rather than failing the turn.
#[async_trait]
pub trait IntentRouter: Send + Sync {
    async fn route(&self, utterance: &str) -> Result<RoutingResult>;
}

/// Classifier backed by a chat-completions model.
pub struct ApiIntentRouter {
    chat: Arc<ChatClient>,
    model: String,
}

impl ApiIntentRouter {
    pub fn new(chat: Arc<ChatClient>, model: impl Into<String>) -> Self {
        Self {
            chat,
            model: model.into(),
        }
    }
}

#[async_trait]
impl IntentRouter for ApiIntentRouter {
    async fn route(&self, utterance: &str) -> Result<RoutingResult> {
        let raw = self
            .chat
            .complete(&self.model, CLASSIFIER_SYSTEM_PROMPT, utterance, 10)
            .await?;
        let result = RoutingResult::from_classifier_output(&raw);
        debug!(
            raw = %result.raw,
            subject = %result.subject,
            confidence = result.confidence,
            "classified utterance"
        );
        Ok(result)
    }
}
