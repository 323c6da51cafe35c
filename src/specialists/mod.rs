//! Subject specialists and the registry that dispatches to them.
//!
//! Each specialist turns one student question into a cold stream of text
//! chunks. The registry owns the subject → generator mapping as a tagged
//! switch over [`SubjectRoute`]; adding a subject means adding a variant
//! and an arm, not a subclass.

pub mod classifier;
pub mod client;

pub use classifier::{ApiIntentRouter, IntentRouter};
pub use client::{ApiSpecialist, ChatClient, UpstreamError};

use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use futures::{Stream, stream};

use crate::config::UpstreamConfig;
use crate::models::SubjectRoute;

/// Boxed stream of response text chunks.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Spoken to the student while a human teacher is pulled in.
pub const ESCALATION_MESSAGE: &str =
    "I'm connecting you with a teacher who can help with this.";

pub const MATH_SYSTEM_PROMPT: &str = "\
You are a friendly math tutor helping students understand mathematical concepts.
Provide clear, step-by-step explanations. Show your work. Use simple language.
When showing calculations, be explicit about each step.
Keep responses concise but complete.";

pub const HISTORY_SYSTEM_PROMPT: &str = "\
You are an engaging history tutor who brings the past to life for students.
Provide accurate historical context, dates, and significance.
Connect historical events to their causes and consequences.
Make history interesting and relevant. Keep responses concise but complete.";

pub const ENGLISH_SYSTEM_PROMPT: &str = "\
You are a supportive English tutor helping students with writing, grammar, and literature.
Provide constructive feedback and clear explanations.
When reviewing writing, highlight strengths before suggesting improvements.
Explain grammar rules with examples. Keep responses helpful and encouraging.";

/// One subject generator. `open` is cheap: the returned stream performs no
/// work until polled, and dropping it cancels generation.
pub trait Specialist: Send + Sync {
    fn open(&self, question: &str) -> TextStream;
}

/// Maps a subject route to its generator.
pub struct SpecialistRegistry {
    math: Arc<dyn Specialist>,
    history: Arc<dyn Specialist>,
    english: Arc<dyn Specialist>,
}

impl SpecialistRegistry {
    pub fn new(
        math: Arc<dyn Specialist>,
        history: Arc<dyn Specialist>,
        english: Arc<dyn Specialist>,
    ) -> Self {
        Self {
            math,
            history,
            english,
        }
    }

    /// Wire all three subjects to one chat-completions endpoint family.
    pub fn from_config(chat: Arc<ChatClient>, config: &UpstreamConfig) -> Self {
        Self::new(
            Arc::new(ApiSpecialist::new(
                Arc::clone(&chat),
                config.math_model.clone(),
                MATH_SYSTEM_PROMPT,
            )),
            Arc::new(ApiSpecialist::new(
                Arc::clone(&chat),
                config.history_model.clone(),
                HISTORY_SYSTEM_PROMPT,
            )),
            Arc::new(ApiSpecialist::new(
                chat,
                config.english_model.clone(),
                ENGLISH_SYSTEM_PROMPT,
            )),
        )
    }

    /// Open a response stream for one student turn.
    ///
    /// `escalate` yields a synthetic one-chunk hand-off line instead of
    /// calling a generator.
    pub fn open(&self, subject: SubjectRoute, question: &str) -> TextStream {
        match subject {
            SubjectRoute::Math => self.math.open(question),
            SubjectRoute::History => self.history.open(question),
            SubjectRoute::English => self.english.open(question),
            SubjectRoute::Escalate => Box::pin(stream::once(async {
                Ok(ESCALATION_MESSAGE.to_string())
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    struct CannedSpecialist(&'static str);

    impl Specialist for CannedSpecialist {
        fn open(&self, _question: &str) -> TextStream {
            let text = self.0.to_string();
            Box::pin(stream::once(async move { Ok(text) }))
        }
    }

    fn registry() -> SpecialistRegistry {
        SpecialistRegistry::new(
            Arc::new(CannedSpecialist("math says hi")),
            Arc::new(CannedSpecialist("history says hi")),
            Arc::new(CannedSpecialist("english says hi")),
        )
    }

    async fn drain(mut stream: TextStream) -> String {
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            out.push_str(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn dispatches_on_the_route_enum() {
        let registry = registry();
        assert_eq!(
            drain(registry.open(SubjectRoute::Math, "q")).await,
            "math says hi"
        );
        assert_eq!(
            drain(registry.open(SubjectRoute::History, "q")).await,
            "history says hi"
        );
        assert_eq!(
            drain(registry.open(SubjectRoute::English, "q")).await,
            "english says hi"
        );
    }

    #[tokio::test]
    async fn escalate_yields_the_handoff_line() {
        let registry = registry();
        assert_eq!(
            drain(registry.open(SubjectRoute::Escalate, "q")).await,
            ESCALATION_MESSAGE
        );
    }
}
