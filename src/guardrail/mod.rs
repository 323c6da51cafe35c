//! Content-safety guardrail: the checker seam and its streaming filter.
//!
//! Specialist output never reaches audio synthesis unchecked. Text is
//! re-aligned to sentence boundaries by [`filter`] and each sentence runs
//! through a [`SafetyChecker`] before it is released. The checker is
//! fail-open end to end: an unreachable moderation backend must degrade the
//! guardrail, never silence the tutor.

pub mod filter;
pub mod moderation;

pub use filter::{SentenceBuffer, check_stream_with_sentence_buffer};
pub use moderation::ApiSafetyChecker;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Safe text substituted when a flagged sentence cannot be rewritten.
pub const REWRITE_FALLBACK: &str =
    "I apologize, but I cannot answer that question in the way you've asked. \
     Please try rephrasing.";

/// Outcome of a content-safety check for one piece of text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SafetyResult {
    /// Whether the moderation backend flagged the text.
    pub flagged: bool,
    /// Category labels that triggered the flag.
    pub categories: Vec<String>,
    /// The text as submitted.
    pub original: String,
    /// Safe replacement, present only when flagged text was rewritten.
    pub rewritten: Option<String>,
    /// Highest category score reported by moderation, 0.0 when clean.
    pub confidence: f64,
}

impl SafetyResult {
    /// An unflagged passthrough result.
    pub fn clean(text: impl Into<String>) -> Self {
        Self {
            original: text.into(),
            ..Self::default()
        }
    }

    /// The text that may be spoken: the rewrite when one exists for flagged
    /// content, otherwise the original.
    pub fn safe_text(&self) -> &str {
        if self.flagged {
            if let Some(rewritten) = &self.rewritten {
                return rewritten;
            }
        }
        &self.original
    }
}

/// Capability seam for the external moderation + rewrite service.
#[async_trait]
pub trait SafetyChecker: Send + Sync {
    /// Classify `text` as flagged/clean. Implementations talking to a real
    /// backend fail open (clean result) on transport errors; an `Err` from
    /// a mock still gets the same treatment from callers.
    async fn check(&self, text: &str) -> Result<SafetyResult>;

    /// Produce a safe rewrite of flagged text.
    async fn rewrite(&self, text: &str, categories: &[String]) -> Result<String>;

    /// Check `text` and rewrite it when flagged. A failed rewrite falls
    /// back to the fixed apology line rather than releasing flagged text.
    async fn check_and_rewrite(&self, text: &str) -> Result<SafetyResult> {
        let mut result = self.check(text).await?;
        if result.flagged {
            match self.rewrite(text, &result.categories).await {
                Ok(safe) => result.rewritten = Some(safe),
                Err(e) => {
                    warn!(error = %e, "rewrite failed, substituting fallback line");
                    result.rewritten = Some(REWRITE_FALLBACK.to_string());
                }
            }
            warn!(
                categories = ?result.categories,
                "content flagged, rewritten before release"
            );
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_text_prefers_rewrite_only_when_flagged() {
        let clean = SafetyResult::clean("all good");
        assert_eq!(clean.safe_text(), "all good");

        let flagged = SafetyResult {
            flagged: true,
            original: "bad".into(),
            rewritten: Some("good".into()),
            ..SafetyResult::default()
        };
        assert_eq!(flagged.safe_text(), "good");

        // Flagged without a rewrite falls back to the original.
        let unrewritten = SafetyResult {
            flagged: true,
            original: "bad".into(),
            ..SafetyResult::default()
        };
        assert_eq!(unrewritten.safe_text(), "bad");
    }

    struct FlaggingChecker {
        rewrite_fails: bool,
    }

    #[async_trait]
    impl SafetyChecker for FlaggingChecker {
        async fn check(&self, text: &str) -> Result<SafetyResult> {
            Ok(SafetyResult {
                flagged: true,
                categories: vec!["violence".into()],
                original: text.to_string(),
                rewritten: None,
                confidence: 0.9,
            })
        }

        async fn rewrite(&self, _text: &str, _categories: &[String]) -> Result<String> {
            if self.rewrite_fails {
                anyhow::bail!("rewrite backend down");
            }
            Ok("Safe content.".to_string())
        }
    }

    #[tokio::test]
    async fn check_and_rewrite_attaches_rewrite() {
        let checker = FlaggingChecker {
            rewrite_fails: false,
        };
        let result = checker.check_and_rewrite("Harmful content.").await.unwrap();
        assert!(result.flagged);
        assert_eq!(result.safe_text(), "Safe content.");
    }

    #[tokio::test]
    async fn failed_rewrite_substitutes_the_apology() {
        let checker = FlaggingChecker {
            rewrite_fails: true,
        };
        let result = checker.check_and_rewrite("Harmful content.").await.unwrap();
        assert!(result.flagged);
        assert_eq!(result.safe_text(), REWRITE_FALLBACK);
    }
}
