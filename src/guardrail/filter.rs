//! Sentence-buffered streaming filter.
//!
//! Specialist output arrives in chunks of arbitrary size. Moderation wants
//! whole sentences: checking a partial sentence risks rewriting text the
//! student never hears the rest of, and cutting mid-word is audibly wrong.
//! [`SentenceBuffer`] re-aligns the chunk stream to sentence boundaries and
//! [`check_stream_with_sentence_buffer`] runs each sentence through the
//! safety checker before releasing it.
//!
//! The residual flush at end-of-stream is mandatory: a reply that ends
//! without punctuation still has to reach the student.

use std::sync::Arc;

use anyhow::Result;
use async_stream::try_stream;
use futures::{Stream, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use super::SafetyChecker;

/// One or more sentence terminators plus any trailing whitespace.
static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+\s*").expect("sentence terminator pattern"));

/// Accumulates streamed text and splits off complete sentences.
///
/// Purely synchronous; the async filter drives it and owns the safety
/// calls.
#[derive(Debug, Default)]
pub struct SentenceBuffer {
    buffer: String,
}

impl SentenceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every complete sentence it closes off.
    ///
    /// Sentences are returned stripped of surrounding whitespace, in input
    /// order. Text after the last terminator stays buffered.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let mut sentences = Vec::new();
        while let Some(m) = SENTENCE_END.find(&self.buffer) {
            let end = m.end();
            let sentence = self.buffer[..end].trim().to_string();
            self.buffer.drain(..end);
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
        }
        sentences
    }

    /// Take whatever remains at end-of-stream, if non-whitespace.
    pub fn flush(&mut self) -> Option<String> {
        let residual = self.buffer.trim().to_string();
        self.buffer.clear();
        if residual.is_empty() {
            None
        } else {
            Some(residual)
        }
    }
}

/// Apply the safety checker to a chunked text stream, one sentence at a
/// time.
///
/// Emitted items preserve input order; mid-stream sentences carry a single
/// trailing space so the concatenation reads naturally, the flushed
/// residual does not. A checker failure passes the sentence through
/// unchanged (fail-open); an input stream error ends the output stream
/// with that error.
pub fn check_stream_with_sentence_buffer<S>(
    input: S,
    checker: Arc<dyn SafetyChecker>,
) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = Result<String>> + Send + 'static,
{
    try_stream! {
        let mut input = Box::pin(input);
        let mut buffer = SentenceBuffer::new();

        while let Some(chunk) = input.next().await {
            let chunk = chunk?;
            for sentence in buffer.push(&chunk) {
                if let Some(safe) = check_sentence(checker.as_ref(), &sentence).await {
                    yield format!("{safe} ");
                }
            }
        }

        if let Some(residual) = buffer.flush() {
            if let Some(safe) = check_sentence(checker.as_ref(), &residual).await {
                yield safe;
            }
        }
    }
}

/// Run one sentence through the checker. Returns the releasable text, or
/// `None` when the checker yields nothing speakable.
async fn check_sentence(checker: &dyn SafetyChecker, sentence: &str) -> Option<String> {
    match checker.check_and_rewrite(sentence).await {
        Ok(result) => {
            let safe = result.safe_text();
            if safe.is_empty() {
                None
            } else {
                Some(safe.to_string())
            }
        }
        Err(e) => {
            warn!(error = %e, "safety check failed, passing sentence through unchanged");
            Some(sentence.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guardrail::SafetyResult;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use futures::stream;

    // ========================================================================
    // SentenceBuffer
    // ========================================================================

    #[test]
    fn buffers_until_a_terminator_arrives() {
        let mut buf = SentenceBuffer::new();
        assert!(buf.push("Hello wor").is_empty());
        assert!(buf.push("ld").is_empty());
        assert_eq!(buf.push(". Next"), vec!["Hello world."]);
        assert_eq!(buf.flush().as_deref(), Some("Next"));
    }

    #[test]
    fn multi_terminator_runs_split_greedily() {
        let mut buf = SentenceBuffer::new();
        let sentences = buf.push("Wait... Really? Yes!");
        assert_eq!(sentences, vec!["Wait...", "Really?", "Yes!"]);
        assert_eq!(buf.flush(), None);
    }

    #[test]
    fn one_chunk_may_close_several_sentences() {
        let mut buf = SentenceBuffer::new();
        let sentences = buf.push("One. Two! Three? Four");
        assert_eq!(sentences, vec!["One.", "Two!", "Three?"]);
        assert_eq!(buf.flush().as_deref(), Some("Four"));
    }

    #[test]
    fn flush_ignores_pure_whitespace() {
        let mut buf = SentenceBuffer::new();
        buf.push("Done.  ");
        assert_eq!(buf.flush(), None);
    }

    #[test]
    fn no_characters_are_lost_across_arbitrary_chunking() {
        let text = "First sentence. Second one! A third? And a dangling tail";
        // Split the same text three different ways; every non-whitespace
        // character must come back out.
        for size in [1, 3, 7] {
            let mut buf = SentenceBuffer::new();
            let mut out = String::new();
            let chars: Vec<char> = text.chars().collect();
            for chunk in chars.chunks(size) {
                for s in buf.push(&chunk.iter().collect::<String>()) {
                    out.push_str(&s);
                    out.push(' ');
                }
            }
            if let Some(rest) = buf.flush() {
                out.push_str(&rest);
            }
            let squash = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
            assert_eq!(squash(&out), squash(text), "chunk size {size}");
        }
    }

    // ========================================================================
    // Streaming filter
    // ========================================================================

    struct IdentityChecker;

    #[async_trait]
    impl SafetyChecker for IdentityChecker {
        async fn check(&self, text: &str) -> Result<SafetyResult> {
            Ok(SafetyResult::clean(text))
        }

        async fn rewrite(&self, text: &str, _categories: &[String]) -> Result<String> {
            Ok(text.to_string())
        }
    }

    struct RewritingChecker;

    #[async_trait]
    impl SafetyChecker for RewritingChecker {
        async fn check(&self, text: &str) -> Result<SafetyResult> {
            Ok(SafetyResult {
                flagged: true,
                categories: vec!["test".into()],
                original: text.to_string(),
                rewritten: None,
                confidence: 0.7,
            })
        }

        async fn rewrite(&self, _text: &str, _categories: &[String]) -> Result<String> {
            Ok("Rewritten.".to_string())
        }
    }

    struct FailingChecker;

    #[async_trait]
    impl SafetyChecker for FailingChecker {
        async fn check(&self, _text: &str) -> Result<SafetyResult> {
            Err(anyhow!("moderation unavailable"))
        }

        async fn rewrite(&self, _text: &str, _categories: &[String]) -> Result<String> {
            Err(anyhow!("moderation unavailable"))
        }
    }

    fn chunk_stream(chunks: &[&str]) -> impl Stream<Item = Result<String>> + Send + 'static {
        let owned: Vec<Result<String>> = chunks.iter().map(|c| Ok(c.to_string())).collect();
        stream::iter(owned)
    }

    async fn collect_safe(
        chunks: &[&str],
        checker: Arc<dyn SafetyChecker>,
    ) -> Result<Vec<String>> {
        let filtered = check_stream_with_sentence_buffer(chunk_stream(chunks), checker);
        futures::pin_mut!(filtered);
        let mut out = Vec::new();
        while let Some(item) = filtered.next().await {
            out.push(item?);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn residual_without_punctuation_is_flushed() {
        let out = collect_safe(
            &["Hello world", ". Final fragment without punctuation"],
            Arc::new(IdentityChecker),
        )
        .await
        .unwrap();
        assert_eq!(out, vec!["Hello world. ", "Final fragment without punctuation"]);
    }

    #[tokio::test]
    async fn sentences_come_out_in_input_order() {
        let out = collect_safe(&["Wait... Really? Yes!"], Arc::new(IdentityChecker))
            .await
            .unwrap();
        assert_eq!(out, vec!["Wait... ", "Really? ", "Yes! "]);
    }

    #[tokio::test]
    async fn flagged_sentences_are_replaced() {
        let out = collect_safe(&["Harmful content."], Arc::new(RewritingChecker))
            .await
            .unwrap();
        assert_eq!(out, vec!["Rewritten. "]);
    }

    #[tokio::test]
    async fn checker_failure_passes_text_through() {
        let out = collect_safe(
            &["One sentence. And a tail"],
            Arc::new(FailingChecker),
        )
        .await
        .unwrap();
        assert_eq!(out, vec!["One sentence. ", "And a tail"]);
    }

    #[tokio::test]
    async fn empty_stream_emits_nothing() {
        let out = collect_safe(&[], Arc::new(IdentityChecker)).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn input_stream_error_is_surfaced() {
        let chunks: Vec<Result<String>> = vec![
            Ok("Fine so far.".to_string()),
            Err(anyhow!("upstream died")),
        ];
        let filtered =
            check_stream_with_sentence_buffer(stream::iter(chunks), Arc::new(IdentityChecker));
        futures::pin_mut!(filtered);

        assert_eq!(filtered.next().await.unwrap().unwrap(), "Fine so far. ");
        assert!(filtered.next().await.unwrap().is_err());
    }
}
