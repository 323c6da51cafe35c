//! HTTP-backed safety checker: moderation endpoint + rewrite model.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::error;

use super::{SafetyChecker, SafetyResult};
use crate::config::UpstreamConfig;
use crate::specialists::{ChatClient, UpstreamError};

/// Checks text against an OpenAI-compatible `/v1/moderations` endpoint and
/// rewrites flagged content through a chat-completions model.
///
/// Moderation transport failures fail open: the result is an unflagged
/// passthrough, logged for monitoring. An unreachable safety backend must
/// degrade the guardrail, not silence the tutor.
pub struct ApiSafetyChecker {
    client: reqwest::Client,
    chat: Arc<ChatClient>,
    config: UpstreamConfig,
}

impl ApiSafetyChecker {
    pub fn new(chat: Arc<ChatClient>, config: &UpstreamConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            chat,
            config: config.clone(),
        }
    }

    async fn moderate(&self, text: &str) -> Result<SafetyResult, UpstreamError> {
        let url = format!("{}/v1/moderations", self.config.base_url);
        let body = json!({
            "model": self.config.moderation_model,
            "input": text
        });

        let mut req = self
            .client
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(self.config.timeout_secs));
        let key = self.config.api_key.as_deref().unwrap_or("");
        if !key.is_empty() {
            req = req.bearer_auth(key);
        }

        let value: serde_json::Value = req
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| UpstreamError::Parse(e.to_string()))?;

        let result = &value["results"][0];
        let flagged = result["flagged"].as_bool().unwrap_or(false);

        let categories: Vec<String> = result["categories"]
            .as_object()
            .map(|map| {
                map.iter()
                    .filter(|(_, hit)| hit.as_bool().unwrap_or(false))
                    .map(|(category, _)| category.clone())
                    .collect()
            })
            .unwrap_or_default();

        let confidence = if flagged {
            result["category_scores"]
                .as_object()
                .map(|map| {
                    map.values()
                        .filter_map(|score| score.as_f64())
                        .fold(0.0, f64::max)
                })
                .unwrap_or(0.0)
        } else {
            0.0
        };

        Ok(SafetyResult {
            flagged,
            categories,
            original: text.to_string(),
            rewritten: None,
            confidence,
        })
    }
}

#[async_trait]
impl SafetyChecker for ApiSafetyChecker {
    async fn check(&self, text: &str) -> Result<SafetyResult> {
        match self.moderate(text).await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!(error = %e, "moderation check failed, failing open");
                Ok(SafetyResult::clean(text))
            }
        }
    }

    async fn rewrite(&self, text: &str, categories: &[String]) -> Result<String> {
        let system = "You are a content safety editor for an educational AI tutor. \
                      Rewrite content to be safe while preserving educational value.";
        let prompt = format!(
            "The following educational AI response was flagged for: {}.\n\
             Rewrite it to be completely safe and appropriate for students, \
             while keeping the educational value:\n\n{}",
            categories.join(", "),
            text
        );

        let rewritten = self
            .chat
            .complete(&self.config.rewrite_model, system, &prompt, 500)
            .await?;
        Ok(rewritten)
    }
}
