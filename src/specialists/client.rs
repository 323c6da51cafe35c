//! Shared client for OpenAI-compatible `/v1/chat/completions` endpoints.
//!
//! One [`ChatClient`] serves every upstream text generator: the classifier
//! uses the blocking [`ChatClient::complete`], specialists consume
//! [`ChatClient::stream_completion`] as an SSE token stream. All connection
//! details come from [`UpstreamConfig`]; nothing is hardcoded, so any
//! provider speaking the OpenAI wire format works (OpenAI, Groq, Ollama in
//! OpenAI mode, vLLM, ...).

use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use futures::StreamExt;
use serde_json::json;
use thiserror::Error;

use super::{Specialist, TextStream};
use crate::config::UpstreamConfig;

/// Errors from the upstream generator endpoints.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// HTTP transport or connection error.
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The request did not complete within the configured timeout.
    #[error("upstream request timed out")]
    Timeout,

    /// The response could not be parsed as expected JSON.
    #[error("failed to parse upstream response: {0}")]
    Parse(String),

    /// The model returned no usable text.
    #[error("upstream returned an empty response")]
    EmptyResponse,
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UpstreamError::Timeout
        } else {
            UpstreamError::Request(e.to_string())
        }
    }
}

/// Thin wrapper over `reqwest` for chat-completions calls.
pub struct ChatClient {
    client: reqwest::Client,
    config: UpstreamConfig,
}

impl ChatClient {
    /// Build a client from application config.
    ///
    /// No global request timeout: streaming completions run as long as the
    /// generation does. Non-streaming calls apply `config.timeout_secs`
    /// per request.
    pub fn from_config(config: &UpstreamConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            config: config.clone(),
        }
    }

    /// The `Authorization: Bearer` header is attached only when an api key
    /// is configured and non-empty, so keyless local providers work.
    fn request(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        let url = format!("{}/v1/chat/completions", self.config.base_url);
        let mut req = self.client.post(&url).json(body);
        let key = self.config.api_key.as_deref().unwrap_or("");
        if !key.is_empty() {
            req = req.bearer_auth(key);
        }
        req
    }

    /// Non-streaming completion. Returns the trimmed message content.
    pub async fn complete(
        &self,
        model: &str,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, UpstreamError> {
        let body = json!({
            "model":       model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user",   "content": user   }
            ],
            "stream":      false,
            "temperature": self.config.temperature,
            "max_tokens":  max_tokens
        });

        let response = self
            .request(&body)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .send()
            .await?
            .error_for_status()?;

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| UpstreamError::Parse(e.to_string()))?;

        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .ok_or(UpstreamError::EmptyResponse)?
            .trim()
            .to_string();

        if content.is_empty() {
            return Err(UpstreamError::EmptyResponse);
        }
        Ok(content)
    }

    /// Streaming completion decoded from SSE `data:` lines into text
    /// deltas.
    ///
    /// The stream is cold: nothing is sent until first poll, and dropping
    /// it aborts the in-flight request, which is how consumer cancellation
    /// cancels generation.
    pub fn stream_completion(
        &self,
        model: &str,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> TextStream {
        let body = json!({
            "model":       model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user",   "content": user   }
            ],
            "stream":      true,
            "temperature": self.config.temperature,
            "max_tokens":  max_tokens
        });
        let req = self.request(&body);

        Box::pin(try_stream! {
            let response = req
                .send()
                .await
                .and_then(|response| response.error_for_status())
                .map_err(UpstreamError::from)?;
            let mut body = Box::pin(response.bytes_stream());
            // Byte buffer: a multi-byte character may straddle two frames,
            // but never a newline, so decoding per complete line is safe.
            let mut pending: Vec<u8> = Vec::new();

            'read: while let Some(frame) = body.next().await {
                let frame = frame.map_err(UpstreamError::from)?;
                pending.extend_from_slice(&frame);

                while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                    let line_bytes: Vec<u8> = pending.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line_bytes);
                    let line = line.trim();
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        break 'read;
                    }
                    let value: serde_json::Value = serde_json::from_str(data)
                        .map_err(|e| UpstreamError::Parse(e.to_string()))?;
                    if let Some(delta) = value["choices"][0]["delta"]["content"].as_str() {
                        if !delta.is_empty() {
                            yield delta.to_string();
                        }
                    }
                }
            }
        })
    }
}

/// A subject tutor backed by one model + system prompt pair.
pub struct ApiSpecialist {
    chat: Arc<ChatClient>,
    model: String,
    system_prompt: &'static str,
}

impl ApiSpecialist {
    pub fn new(chat: Arc<ChatClient>, model: impl Into<String>, system_prompt: &'static str) -> Self {
        Self {
            chat,
            model: model.into(),
            system_prompt,
        }
    }
}

impl Specialist for ApiSpecialist {
    fn open(&self, question: &str) -> TextStream {
        self.chat
            .stream_completion(&self.model, self.system_prompt, question, 1024)
    }
}
