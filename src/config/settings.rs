//! Application configuration.
//!
//! Everything tunable lives here: bind address, upstream endpoint and model
//! selection, job TTLs. Loadable from a JSON file, with serde defaults so a
//! partial file (or none at all) still yields a runnable config.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level configuration tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub jobs: JobConfig,
}

impl AppConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }
}

/// HTTP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base URL handed to teachers for the observer WebSocket.
    #[serde(default = "default_observer_base_url")]
    pub observer_base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            observer_base_url: default_observer_base_url(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8001
}

fn default_observer_base_url() -> String {
    "ws://localhost:8001".to_string()
}

/// Connection and model selection for the upstream text generators.
///
/// One OpenAI-compatible endpoint family serves the classifier, the three
/// subject specialists, moderation, and the safety rewriter. Nothing is
/// hardcoded; swap `base_url` for any compatible provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token; omit for local providers that need none.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_classifier_model")]
    pub classifier_model: String,
    #[serde(default = "default_specialist_model")]
    pub math_model: String,
    #[serde(default = "default_specialist_model")]
    pub history_model: String,
    #[serde(default = "default_specialist_model")]
    pub english_model: String,
    #[serde(default = "default_moderation_model")]
    pub moderation_model: String,
    #[serde(default = "default_rewrite_model")]
    pub rewrite_model: String,
    /// Per-request timeout for non-streaming calls, seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Sampling temperature for classification and rewriting.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            classifier_model: default_classifier_model(),
            math_model: default_specialist_model(),
            history_model: default_specialist_model(),
            english_model: default_specialist_model(),
            moderation_model: default_moderation_model(),
            rewrite_model: default_rewrite_model(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_classifier_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_specialist_model() -> String {
    "gpt-4o".to_string()
}

fn default_moderation_model() -> String {
    "omni-moderation-latest".to_string()
}

fn default_rewrite_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_temperature() -> f64 {
    0.1
}

/// Job store lifecycle knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Terminal jobs older than this are reclaimed.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Reclaimer wake interval.
    #[serde(default = "default_reclaim_interval_secs")]
    pub reclaim_interval_secs: u64,
    /// Default long-poll timeout when the caller does not pass one.
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            reclaim_interval_secs: default_reclaim_interval_secs(),
            wait_timeout_secs: default_wait_timeout_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_reclaim_interval_secs() -> u64 {
    300
}

fn default_wait_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_full_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.server.port, 8001);
        assert_eq!(config.jobs.ttl_secs, 3600);
        assert_eq!(config.jobs.reclaim_interval_secs, 300);
        assert_eq!(config.upstream.temperature, 0.1);
        assert!(config.upstream.api_key.is_none());
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let config: AppConfig = serde_json::from_str(
            r#"{"jobs": {"ttl_secs": 60}, "upstream": {"base_url": "http://localhost:11434"}}"#,
        )
        .unwrap();
        assert_eq!(config.jobs.ttl_secs, 60);
        assert_eq!(config.jobs.reclaim_interval_secs, 300);
        assert_eq!(config.upstream.base_url, "http://localhost:11434");
        assert_eq!(config.upstream.classifier_model, "gpt-4o-mini");
    }
}
