//! Chat-completions client for the enrichment agents.
//!
//! Speaks the Anthropic messages wire shape: a JSON-only system prompt plus
//! one user message, returning a single text block. Every call carries a
//! hard timeout so a stalled provider degrades into the agent's fallback
//! instead of wedging the pipeline.

use crate::errors::CoreError;
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Model tier requested by an agent.
///
/// Fast maps to a haiku-class model (classify / context / sentiment /
/// summarize); Quality maps to a sonnet-class model (user-facing drafts).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Fast,
    Quality,
}

/// LLM endpoint configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub fast_model: String,
    pub quality_model: String,
}

impl LlmConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            fast_model: "claude-haiku-4-5".to_string(),
            quality_model: "claude-sonnet-4-6".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Thin chat-completions client shared by all agents.
#[derive(Clone)]
pub struct LlmClient {
    config: LlmConfig,
    http: HttpClient,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, CoreError> {
        let http = HttpClient::builder()
            .user_agent("prism-core/0.1")
            .timeout(CALL_TIMEOUT)
            .build()
            .map_err(|e| CoreError::configuration(format!("http client: {e}")))?;
        Ok(Self { config, http })
    }

    fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.config.fast_model,
            ModelTier::Quality => &self.config.quality_model,
        }
    }

    /// Send one system + user prompt pair and return the text of the first
    /// content block.
    pub async fn complete(
        &self,
        tier: ModelTier,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, CoreError> {
        let body = serde_json::json!({
            "model": self.model_for(tier),
            "max_tokens": max_tokens,
            "system": system,
            "messages": [{ "role": "user", "content": user }],
        });

        let response = self
            .http
            .post(format!("{}/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CoreError::transient("llm", "request timed out")
                } else {
                    CoreError::transient("llm", &e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("status {status}");
            return Err(match status.as_u16() {
                401 | 403 => CoreError::auth(message),
                429 => CoreError::rate_limited(message),
                s if s >= 500 => CoreError::transient("llm", &message),
                _ => CoreError::permanent("llm", &message),
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| CoreError::parse(format!("llm response body: {e}")))?;

        let text = payload
            .get("content")
            .and_then(|c| c.get(0))
            .and_then(|block| block.get("text"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| CoreError::parse("llm response missing content[0].text"))?;

        debug!(model = self.model_for(tier), chars = text.len(), "llm completion");
        Ok(text.to_string())
    }

    /// Complete and parse the response as a JSON object, stripping any code
    /// fence the model wrapped around it.
    pub async fn complete_json(
        &self,
        tier: ModelTier,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<Value, CoreError> {
        let text = self.complete(tier, system, user, max_tokens).await?;
        parse_json_response(&text)
    }
}

/// Parse model output as JSON, tolerating ```json fences.
pub fn parse_json_response(text: &str) -> Result<Value, CoreError> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    serde_json::from_str(inner).map_err(|e| CoreError::parse(format!("llm json: {e}")))
}

/// Clamp a numeric field to the unit interval.
pub fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> LlmClient {
        LlmClient::new(LlmConfig::new("test-key").with_base_url(server.uri())).unwrap()
    }

    #[tokio::test]
    async fn test_complete_reads_first_text_block() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("x-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{ "type": "text", "text": "{\"label\": \"urgent\"}" }],
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let out = client
            .complete(ModelTier::Fast, "json only", "classify this", 256)
            .await
            .unwrap();
        assert_eq!(out, "{\"label\": \"urgent\"}");
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .complete(ModelTier::Fast, "s", "u", 64)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_rate_limit_maps_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .complete(ModelTier::Fast, "s", "u", 64)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::RateLimited(_)));
    }

    #[test]
    fn test_parse_json_response_strips_fences() {
        let fenced = "```json\n{\"a\": 1}\n```";
        assert_eq!(parse_json_response(fenced).unwrap()["a"], 1);

        let bare = "{\"a\": 2}";
        assert_eq!(parse_json_response(bare).unwrap()["a"], 2);

        assert!(parse_json_response("not json").is_err());
    }

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(-0.5), 0.0);
        assert_eq!(clamp_unit(0.42), 0.42);
        assert_eq!(clamp_unit(3.0), 1.0);
    }
}
