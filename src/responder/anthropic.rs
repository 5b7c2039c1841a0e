//! Anthropic Messages API handler.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::handler::{HandlerFailure, HandlerResult, SamplingHandler};
use crate::error::{Result, SamplingError};
use crate::protocol::{SamplingContent, SamplingRequest, SamplingResult, StopReason};

/// Default API endpoint
pub const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com";
/// Default model
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-20241022";
/// API version header value
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Handler backed by the Anthropic Messages API
#[derive(Debug, Clone)]
pub struct AnthropicHandler {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: String,
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl AnthropicHandler {
    /// Create a handler using the given API key
    pub fn new(api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| SamplingError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: DEFAULT_ANTHROPIC_URL.to_string(),
            api_key: api_key.to_string(),
            model: DEFAULT_ANTHROPIC_MODEL.to_string(),
        })
    }

    /// Create a handler from `ANTHROPIC_API_KEY`
    pub fn from_env() -> Result<Self> {
        let key = std::env::var(API_KEY_ENV)
            .map_err(|_| SamplingError::Config(format!("{API_KEY_ENV} is not set")))?;
        Self::new(&key)
    }

    /// Override the API endpoint
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Override the model
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Configured model
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the request body
    fn build_body(&self, request: &SamplingRequest) -> Value {
        let block = match &request.content {
            SamplingContent::Text { text } => json!({"type": "text", "text": text}),
            SamplingContent::Image { data, mime_type } => json!({
                "type": "image",
                "source": {"type": "base64", "media_type": mime_type, "data": data}
            }),
            SamplingContent::Binary { .. } => {
                json!({"type": "text", "text": request.content.as_prompt_text()})
            },
        };

        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [{"role": "user", "content": [block]}],
        });
        if let Some(system) = &request.system_prompt {
            body["system"] = Value::String(system.clone());
        }
        body
    }

    async fn call(&self, request: &SamplingRequest) -> HandlerResult {
        let url = format!("{}/v1/messages", self.base_url);
        debug!(model = %self.model, max_tokens = request.max_tokens, "Calling Anthropic API");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.build_body(request))
            .send()
            .await
            .map_err(|e| HandlerFailure::upstream(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("Anthropic API returned {status}: {body}");
            return Err(match status {
                StatusCode::BAD_REQUEST => HandlerFailure::invalid_request(message),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => HandlerFailure::rejected(message),
                _ => HandlerFailure::upstream(message),
            });
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| HandlerFailure::upstream(format!("Invalid response body: {e}")))?;

        let content: String = parsed
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text.as_str())
            .collect();

        info!(model = %parsed.model, chars = content.len(), "Anthropic API answered");
        Ok(SamplingResult {
            content,
            model: parsed.model,
            stop_reason: parsed
                .stop_reason
                .as_deref()
                .map_or(StopReason::EndTurn, StopReason::from_provider),
        })
    }
}

impl SamplingHandler for AnthropicHandler {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn create_message<'a>(&'a self, request: &'a SamplingRequest) -> BoxFuture<'a, HandlerResult> {
        self.call(request).boxed()
    }
}
