//! Request and response envelopes for pushed requests.
//!
//! Requests travel initiator → responder over the push stream; responses
//! travel responder → initiator over the response submission path.
//!
//! ```text
//! push frame:
//!   {"jsonrpc":"2.0","id":7,"method":"sampling/createMessage",
//!    "params":{"content":{"type":"text","text":"..."},
//!              "systemPrompt":"...","maxTokens":2000,"temperature":0.3}}
//!
//! response submission:
//!   {"id":7,"result":{"content":"ok","model":"m1","stopReason":"endTurn"}}
//!   {"id":7,"error":{"code":-32603,"message":"..."}}
//! ```

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::{PushCapability, JSONRPC_VERSION, SAMPLING_METHOD};
use crate::error::{Result, SamplingError};

/// JSON-RPC error code: method not found
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC error code: invalid params
pub const INVALID_PARAMS: i64 = -32602;
/// JSON-RPC error code: internal error
pub const INTERNAL_ERROR: i64 = -32603;
/// Upstream LLM failure
pub const UPSTREAM_ERROR: i64 = -32000;
/// The responder declined the request
pub const REQUEST_REJECTED: i64 = -1;

/// Default output length when a caller does not choose one
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
/// Default sampling temperature
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Request identifier, unique within a session
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Content carried by a sampling request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SamplingContent {
    /// Plain text
    Text {
        /// The text
        text: String,
    },
    /// Base64-encoded image
    Image {
        /// Base64 data
        data: String,
        /// MIME type, e.g. `image/png`
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Opaque binary carried as base64 text
    Binary {
        /// Base64 data
        data: String,
        /// MIME type, `application/octet-stream` when unknown
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl SamplingContent {
    /// Text content
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Image content from raw bytes
    pub fn image(bytes: &[u8], mime_type: &str) -> Self {
        Self::Image {
            data: BASE64.encode(bytes),
            mime_type: mime_type.to_string(),
        }
    }

    /// Opaque binary content from raw bytes
    pub fn binary(bytes: &[u8], mime_type: &str) -> Self {
        Self::Binary {
            data: BASE64.encode(bytes),
            mime_type: mime_type.to_string(),
        }
    }

    /// Discriminant as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::Binary { .. } => "binary",
        }
    }

    /// Decode the raw bytes of image or binary content
    pub fn decode_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Self::Text { text } => Ok(text.as_bytes().to_vec()),
            Self::Image { data, .. } | Self::Binary { data, .. } => Ok(BASE64.decode(data)?),
        }
    }

    /// Render as prompt text for backends that only accept text
    pub fn as_prompt_text(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Image { mime_type, data } => {
                format!("This is an image ({mime_type}) encoded in base64:\n\n{data}")
            },
            Self::Binary { mime_type, data } => {
                format!("This is a binary file ({mime_type}) encoded in base64:\n\n{data}")
            },
        }
    }
}

/// Parameters of a sampling request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingRequest {
    /// Structured payload
    pub content: SamplingContent,
    /// Optional system-level instruction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Maximum output length
    pub max_tokens: u32,
    /// Sampling temperature in [0, 1]
    pub temperature: f32,
}

impl SamplingRequest {
    /// Create a request with default parameters
    pub fn new(content: SamplingContent) -> Self {
        Self {
            content,
            system_prompt: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    /// Set the system instruction
    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = Some(prompt.to_string());
        self
    }

    /// Set the maximum output length
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the temperature, clamped to [0, 1]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }

    /// Check numeric parameters
    pub fn validate(&self) -> Result<()> {
        if !self.temperature.is_finite() || !(0.0..=1.0).contains(&self.temperature) {
            return Err(SamplingError::MalformedEnvelope(format!(
                "temperature {} outside [0, 1]",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(SamplingError::MalformedEnvelope(
                "maxTokens must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// A pushed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// JSON-RPC version marker
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// Request identifier
    pub id: RequestId,
    /// Method name
    pub method: String,
    /// Request parameters
    pub params: SamplingRequest,
}

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

impl RequestEnvelope {
    /// Create a sampling request envelope
    pub fn sampling(id: RequestId, params: SamplingRequest) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            method: SAMPLING_METHOD.to_string(),
            params,
        }
    }

    /// Capability class this request belongs to
    pub fn capability(&self) -> Option<PushCapability> {
        PushCapability::from_method(&self.method)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize and validate
    pub fn from_json(json: &str) -> Result<Self> {
        let envelope: Self = serde_json::from_str(json)
            .map_err(|e| SamplingError::MalformedEnvelope(e.to_string()))?;
        envelope.params.validate()?;
        Ok(envelope)
    }
}

/// A push frame as seen by the responder
#[derive(Debug, Clone, PartialEq)]
pub enum InboundPush {
    /// A request the responder knows how to handle
    Request(RequestEnvelope),
    /// A request that must be answered with an error without invoking the handler
    Unsupported {
        /// Identifier to answer
        id: RequestId,
        /// Error to report
        error: ErrorPayload,
    },
}

/// Minimal shape used to salvage the id of an undecodable request
#[derive(Deserialize)]
struct RawRequest {
    id: RequestId,
    method: String,
    #[serde(default)]
    #[allow(dead_code)]
    params: Value,
}

impl InboundPush {
    /// Decode a push frame.
    ///
    /// Frames without a usable id are malformed and return an error; frames
    /// with an id but an unknown method or bad params still get an answer.
    pub fn decode(frame: &str) -> Result<Self> {
        match RequestEnvelope::from_json(frame) {
            Ok(envelope) if envelope.capability().is_some() => Ok(Self::Request(envelope)),
            Ok(envelope) => Ok(Self::Unsupported {
                id: envelope.id,
                error: ErrorPayload::new(
                    METHOD_NOT_FOUND,
                    &format!("Method not found: {}", envelope.method),
                ),
            }),
            Err(err) => {
                let raw: RawRequest = serde_json::from_str(frame)
                    .map_err(|_| SamplingError::MalformedEnvelope(err.to_string()))?;
                let error = if PushCapability::from_method(&raw.method).is_some() {
                    ErrorPayload::new(INVALID_PARAMS, &err.to_string())
                } else {
                    ErrorPayload::new(METHOD_NOT_FOUND, &format!("Method not found: {}", raw.method))
                };
                Ok(Self::Unsupported { id: raw.id, error })
            },
        }
    }
}

/// Why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    /// Model finished its turn
    EndTurn,
    /// A stop sequence was hit
    StopSequence,
    /// Output length limit reached
    MaxTokens,
    /// Anything else
    #[serde(other)]
    Other,
}

impl StopReason {
    /// Map a snake_case provider stop reason
    pub fn from_provider(reason: &str) -> Self {
        match reason {
            "end_turn" | "endTurn" | "stop" => Self::EndTurn,
            "stop_sequence" | "stopSequence" => Self::StopSequence,
            "max_tokens" | "maxTokens" | "length" => Self::MaxTokens,
            _ => Self::Other,
        }
    }
}

/// Successful sampling result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingResult {
    /// Produced content
    #[serde(deserialize_with = "deserialize_result_content")]
    pub content: String,
    /// Label of the model that produced it
    pub model: String,
    /// Stop reason
    pub stop_reason: StopReason,
}

impl SamplingResult {
    /// Create a result
    pub fn new(content: &str, model: &str, stop_reason: StopReason) -> Self {
        Self {
            content: content.to_string(),
            model: model.to_string(),
            stop_reason,
        }
    }
}

/// Accepts either `"ok"` or an MCP text block `{"type":"text","text":"ok"}`
fn deserialize_result_content<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ContentRepr {
        Plain(String),
        Block { text: String },
    }

    Ok(match ContentRepr::deserialize(deserializer)? {
        ContentRepr::Plain(text) | ContentRepr::Block { text } => text,
    })
}

/// Failure reported by the responder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code
    pub code: i64,
    /// Human-readable message
    pub message: String,
    /// Optional structured detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorPayload {
    /// Create an error payload
    pub fn new(code: i64, message: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
            data: None,
        }
    }
}

/// Result or failure, never both
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    /// Handler produced content
    Success(SamplingResult),
    /// Handler failed
    Failure(ErrorPayload),
}

/// A submitted response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawResponse", into = "RawResponse")]
pub struct ResponseEnvelope {
    /// Identifier of the request being answered
    pub id: RequestId,
    /// Outcome
    pub outcome: ResponseOutcome,
}

#[derive(Serialize, Deserialize)]
struct RawResponse {
    #[serde(default = "jsonrpc_version")]
    jsonrpc: String,
    id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<SamplingResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorPayload>,
}

impl TryFrom<RawResponse> for ResponseEnvelope {
    type Error = String;

    fn try_from(raw: RawResponse) -> std::result::Result<Self, Self::Error> {
        let outcome = match (raw.result, raw.error) {
            (Some(result), None) => ResponseOutcome::Success(result),
            (None, Some(error)) => ResponseOutcome::Failure(error),
            (Some(_), Some(_)) => {
                return Err(format!("response {} carries both result and error", raw.id))
            },
            (None, None) => {
                return Err(format!("response {} carries neither result nor error", raw.id))
            },
        };
        Ok(Self {
            id: raw.id,
            outcome,
        })
    }
}

impl From<ResponseEnvelope> for RawResponse {
    fn from(envelope: ResponseEnvelope) -> Self {
        let (result, error) = match envelope.outcome {
            ResponseOutcome::Success(result) => (Some(result), None),
            ResponseOutcome::Failure(error) => (None, Some(error)),
        };
        Self {
            jsonrpc: jsonrpc_version(),
            id: envelope.id,
            result,
            error,
        }
    }
}

impl ResponseEnvelope {
    /// Successful response
    pub fn success(id: RequestId, result: SamplingResult) -> Self {
        Self {
            id,
            outcome: ResponseOutcome::Success(result),
        }
    }

    /// Failed response
    pub fn failure(id: RequestId, error: ErrorPayload) -> Self {
        Self {
            id,
            outcome: ResponseOutcome::Failure(error),
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SamplingError::MalformedEnvelope(e.to_string()))
    }

    /// Convert into what the waiting caller receives
    pub fn into_result(self) -> Result<SamplingResult> {
        match self.outcome {
            ResponseOutcome::Success(result) => Ok(result),
            ResponseOutcome::Failure(error) => Err(SamplingError::HandlerError {
                code: error.code,
                message: error.message,
            }),
        }
    }
}
