//! Sampling protocol error types.
//!
//! # Failure Taxonomy
//!
//! The errors a caller of `send` can observe are deliberately few:
//!
//! - `CapabilityNotSupported`: the responder never declared the push class.
//!   Detected locally, never put on the wire.
//! - `Timeout`: the caller's deadline elapsed before a response arrived.
//! - `SessionClosed`: the session was torn down while the request was pending.
//! - `HandlerError`: the responder's handler failed and reported it back.
//!
//! Everything else describes transport, configuration or decode problems.
//! Stale or unknown responses are not errors at all; they are counted in the
//! correlation diagnostics and otherwise ignored.

use axum::http::StatusCode;
use thiserror::Error;

use crate::protocol::RequestId;

/// Sampling protocol errors.
#[derive(Error, Debug)]
pub enum SamplingError {
    /// The peer did not declare the capability a push requires.
    #[error("Capability not supported: {0}")]
    CapabilityNotSupported(String),

    /// No response arrived before the caller's deadline.
    #[error("Request timed out")]
    Timeout,

    /// The session was closed while the request was pending.
    #[error("Session closed")]
    SessionClosed,

    /// The responder's handler reported a failure.
    #[error("Handler error ({code}): {message}")]
    HandlerError {
        /// Error code reported by the responder.
        code: i64,
        /// Human-readable message.
        message: String,
    },

    /// An envelope could not be decoded.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A request with the same identifier is already pending.
    #[error("Duplicate request id: {0}")]
    DuplicateRequestId(RequestId),

    /// Operation requires an active session.
    #[error("Session not established")]
    SessionNotEstablished,

    /// No session with the given identifier.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Capability negotiation failed.
    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    /// Protocol-level error (invalid state transition, unexpected message).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid message format.
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Network communication error.
    #[error("Network error: {0}")]
    Network(String),

    /// Upstream LLM service error.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Server-side error.
    #[error("Server error: {0}")]
    Server(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// File could not be served to the analysis tool.
    #[error("File access error: {0}")]
    FileAccess(String),

    /// No such file under the files directory.
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for sampling operations
pub type Result<T> = std::result::Result<T, SamplingError>;

impl SamplingError {
    /// HTTP status used when this error is reported by the API layer.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::CapabilityNotSupported(_) => StatusCode::PRECONDITION_FAILED,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::SessionClosed => StatusCode::GONE,
            Self::HandlerError { .. } | Self::Upstream(_) | Self::Network(_) => {
                StatusCode::BAD_GATEWAY
            },
            Self::SessionNotFound(_) | Self::FileNotFound(_) => StatusCode::NOT_FOUND,
            Self::DuplicateRequestId(_) | Self::SessionNotEstablished => StatusCode::CONFLICT,
            Self::FileAccess(_) => StatusCode::FORBIDDEN,
            Self::MalformedEnvelope(_)
            | Self::InvalidMessage(_)
            | Self::NegotiationFailed(_)
            | Self::Protocol(_)
            | Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::Server(_) | Self::Config(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable kind, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CapabilityNotSupported(_) => "capability_not_supported",
            Self::Timeout => "timeout",
            Self::SessionClosed => "session_closed",
            Self::HandlerError { .. } => "handler_error",
            Self::MalformedEnvelope(_) => "malformed_envelope",
            Self::DuplicateRequestId(_) => "duplicate_request_id",
            Self::SessionNotEstablished => "session_not_established",
            Self::SessionNotFound(_) => "session_not_found",
            Self::NegotiationFailed(_) => "negotiation_failed",
            Self::Protocol(_) => "protocol_error",
            Self::InvalidMessage(_) => "invalid_message",
            Self::Network(_) => "network_error",
            Self::Upstream(_) => "upstream_error",
            Self::Server(_) => "server_error",
            Self::Config(_) => "config_error",
            Self::FileAccess(_) => "file_access",
            Self::FileNotFound(_) => "file_not_found",
            Self::Json(_) => "json_error",
            Self::Io(_) => "io_error",
        }
    }
}

impl From<reqwest::Error> for SamplingError {
    fn from(err: reqwest::Error) -> Self {
        SamplingError::Network(err.to_string())
    }
}

impl From<toml::de::Error> for SamplingError {
    fn from(err: toml::de::Error) -> Self {
        SamplingError::Config(err.to_string())
    }
}

impl From<axum::Error> for SamplingError {
    fn from(err: axum::Error) -> Self {
        SamplingError::Server(err.to_string())
    }
}

impl From<base64::DecodeError> for SamplingError {
    fn from(err: base64::DecodeError) -> Self {
        SamplingError::MalformedEnvelope(format!("Base64 decode error: {err}"))
    }
}
