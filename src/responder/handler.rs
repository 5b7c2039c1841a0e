//! Capability handlers: whatever actually answers a pushed request.
//!
//! The responder hands each decoded request to a [`SamplingHandler`] and
//! turns its outcome into a response envelope. Handlers are injected, so a
//! process can run several sessions with different backends and tests can
//! use [`MockHandler`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;

use crate::protocol::{
    ErrorPayload, SamplingContent, SamplingRequest, SamplingResult, StopReason, INTERNAL_ERROR,
    INVALID_PARAMS, REQUEST_REJECTED, UPSTREAM_ERROR,
};

/// Outcome of a handler invocation
pub type HandlerResult = std::result::Result<SamplingResult, HandlerFailure>;

/// Answers sampling requests
pub trait SamplingHandler: Send + Sync {
    /// Label used in logs
    fn name(&self) -> &str;

    /// Produce content for a request
    fn create_message<'a>(&'a self, request: &'a SamplingRequest) -> BoxFuture<'a, HandlerResult>;
}

/// Category of handler failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The request could not be understood
    InvalidRequest,
    /// The responder declined to answer
    Rejected,
    /// The backend failed
    Upstream,
    /// Anything else
    Internal,
}

impl FailureKind {
    /// Error code reported to the initiator
    pub fn code(self) -> i64 {
        match self {
            Self::InvalidRequest => INVALID_PARAMS,
            Self::Rejected => REQUEST_REJECTED,
            Self::Upstream => UPSTREAM_ERROR,
            Self::Internal => INTERNAL_ERROR,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest => write!(f, "invalid request"),
            Self::Rejected => write!(f, "rejected"),
            Self::Upstream => write!(f, "upstream failure"),
            Self::Internal => write!(f, "internal error"),
        }
    }
}

/// A typed handler failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct HandlerFailure {
    /// Category
    pub kind: FailureKind,
    /// Human-readable message
    pub message: String,
}

impl HandlerFailure {
    /// Create a failure
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The request could not be understood
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidRequest, message)
    }

    /// The responder declined
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Rejected, message)
    }

    /// The backend failed
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Upstream, message)
    }

    /// Anything else
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }

    /// Wire representation
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload::new(self.kind.code(), &self.message)
    }
}

/// Default model label reported by [`MockHandler`]
pub const MOCK_MODEL: &str = "mock-test-model";

#[derive(Debug, Clone)]
enum MockReply {
    Fixed(String),
    Echo,
}

/// Deterministic handler for tests and offline runs
#[derive(Debug)]
pub struct MockHandler {
    model: String,
    reply: MockReply,
    stop_reason: StopReason,
    delay: Option<Duration>,
    failure: Option<HandlerFailure>,
    calls: AtomicU64,
}

impl Default for MockHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHandler {
    /// Handler that describes whatever it receives
    pub fn new() -> Self {
        Self {
            model: MOCK_MODEL.to_string(),
            reply: MockReply::Echo,
            stop_reason: StopReason::EndTurn,
            delay: None,
            failure: None,
            calls: AtomicU64::new(0),
        }
    }

    /// Handler that always answers with `content`
    pub fn fixed(content: &str) -> Self {
        Self {
            reply: MockReply::Fixed(content.to_string()),
            ..Self::new()
        }
    }

    /// Handler that always fails
    pub fn failing(failure: HandlerFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::new()
        }
    }

    /// Set the reported model label
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Set the reported stop reason
    pub fn with_stop_reason(mut self, stop_reason: StopReason) -> Self {
        self.stop_reason = stop_reason;
        self
    }

    /// Wait before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of requests seen
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn describe(content: &SamplingContent) -> String {
        match content {
            SamplingContent::Text { text } => format!("Mock response to: {text}"),
            SamplingContent::Image { data, mime_type }
            | SamplingContent::Binary { data, mime_type } => format!(
                "Mock analysis of {} content ({mime_type}, {} base64 chars)",
                content.kind(),
                data.len()
            ),
        }
    }
}

impl SamplingHandler for MockHandler {
    fn name(&self) -> &str {
        "mock"
    }

    fn create_message<'a>(&'a self, request: &'a SamplingRequest) -> BoxFuture<'a, HandlerResult> {
        async move {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(failure) = &self.failure {
                return Err(failure.clone());
            }

            let content = match &self.reply {
                MockReply::Fixed(text) => text.clone(),
                MockReply::Echo => Self::describe(&request.content),
            };
            Ok(SamplingResult {
                content,
                model: self.model.clone(),
                stop_reason: self.stop_reason,
            })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_echo() {
        let handler = MockHandler::new();
        let request = SamplingRequest::new(SamplingContent::text("ping"));

        let result = handler.create_message(&request).await.unwrap();
        assert_eq!(result.content, "Mock response to: ping");
        assert_eq!(result.model, MOCK_MODEL);
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_describes_binary() {
        let handler = MockHandler::new();
        let request = SamplingRequest::new(SamplingContent::binary(&[1, 2, 3], "application/pdf"));

        let result = handler.create_message(&request).await.unwrap();
        assert!(result.content.contains("binary"));
        assert!(result.content.contains("application/pdf"));
    }

    #[tokio::test]
    async fn test_mock_failure_maps_to_code() {
        let handler = MockHandler::failing(HandlerFailure::upstream("model overloaded"));
        let request = SamplingRequest::new(SamplingContent::text("x"));

        let failure = handler.create_message(&request).await.unwrap_err();
        let payload = failure.to_payload();
        assert_eq!(payload.code, UPSTREAM_ERROR);
        assert_eq!(payload.message, "model overloaded");
    }

    #[test]
    fn test_failure_codes() {
        assert_eq!(FailureKind::InvalidRequest.code(), -32602);
        assert_eq!(FailureKind::Rejected.code(), -1);
        assert_eq!(FailureKind::Internal.code(), -32603);
        assert_eq!(
            HandlerFailure::rejected("user declined").to_string(),
            "rejected: user declined"
        );
    }
}
