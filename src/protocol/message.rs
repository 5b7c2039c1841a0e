//! Handshake messages.
//!
//! Defines the wire format for HELLO, ACCEPT, REJECT and CLOSE. These
//! travel over plain request/response HTTP; pushed requests and their
//! responses use the envelopes in [`super::envelope`] instead.

use serde::{Deserialize, Serialize};

use super::Capabilities;

/// Message types in the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    /// Responder opens a session and declares its capabilities
    Hello,
    /// Initiator confirms the session
    Accept,
    /// Initiator refuses the session
    Reject,
    /// Either side terminates the session
    Close,
}

/// Handshake message envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message type
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    /// Session ID (empty for HELLO)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Message payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<MessagePayload>,
    /// Timestamp (Unix millis)
    pub timestamp: u64,
}

/// Message payload variants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessagePayload {
    /// Capabilities for HELLO/ACCEPT
    Capabilities(Capabilities),
    /// Rejection reason
    Rejection(RejectionInfo),
    /// Empty (for CLOSE)
    Empty {},
}

/// Rejection information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionInfo {
    /// Rejection reason code
    pub code: RejectionCode,
    /// Human-readable message
    pub message: String,
}

/// Rejection reason codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCode {
    /// Protocol version mismatch
    VersionMismatch,
    /// Unknown/other error
    Unknown,
}

impl Message {
    /// Create a HELLO message
    pub fn hello(capabilities: Capabilities) -> Self {
        Self {
            msg_type: MessageType::Hello,
            session_id: None,
            payload: Some(MessagePayload::Capabilities(capabilities)),
            timestamp: current_timestamp(),
        }
    }

    /// Create an ACCEPT message
    pub fn accept(session_id: &str, capabilities: Capabilities) -> Self {
        Self {
            msg_type: MessageType::Accept,
            session_id: Some(session_id.to_string()),
            payload: Some(MessagePayload::Capabilities(capabilities)),
            timestamp: current_timestamp(),
        }
    }

    /// Create a REJECT message
    pub fn reject(code: RejectionCode, message: &str) -> Self {
        Self {
            msg_type: MessageType::Reject,
            session_id: None,
            payload: Some(MessagePayload::Rejection(RejectionInfo {
                code,
                message: message.to_string(),
            })),
            timestamp: current_timestamp(),
        }
    }

    /// Create a CLOSE message
    pub fn close(session_id: &str) -> Self {
        Self {
            msg_type: MessageType::Close,
            session_id: Some(session_id.to_string()),
            payload: Some(MessagePayload::Empty {}),
            timestamp: current_timestamp(),
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Get capabilities from HELLO/ACCEPT payload
    pub fn get_capabilities(&self) -> Option<&Capabilities> {
        match &self.payload {
            Some(MessagePayload::Capabilities(caps)) => Some(caps),
            _ => None,
        }
    }

    /// Get rejection info
    pub fn get_rejection(&self) -> Option<&RejectionInfo> {
        match &self.payload {
            Some(MessagePayload::Rejection(info)) => Some(info),
            _ => None,
        }
    }
}

/// Get current timestamp in milliseconds
fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_message() {
        let msg = Message::hello(Capabilities::responder("client"));

        assert_eq!(msg.msg_type, MessageType::Hello);
        assert!(msg.session_id.is_none());

        let json = msg.to_json().unwrap();
        let parsed = Message::from_json(&json).unwrap();
        assert_eq!(parsed.msg_type, MessageType::Hello);
        assert!(parsed.get_capabilities().unwrap().supports_sampling_push);
    }

    #[test]
    fn test_accept_message() {
        let msg = Message::accept("session-123", Capabilities::default());

        assert_eq!(msg.msg_type, MessageType::Accept);
        assert_eq!(msg.session_id, Some("session-123".to_string()));
    }

    #[test]
    fn test_reject_message() {
        let msg = Message::reject(RejectionCode::VersionMismatch, "Version 9.0 not supported");

        let json = msg.to_json().unwrap();
        assert!(json.contains("VERSION_MISMATCH"));

        let parsed = Message::from_json(&json).unwrap();
        let rejection = parsed.get_rejection().unwrap();
        assert_eq!(rejection.code, RejectionCode::VersionMismatch);
    }

    #[test]
    fn test_rejection_codes_on_wire() {
        let code: RejectionCode = serde_json::from_str("\"UNKNOWN\"").unwrap();
        assert_eq!(code, RejectionCode::Unknown);
        assert!(serde_json::from_str::<RejectionCode>("\"INVALID_STATE\"").is_err());
    }

    #[test]
    fn test_close_has_no_capabilities() {
        let msg = Message::close("session-9");
        let parsed = Message::from_json(&msg.to_json().unwrap()).unwrap();

        assert_eq!(parsed.msg_type, MessageType::Close);
        assert!(parsed.get_capabilities().is_none());
        assert!(parsed.get_rejection().is_none());
    }
}
