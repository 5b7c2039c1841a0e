//! Session management for the sampling protocol.
//!
//! Tracks the handshake, the negotiated peer capabilities and the lifecycle
//! state that decides whether pushes and responses may flow.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::capabilities::{Capabilities, NegotiatedCaps, PushCapability};
use super::message::{Message, RejectionCode};
use super::SESSION_TIMEOUT_SECS;
use crate::error::{Result, SamplingError};

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No handshake yet
    Connecting,
    /// HELLO exchanged, waiting for the outcome
    Negotiating,
    /// Pushes and responses may flow
    Active,
    /// Teardown started; nothing new is pushed
    Draining,
    /// Terminal
    Closed,
}

/// Sampling protocol session
#[derive(Debug)]
pub struct Session {
    id: String,
    state: SessionState,
    local_caps: Capabilities,
    remote_caps: Option<Capabilities>,
    negotiated: Option<NegotiatedCaps>,
    created_at: DateTime<Utc>,
    last_activity: Instant,
    timeout: Duration,
    messages_sent: u64,
    messages_received: u64,
}

impl Session {
    /// Create new session with capabilities
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state: SessionState::Connecting,
            local_caps: capabilities,
            remote_caps: None,
            negotiated: None,
            created_at: Utc::now(),
            last_activity: Instant::now(),
            timeout: Duration::from_secs(SESSION_TIMEOUT_SECS),
            messages_sent: 0,
            messages_received: 0,
        }
    }

    /// Set the idle timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get session ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Capabilities we declared
    pub fn local_capabilities(&self) -> &Capabilities {
        &self.local_caps
    }

    /// Capabilities the peer declared
    pub fn remote_capabilities(&self) -> Option<&Capabilities> {
        self.remote_caps.as_ref()
    }

    /// Negotiation outcome
    pub fn negotiated(&self) -> Option<&NegotiatedCaps> {
        self.negotiated.as_ref()
    }

    /// Creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Check if session is active
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Check if session is closed
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Check if session has been idle too long
    pub fn is_expired(&self) -> bool {
        self.last_activity.elapsed() > self.timeout
    }

    /// Whether new pushes may be sent
    pub fn can_send(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Whether responses may still be delivered
    pub fn can_deliver(&self) -> bool {
        matches!(self.state, SessionState::Active | SessionState::Draining)
    }

    /// Whether the peer accepts pushes of the given class
    pub fn peer_accepts(&self, capability: PushCapability) -> bool {
        self.negotiated
            .as_ref()
            .is_some_and(|n| n.peer_accepts(capability))
    }

    /// Check the state and capability gates for a push
    pub fn require_push(&self, capability: PushCapability) -> Result<()> {
        match self.state {
            SessionState::Active => {},
            SessionState::Draining | SessionState::Closed => return Err(SamplingError::SessionClosed),
            SessionState::Connecting | SessionState::Negotiating => {
                return Err(SamplingError::SessionNotEstablished)
            },
        }
        if !self.peer_accepts(capability) {
            return Err(SamplingError::CapabilityNotSupported(capability.to_string()));
        }
        Ok(())
    }

    /// Create HELLO message to open the handshake
    pub fn create_hello(&mut self) -> Message {
        self.state = SessionState::Negotiating;
        self.messages_sent += 1;
        self.touch();
        Message::hello(self.local_caps.clone())
    }

    /// Process incoming HELLO and create ACCEPT/REJECT response
    pub fn process_hello(&mut self, hello: &Message) -> Result<Message> {
        if self.state != SessionState::Connecting {
            return Err(SamplingError::Protocol(format!(
                "Cannot process HELLO in state {:?}",
                self.state
            )));
        }

        let remote_caps = hello
            .get_capabilities()
            .ok_or_else(|| SamplingError::InvalidMessage("HELLO missing capabilities".to_string()))?;

        self.state = SessionState::Negotiating;
        self.messages_received += 1;
        self.touch();

        match self.local_caps.negotiate(remote_caps) {
            Some(negotiated) => {
                self.remote_caps = Some(remote_caps.clone());
                self.negotiated = Some(negotiated);
                self.state = SessionState::Active;
                self.messages_sent += 1;
                Ok(Message::accept(&self.id, self.local_caps.clone()))
            },
            None => {
                self.state = SessionState::Closed;
                self.messages_sent += 1;
                Ok(Message::reject(
                    RejectionCode::VersionMismatch,
                    &format!(
                        "Version {} not compatible with {}",
                        remote_caps.protocol_version, self.local_caps.protocol_version
                    ),
                ))
            },
        }
    }

    /// Process incoming ACCEPT message
    pub fn process_accept(&mut self, accept: &Message) -> Result<()> {
        if self.state != SessionState::Negotiating {
            return Err(SamplingError::Protocol(format!(
                "Cannot process ACCEPT in state {:?}",
                self.state
            )));
        }

        let remote_caps = accept
            .get_capabilities()
            .ok_or_else(|| SamplingError::InvalidMessage("ACCEPT missing capabilities".to_string()))?;

        let session_id = accept
            .session_id
            .as_ref()
            .ok_or_else(|| SamplingError::InvalidMessage("ACCEPT missing session ID".to_string()))?;

        self.messages_received += 1;
        self.touch();
        self.id.clone_from(session_id);

        match self.local_caps.negotiate(remote_caps) {
            Some(negotiated) => {
                self.remote_caps = Some(remote_caps.clone());
                self.negotiated = Some(negotiated);
                self.state = SessionState::Active;
                Ok(())
            },
            None => {
                self.state = SessionState::Closed;
                Err(SamplingError::NegotiationFailed(
                    "Failed to negotiate capabilities".to_string(),
                ))
            },
        }
    }

    /// Process incoming REJECT message
    pub fn process_reject(&mut self, reject: &Message) -> Result<()> {
        self.messages_received += 1;
        self.state = SessionState::Closed;

        let reason = reject
            .get_rejection()
            .map_or_else(|| "Unknown rejection".to_string(), |r| format!("{:?}: {}", r.code, r.message));

        Err(SamplingError::NegotiationFailed(reason))
    }

    /// Stop accepting new pushes; responses may still arrive
    pub fn begin_drain(&mut self) {
        if matches!(
            self.state,
            SessionState::Active | SessionState::Connecting | SessionState::Negotiating
        ) {
            self.state = SessionState::Draining;
        }
    }

    /// Close the session
    pub fn close(&mut self) -> Message {
        self.state = SessionState::Closed;
        self.messages_sent += 1;
        Message::close(&self.id)
    }

    /// Record an outbound message
    pub fn record_sent(&mut self) {
        self.messages_sent += 1;
        self.touch();
    }

    /// Record an inbound message
    pub fn record_received(&mut self) {
        self.messages_received += 1;
        self.touch();
    }

    /// Get session statistics
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.id.clone(),
            state: self.state,
            peer: self
                .negotiated
                .as_ref()
                .map(|n| format!("{}/{}", n.peer.name, n.peer.version)),
            supports_sampling_push: self.peer_accepts(PushCapability::Sampling),
            created_at: self.created_at,
            messages_sent: self.messages_sent,
            messages_received: self.messages_received,
            idle_secs: self.last_activity.elapsed().as_secs(),
        }
    }

    /// Update last activity timestamp
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Session statistics
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    /// Session ID
    pub session_id: String,
    /// Current state
    pub state: SessionState,
    /// Peer implementation, `name/version`
    pub peer: Option<String>,
    /// Peer accepts sampling pushes
    pub supports_sampling_push: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Messages sent
    pub messages_sent: u64,
    /// Messages received
    pub messages_received: u64,
    /// Seconds since last activity
    pub idle_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;

    fn handshake() -> (Session, Session) {
        let mut responder = Session::new(Capabilities::responder("client"));
        let mut initiator = Session::new(Capabilities::new("server"));

        let hello = responder.create_hello();
        let accept = initiator.process_hello(&hello).unwrap();
        responder.process_accept(&accept).unwrap();
        (responder, initiator)
    }

    #[test]
    fn test_session_handshake() {
        let mut responder = Session::new(Capabilities::responder("client"));
        let hello = responder.create_hello();
        assert_eq!(responder.state(), SessionState::Negotiating);

        let mut initiator = Session::new(Capabilities::new("server"));
        let accept = initiator.process_hello(&hello).unwrap();
        assert_eq!(initiator.state(), SessionState::Active);
        assert_eq!(accept.msg_type, MessageType::Accept);

        responder.process_accept(&accept).unwrap();
        assert_eq!(responder.state(), SessionState::Active);
        assert_eq!(responder.id(), initiator.id());
    }

    #[test]
    fn test_session_reject() {
        let mut responder = Session::new(Capabilities::responder("client"));
        let hello = responder.create_hello();

        let server_caps = Capabilities {
            protocol_version: "4.0".to_string(),
            ..Default::default()
        };
        let mut initiator = Session::new(server_caps);

        let response = initiator.process_hello(&hello).unwrap();
        assert_eq!(response.msg_type, MessageType::Reject);
        assert_eq!(initiator.state(), SessionState::Closed);

        let result = responder.process_reject(&response);
        assert!(matches!(result, Err(SamplingError::NegotiationFailed(_))));
        assert_eq!(responder.state(), SessionState::Closed);
    }

    #[test]
    fn test_second_hello_is_protocol_error() {
        let (responder, mut initiator) = handshake();
        let hello = Message::hello(responder.local_capabilities().clone());
        assert!(matches!(
            initiator.process_hello(&hello),
            Err(SamplingError::Protocol(_))
        ));
        // Existing session untouched
        assert!(initiator.is_active());
    }

    #[test]
    fn test_push_gates() {
        let (_, initiator) = handshake();
        assert!(initiator.require_push(PushCapability::Sampling).is_ok());

        let mut plain = Session::new(Capabilities::new("server"));
        let hello = Message::hello(Capabilities::new("plain-client"));
        plain.process_hello(&hello).unwrap();
        assert!(matches!(
            plain.require_push(PushCapability::Sampling),
            Err(SamplingError::CapabilityNotSupported(_))
        ));

        let fresh = Session::new(Capabilities::new("server"));
        assert!(matches!(
            fresh.require_push(PushCapability::Sampling),
            Err(SamplingError::SessionNotEstablished)
        ));
    }

    #[test]
    fn test_drain_then_close() {
        let (_, mut initiator) = handshake();

        initiator.begin_drain();
        assert_eq!(initiator.state(), SessionState::Draining);
        assert!(!initiator.can_send());
        assert!(initiator.can_deliver());
        assert!(matches!(
            initiator.require_push(PushCapability::Sampling),
            Err(SamplingError::SessionClosed)
        ));

        let close = initiator.close();
        assert_eq!(close.msg_type, MessageType::Close);
        assert!(initiator.is_closed());
        assert!(!initiator.can_deliver());

        // Closed is terminal
        initiator.begin_drain();
        assert!(initiator.is_closed());
    }

    #[test]
    fn test_idle_expiry() {
        let session = Session::new(Capabilities::default()).with_timeout(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        assert!(session.is_expired());
    }

    #[test]
    fn test_session_stats() {
        let (responder, initiator) = handshake();

        let stats = initiator.stats();
        assert_eq!(stats.state, SessionState::Active);
        assert!(stats.supports_sampling_push);
        assert_eq!(stats.messages_received, 1);
        assert!(stats.peer.unwrap().starts_with("client/"));

        assert_eq!(responder.stats().messages_sent, 1);
    }
}
