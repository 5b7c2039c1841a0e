//! Peer capabilities for session negotiation.
//!
//! Capabilities are exchanged once, during the HELLO/ACCEPT handshake.
//! The responder declares which push classes it is willing to receive;
//! the initiator refuses to push anything the responder did not declare.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A class of request the initiator may push to the responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushCapability {
    /// LLM sampling (`sampling/createMessage`)
    Sampling,
}

impl PushCapability {
    /// Wire method name for requests of this class
    pub fn method(self) -> &'static str {
        match self {
            Self::Sampling => super::SAMPLING_METHOD,
        }
    }

    /// Look up the capability class for a wire method name
    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            super::SAMPLING_METHOD => Some(Self::Sampling),
            _ => None,
        }
    }
}

impl std::fmt::Display for PushCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sampling => write!(f, "sampling"),
        }
    }
}

/// Name and version of a peer implementation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Implementation name
    pub name: String,
    /// Implementation version
    pub version: String,
}

impl Implementation {
    /// Create a new implementation descriptor
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
        }
    }
}

impl Default for Implementation {
    fn default() -> Self {
        Self::new("sampling-rust", crate::VERSION)
    }
}

/// Full peer capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// Protocol version
    pub protocol_version: String,
    /// Peer identity
    pub implementation: Implementation,
    /// Peer accepts pushed sampling requests
    #[serde(default)]
    pub supports_sampling_push: bool,
    /// Custom extensions (key-value pairs)
    #[serde(default)]
    pub extensions: HashMap<String, String>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            protocol_version: super::PROTOCOL_VERSION.to_string(),
            implementation: Implementation::default(),
            supports_sampling_push: false,
            extensions: HashMap::new(),
        }
    }
}

impl Capabilities {
    /// Create capabilities for a named implementation
    pub fn new(name: &str) -> Self {
        Self {
            implementation: Implementation::new(name, crate::VERSION),
            ..Default::default()
        }
    }

    /// Capabilities of a responder that accepts sampling pushes
    pub fn responder(name: &str) -> Self {
        Self::new(name).with_sampling_push(true)
    }

    /// Set the implementation version
    pub fn with_version(mut self, version: &str) -> Self {
        self.implementation.version = version.to_string();
        self
    }

    /// Set the protocol version
    pub fn with_protocol_version(mut self, version: &str) -> Self {
        self.protocol_version = version.to_string();
        self
    }

    /// Declare (or withdraw) sampling push support
    pub fn with_sampling_push(mut self, enabled: bool) -> Self {
        self.supports_sampling_push = enabled;
        self
    }

    /// Add extension
    pub fn with_extension(mut self, key: &str, value: &str) -> Self {
        self.extensions.insert(key.to_string(), value.to_string());
        self
    }

    /// Whether these capabilities accept pushes of the given class
    pub fn accepts(&self, capability: PushCapability) -> bool {
        match capability {
            PushCapability::Sampling => self.supports_sampling_push,
        }
    }

    /// Check protocol version compatibility
    pub fn is_compatible(&self, other: &Capabilities) -> bool {
        // Major version must match
        let self_major = self.protocol_version.split('.').next().unwrap_or("0");
        let other_major = other.protocol_version.split('.').next().unwrap_or("0");
        self_major == other_major
    }

    /// Negotiate capabilities with peer
    pub fn negotiate(&self, peer: &Capabilities) -> Option<NegotiatedCaps> {
        if !self.is_compatible(peer) {
            return None;
        }

        Some(NegotiatedCaps {
            protocol_version: self.protocol_version.clone(),
            peer: peer.implementation.clone(),
            peer_sampling_push: peer.supports_sampling_push,
            local_sampling_push: self.supports_sampling_push,
        })
    }
}

/// Result of capability negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedCaps {
    /// Agreed protocol version
    pub protocol_version: String,
    /// Peer identity
    pub peer: Implementation,
    /// Peer accepts sampling pushes from us
    pub peer_sampling_push: bool,
    /// We accept sampling pushes from the peer
    pub local_sampling_push: bool,
}

impl NegotiatedCaps {
    /// Whether we may push requests of the given class to the peer
    pub fn peer_accepts(&self, capability: PushCapability) -> bool {
        match capability {
            PushCapability::Sampling => self.peer_sampling_push,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_compatibility() {
        let caps1 = Capabilities::default();
        let mut caps2 = Capabilities::default();

        assert!(caps1.is_compatible(&caps2));

        caps2.protocol_version = "1.4".to_string();
        assert!(caps1.is_compatible(&caps2)); // Minor version diff OK

        caps2.protocol_version = "2.0".to_string();
        assert!(!caps1.is_compatible(&caps2)); // Major version diff NOT OK
    }

    #[test]
    fn test_negotiation_records_peer_push_support() {
        let server = Capabilities::new("initiator");
        let client = Capabilities::responder("responder");

        let negotiated = server.negotiate(&client).unwrap();
        assert!(negotiated.peer_accepts(PushCapability::Sampling));
        assert!(!negotiated.local_sampling_push);
        assert_eq!(negotiated.peer.name, "responder");

        let silent = Capabilities::new("plain-client");
        let negotiated = server.negotiate(&silent).unwrap();
        assert!(!negotiated.peer_accepts(PushCapability::Sampling));
    }

    #[test]
    fn test_capability_wire_names() {
        let caps = Capabilities::responder("client").with_extension("region", "eu");
        let json = serde_json::to_value(&caps).unwrap();

        assert_eq!(json["supportsSamplingPush"], true);
        assert_eq!(json["implementation"]["name"], "client");
        assert_eq!(json["extensions"]["region"], "eu");
        assert!(json.get("protocolVersion").is_some());
    }

    #[test]
    fn test_missing_push_flag_defaults_to_false() {
        let json = r#"{"protocolVersion":"1.0","implementation":{"name":"x","version":"0"}}"#;
        let caps: Capabilities = serde_json::from_str(json).unwrap();
        assert!(!caps.accepts(PushCapability::Sampling));
    }

    #[test]
    fn test_method_mapping() {
        assert_eq!(PushCapability::Sampling.method(), "sampling/createMessage");
        assert_eq!(
            PushCapability::from_method("sampling/createMessage"),
            Some(PushCapability::Sampling)
        );
        assert_eq!(PushCapability::from_method("tools/call"), None);
    }
}
