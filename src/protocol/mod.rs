//! Sampling protocol negotiation, envelopes and session lifecycle.
//!
//! A session is opened by the responder (the client) and accepted by the
//! initiator (the server). Once active, the initiator pushes requests over a
//! stream the responder keeps open, and the responder answers each one out of
//! band.
//!
//! # Protocol Overview
//!
//! ## Message Flow
//!
//! ```text
//! Responder                         Initiator
//!    |                                |
//!    |-------- HELLO (caps) -------->|  POST /session
//!    |<----- ACCEPT (caps) ----------|  session established
//!    |     or REJECT (reason)        |
//!    |                                |
//!    |-------- open push stream ---->|  GET /session/{id}/events
//!    |<======= request (id=7) =======|  SSE data frame
//!    |<======= request (id=8) =======|
//!    |                                |
//!    |------ response (id=8) ------->|  POST /session/{id}/responses
//!    |------ response (id=7) ------->|  any order
//!    |                                |
//!    |-------- CLOSE --------------->|  DELETE /session/{id}
//! ```
//!
//! ## State Machine
//!
//! | State         | Description                          | Valid Transitions      |
//! |---------------|--------------------------------------|------------------------|
//! | `Connecting`  | New session, no handshake yet        | → Negotiating          |
//! | `Negotiating` | HELLO exchanged, awaiting outcome    | → Active, Closed       |
//! | `Active`      | Pushes and responses may flow        | → Draining, Closed     |
//! | `Draining`    | Teardown started, no new pushes      | → Closed               |
//! | `Closed`      | Session terminated                   | (terminal)             |
//!
//! ## Rejection Codes
//!
//! | Code              | Meaning                               |
//! |-------------------|---------------------------------------|
//! | `VersionMismatch` | Protocol major version incompatible   |
//! | `Unknown`         | Other/unspecified error               |
//!
//! # Usage
//!
//! ```rust,ignore
//! use sampling::protocol::{Capabilities, Session};
//!
//! let mut responder = Session::new(Capabilities::responder("my-client"));
//! let hello = responder.create_hello();
//!
//! let mut initiator = Session::new(Capabilities::new("my-server"));
//! let accept = initiator.process_hello(&hello)?;
//! responder.process_accept(&accept)?;
//! ```

mod capabilities;
mod envelope;
mod message;
mod session;

pub use capabilities::{Capabilities, Implementation, NegotiatedCaps, PushCapability};
pub use envelope::{
    ErrorPayload, InboundPush, RequestEnvelope, RequestId, ResponseEnvelope, ResponseOutcome,
    SamplingContent, SamplingRequest, SamplingResult, StopReason, DEFAULT_MAX_TOKENS,
    DEFAULT_TEMPERATURE, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND, REQUEST_REJECTED,
    UPSTREAM_ERROR,
};
pub use message::{Message, MessagePayload, MessageType, RejectionCode, RejectionInfo};
pub use session::{Session, SessionState, SessionStats};

/// Protocol version
pub const PROTOCOL_VERSION: &str = "1.0";

/// JSON-RPC version marker carried in push frames
pub const JSONRPC_VERSION: &str = "2.0";

/// Wire method for sampling requests
pub const SAMPLING_METHOD: &str = "sampling/createMessage";

/// Maximum session idle time (5 minutes)
pub const SESSION_TIMEOUT_SECS: u64 = 300;
