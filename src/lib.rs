//! # Sampling - Bidirectional Sampling Protocol
//!
//! A server ("initiator") asks a connected client ("responder") to run an LLM
//! completion on its behalf. Requests travel over the push stream the client
//! opened; answers come back as ordinary HTTP posts and are correlated to the
//! waiting caller by request id.
//!
//! ## Features
//!
//! - **Capability negotiation**: HELLO/ACCEPT handshake; the responder declares
//!   `supportsSamplingPush` and the initiator never pushes what was not declared
//! - **Out-of-band responses**: SSE push stream down, HTTP POST up
//! - **Correlation**: pending table with per-request timeouts and single
//!   resolution per id
//! - **Pluggable handlers**: Anthropic Messages API or a deterministic mock
//! - **File analysis tool**: text, image and binary files pushed as sampling
//!   content
//!
//! ## Protocol Overview
//!
//! ```text
//! Responder (client)                         Initiator (server)
//!    |                                             |
//!    |------ POST /session  HELLO (caps) --------->|
//!    |<----- 201 ACCEPT (session id) --------------|
//!    |                                             |
//!    |------ GET /session/:id/events ------------->|  SSE push stream
//!    |<===== data: {"id":7,"method":...} ==========|  send(request, timeout)
//!    |                                             |
//!    |   handler.create_message(params)            |
//!    |                                             |
//!    |------ POST /session/:id/responses --------->|  resolve pending 7
//!    |<----- 202 {"resolved":true} ----------------|
//!    |                                             |
//!    |------ DELETE /session/:id ----------------->|  pending → SessionClosed
//! ```
//!
//! ### Session States
//!
//! ```text
//!     [Connecting] ── create_hello() ──> [Negotiating]
//!         │                                   │
//!         │ process_hello()                   │ process_accept()
//!         v                                   v
//!     [Active] <──────────────────────────────┘
//!         │
//!         │ begin_drain()         process_reject() / incompatible
//!         v                                   │
//!     [Draining] ── close() ──> [Closed] <────┘
//! ```
//!
//! ## Quick Start
//!
//! ### Initiator
//!
//! ```rust,ignore
//! use sampling::server::{Server, ServerConfig};
//!
//! let config = ServerConfig::default().with_port(8080).with_files_dir("files");
//! Server::new(config).run().await?;
//! ```
//!
//! ### Responder
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sampling::responder::{MockHandler, SamplingClient};
//! use sampling::Capabilities;
//!
//! let caps = Capabilities::responder("my-client").with_sampling_push(true);
//! let client = SamplingClient::connect("http://127.0.0.1:8080", caps, Arc::new(MockHandler::new())).await?;
//! client.listen().await?;
//! ```
//!
//! ### Sending (in-process)
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use sampling::{SamplingContent, SamplingRequest};
//!
//! let request = SamplingRequest::new(SamplingContent::text("Summarize this"));
//! let result = initiator.send(request, Duration::from_secs(30)).await?;
//! println!("{} ({})", result.content, result.model);
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Messages, envelopes, capabilities and the session state machine
//! - [`channel`]: Push channel and SSE framing
//! - [`correlation`]: Pending request table, initiator and diagnostics
//! - [`responder`]: Push listener, handlers and response delivery
//! - [`files`]: Files directory access and analysis prompts
//! - [`server`]: HTTP API server (Axum-based)
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod channel;
pub mod config;
pub mod correlation;
pub mod error;
pub mod files;
pub mod protocol;
pub mod responder;
pub mod server;

// Re-exports for convenience
pub use config::Config;
pub use correlation::{CorrelationStats, Initiator, PendingTable, StatsSummary};
pub use error::{Result, SamplingError};
pub use protocol::{
    Capabilities, Message, MessageType, RequestEnvelope, RequestId, ResponseEnvelope,
    SamplingContent, SamplingRequest, SamplingResult, Session, SessionState, StopReason,
    PROTOCOL_VERSION,
};
pub use responder::{AnthropicHandler, MockHandler, SamplingClient, SamplingHandler};
pub use server::{AppState, Server, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
