//! Responder side: answers requests the initiator pushes.
//!
//! ```text
//!  push stream ──▶ PushListener ──spawn──▶ SamplingHandler
//!                                              │
//!  initiator ◀── ResponseDelivery (HTTP POST) ◀┘
//! ```

mod anthropic;
mod client;
mod delivery;
mod handler;
mod listener;

pub use anthropic::{
    AnthropicHandler, ANTHROPIC_VERSION, API_KEY_ENV, DEFAULT_ANTHROPIC_MODEL, DEFAULT_ANTHROPIC_URL,
};
pub use client::SamplingClient;
pub use delivery::{HttpDelivery, ResponseDelivery};
pub use handler::{
    FailureKind, HandlerFailure, HandlerResult, MockHandler, SamplingHandler, MOCK_MODEL,
};
pub use listener::{ListenSummary, PushListener};
