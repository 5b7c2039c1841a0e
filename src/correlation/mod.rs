//! Request/response correlation on the initiator side.
//!
//! ```text
//!   caller ── send(req, timeout) ──┐
//!                                  ▼
//!                  ┌────────── PendingTable ──────────┐
//!                  │ id → oneshot slot + deadline      │
//!                  └──────────────────────────────────┘
//!                                  │ push frame
//!                                  ▼
//!                    PushChannel ──SSE──▶ responder
//!                                  ...
//!   responder ──POST response──▶ deliver(resp) ── resolve(id) ──▶ caller
//! ```
//!
//! Every registered id leaves the table exactly once: by a matching
//! response, by its timeout, by the caller dropping `send`, or by session
//! teardown.

mod initiator;
mod pending;
mod stats;

pub use initiator::{Handshake, Initiator};
pub use pending::{Completion, PendingTable, Registration};
pub use stats::{CorrelationStats, StatsSummary};
