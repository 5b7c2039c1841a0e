//! Push channel: the long-lived stream the responder opens and the initiator
//! writes requests onto.
//!
//! - [`push`]: initiator-side bounded queue with a single subscriber
//! - [`sse`]: SSE framing (encode on the initiator, incremental decode on
//!   the responder)

pub mod push;
pub mod sse;

pub use push::{PushChannel, PushSubscription, DEFAULT_PUSH_BUFFER};
pub use sse::{encode_request, parse_sse_line, FrameDecoder, SseFrame, SseLine};
