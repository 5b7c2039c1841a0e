//! Responder read loop.
//!
//! Reads the push stream one frame at a time, in order, and hands each
//! request to its own task so a slow handler never holds up later frames.
//! Undecodable frames are logged, counted and skipped.

use std::fmt::Display;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures::{FutureExt, Stream, StreamExt};
use tracing::{debug, info, warn};

use super::delivery::ResponseDelivery;
use super::handler::{HandlerFailure, SamplingHandler};
use crate::channel::{FrameDecoder, SseFrame};
use crate::correlation::CorrelationStats;
use crate::error::SamplingError;
use crate::protocol::{InboundPush, RequestEnvelope, ResponseEnvelope, Session};

/// What a finished read loop saw
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenSummary {
    /// Events decoded from the stream
    pub frames: usize,
    /// Requests handed to the handler
    pub dispatched: usize,
    /// Requests answered with an error without the handler
    pub refused: usize,
    /// Frames dropped as malformed
    pub malformed: usize,
    /// Whether the stream ended with a transport error
    pub transport_error: bool,
}

/// Responder-side listener for one session
#[derive(Clone)]
pub struct PushListener {
    session: Arc<Mutex<Session>>,
    handler: Arc<dyn SamplingHandler>,
    delivery: Arc<dyn ResponseDelivery>,
    stats: Arc<CorrelationStats>,
    in_flight: Arc<AtomicUsize>,
}

fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counts one in-flight request until dropped, including on unwind
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl PushListener {
    /// Create a listener
    pub fn new(
        session: Arc<Mutex<Session>>,
        handler: Arc<dyn SamplingHandler>,
        delivery: Arc<dyn ResponseDelivery>,
        stats: Arc<CorrelationStats>,
    ) -> Self {
        Self {
            session,
            handler,
            delivery,
            stats,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Requests whose handler or delivery has not finished yet
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no request is in flight, up to `timeout`
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.in_flight() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    /// Diagnostics shared with this listener
    pub fn stats(&self) -> &Arc<CorrelationStats> {
        &self.stats
    }

    /// Consume a push stream until it ends. The session is left `Draining`;
    /// requests already dispatched still complete and deliver.
    pub async fn run<S, E>(&self, stream: S) -> ListenSummary
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Display,
    {
        let mut stream = std::pin::pin!(stream);
        let mut decoder = FrameDecoder::new();
        let mut summary = ListenSummary::default();
        let session_id = lock(&self.session).id().to_string();

        info!(session = %session_id, handler = self.handler.name(), "Listening for pushed requests");

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    for frame in decoder.push(&bytes) {
                        self.on_frame(&session_id, &frame, &mut summary);
                    }
                },
                Err(e) => {
                    warn!(session = %session_id, error = %e, "Push stream failed");
                    summary.transport_error = true;
                    break;
                },
            }
        }
        if let Some(frame) = decoder.finish() {
            self.on_frame(&session_id, &frame, &mut summary);
        }

        lock(&self.session).begin_drain();
        info!(
            session = %session_id,
            frames = summary.frames,
            malformed = summary.malformed,
            in_flight = self.in_flight(),
            "Push stream ended"
        );
        summary
    }

    fn on_frame(&self, session_id: &str, frame: &SseFrame, summary: &mut ListenSummary) {
        if !frame.is_message() {
            debug!(session = %session_id, event = ?frame.event, "Ignoring non-message event");
            return;
        }
        summary.frames += 1;
        lock(&self.session).record_received();

        match InboundPush::decode(&frame.data) {
            Ok(InboundPush::Request(envelope)) => {
                summary.dispatched += 1;
                self.dispatch(session_id, envelope);
            },
            Ok(InboundPush::Unsupported { id, error }) => {
                summary.refused += 1;
                warn!(session = %session_id, %id, code = error.code, "Refusing pushed request");
                self.spawn_reply(session_id, ResponseEnvelope::failure(id, error));
            },
            Err(e) => {
                summary.malformed += 1;
                self.stats.record_malformed();
                warn!(session = %session_id, error = %e, "Dropping malformed push frame");
            },
        }
    }

    fn dispatch(&self, session_id: &str, envelope: RequestEnvelope) {
        debug!(session = %session_id, id = %envelope.id, kind = envelope.params.content.kind(), "Dispatching request");
        let this = self.clone();
        let session_id = session_id.to_string();
        let guard = InFlight::enter(&self.in_flight);

        tokio::spawn(async move {
            let _guard = guard;
            let id = envelope.id;
            let outcome = AssertUnwindSafe(this.handler.create_message(&envelope.params))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(HandlerFailure::internal("handler panicked")));
            let response = match outcome {
                Ok(result) => ResponseEnvelope::success(id, result),
                Err(failure) => {
                    warn!(session = %session_id, %id, error = %failure, "Handler failed");
                    ResponseEnvelope::failure(id, failure.to_payload())
                },
            };
            this.respond(&session_id, response).await;
        });
    }

    fn spawn_reply(&self, session_id: &str, response: ResponseEnvelope) {
        let this = self.clone();
        let session_id = session_id.to_string();
        let guard = InFlight::enter(&self.in_flight);

        tokio::spawn(async move {
            let _guard = guard;
            this.respond(&session_id, response).await;
        });
    }

    /// Best effort; failures are logged, never surfaced
    async fn respond(&self, session_id: &str, response: ResponseEnvelope) {
        let id = response.id;
        if !lock(&self.session).can_deliver() {
            debug!(session = %session_id, %id, "Session closed, discarding result");
            return;
        }

        match self.delivery.deliver(session_id, response).await {
            Ok(true) => debug!(session = %session_id, %id, "Response delivered"),
            Ok(false) => debug!(session = %session_id, %id, "Initiator was no longer waiting"),
            Err(SamplingError::SessionClosed) => {
                debug!(session = %session_id, %id, "Initiator closed the session, result discarded");
            },
            Err(e) => warn!(session = %session_id, %id, error = %e, "Failed to deliver response"),
        }
    }
}

impl std::fmt::Debug for PushListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushListener")
            .field("handler", &self.handler.name())
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use futures::future::BoxFuture;
    use futures::FutureExt;

    use super::*;
    use crate::error::Result;
    use crate::protocol::{
        Capabilities, Message, ResponseOutcome, SamplingContent, SamplingRequest, SessionState,
        INTERNAL_ERROR, METHOD_NOT_FOUND,
    };
    use crate::responder::MockHandler;

    #[derive(Default)]
    struct RecordingDelivery {
        delivered: Mutex<Vec<ResponseEnvelope>>,
    }

    impl ResponseDelivery for RecordingDelivery {
        fn deliver<'a>(&'a self, _session_id: &'a str, response: ResponseEnvelope) -> BoxFuture<'a, Result<bool>> {
            async move {
                self.delivered.lock().unwrap().push(response);
                Ok(true)
            }
            .boxed()
        }
    }

    fn active_session() -> Arc<Mutex<Session>> {
        let mut session = Session::new(Capabilities::responder("client"));
        session.create_hello();
        session
            .process_accept(&Message::accept("s-1", Capabilities::new("server")))
            .unwrap();
        Arc::new(Mutex::new(session))
    }

    fn frame(id: u64, text: &str) -> String {
        let envelope = RequestEnvelope::sampling(
            crate::protocol::RequestId(id),
            SamplingRequest::new(SamplingContent::text(text)),
        );
        format!("data: {}\n\n", envelope.to_json().unwrap())
    }

    fn chunks(parts: Vec<String>) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> {
        futures::stream::iter(parts.into_iter().map(|p| Ok(Bytes::from(p))))
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_stop_loop() {
        let session = active_session();
        let delivery = Arc::new(RecordingDelivery::default());
        let listener = PushListener::new(
            Arc::clone(&session),
            Arc::new(MockHandler::fixed("done")),
            delivery.clone(),
            Arc::new(CorrelationStats::new()),
        );

        let summary = listener
            .run(chunks(vec![
                frame(1, "a"),
                "data: {not json\n\n".to_string(),
                frame(2, "b"),
            ]))
            .await;

        assert_eq!(summary.frames, 3);
        assert_eq!(summary.dispatched, 2);
        assert_eq!(summary.malformed, 1);
        assert_eq!(listener.stats().malformed_envelopes(), 1);

        assert!(listener.wait_idle(Duration::from_secs(2)).await);
        let mut ids: Vec<_> = delivery.delivered.lock().unwrap().iter().map(|r| r.id.0).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);

        // Stream end leaves the session draining
        assert_eq!(session.lock().unwrap().state(), SessionState::Draining);
    }

    #[tokio::test]
    async fn test_slow_handler_does_not_block_reads() {
        let session = active_session();
        let delivery = Arc::new(RecordingDelivery::default());
        let listener = PushListener::new(
            session,
            Arc::new(MockHandler::new().with_delay(Duration::from_millis(200))),
            delivery.clone(),
            Arc::new(CorrelationStats::new()),
        );

        let started = std::time::Instant::now();
        let summary = listener
            .run(chunks((1..=5).map(|i| frame(i, "slow")).collect()))
            .await;

        // All five read well before a single handler finishes
        assert_eq!(summary.dispatched, 5);
        assert!(started.elapsed() < Duration::from_millis(200));
        assert!(listener.wait_idle(Duration::from_secs(2)).await);
        assert_eq!(delivery.delivered.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_unknown_method_answered_without_handler() {
        let session = active_session();
        let delivery = Arc::new(RecordingDelivery::default());
        let handler = Arc::new(MockHandler::new());
        let listener = PushListener::new(
            session,
            handler.clone(),
            delivery.clone(),
            Arc::new(CorrelationStats::new()),
        );

        let summary = listener
            .run(chunks(vec![
                "data: {\"id\":4,\"method\":\"roots/list\",\"params\":{}}\n\n".to_string()
            ]))
            .await;
        assert_eq!(summary.refused, 1);
        assert!(listener.wait_idle(Duration::from_secs(2)).await);

        assert_eq!(handler.calls(), 0);
        let delivered = delivery.delivered.lock().unwrap();
        match &delivered[0].outcome {
            ResponseOutcome::Failure(error) => assert_eq!(error.code, METHOD_NOT_FOUND),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_results_discarded_after_close() {
        let session = active_session();
        let delivery = Arc::new(RecordingDelivery::default());
        let listener = PushListener::new(
            Arc::clone(&session),
            Arc::new(MockHandler::new().with_delay(Duration::from_millis(100))),
            delivery.clone(),
            Arc::new(CorrelationStats::new()),
        );

        listener.run(chunks(vec![frame(1, "late")])).await;
        session.lock().unwrap().close();

        assert!(listener.wait_idle(Duration::from_secs(2)).await);
        assert!(delivery.delivered.lock().unwrap().is_empty());
    }

    struct PanickingHandler;

    impl SamplingHandler for PanickingHandler {
        fn name(&self) -> &str {
            "panicking"
        }

        fn create_message<'a>(&'a self, _request: &'a SamplingRequest) -> BoxFuture<'a, crate::responder::HandlerResult> {
            futures::future::lazy(|_| -> crate::responder::HandlerResult { panic!("model crashed") }).boxed()
        }
    }

    #[tokio::test]
    async fn test_handler_panic_answers_internal_error() {
        let session = active_session();
        let delivery = Arc::new(RecordingDelivery::default());
        let listener = PushListener::new(
            session,
            Arc::new(PanickingHandler),
            delivery.clone(),
            Arc::new(CorrelationStats::new()),
        );

        listener.run(chunks(vec![frame(9, "boom")])).await;

        assert!(listener.wait_idle(Duration::from_secs(2)).await);
        assert_eq!(listener.in_flight(), 0);
        let delivered = delivery.delivered.lock().unwrap();
        assert_eq!(delivered[0].id.0, 9);
        match &delivered[0].outcome {
            ResponseOutcome::Failure(error) => assert_eq!(error.code, INTERNAL_ERROR),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transport_error_ends_loop() {
        let session = active_session();
        let listener = PushListener::new(
            Arc::clone(&session),
            Arc::new(MockHandler::new()),
            Arc::new(RecordingDelivery::default()),
            Arc::new(CorrelationStats::new()),
        );

        let parts: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from(frame(1, "a"))),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from(frame(2, "never read"))),
        ];
        let summary = listener.run(futures::stream::iter(parts)).await;

        assert!(summary.transport_error);
        assert_eq!(summary.dispatched, 1);
        assert_eq!(session.lock().unwrap().state(), SessionState::Draining);
    }
}
