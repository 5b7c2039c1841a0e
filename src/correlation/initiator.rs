//! Initiator side of one session.
//!
//! Owns the session state, the pending request table and the push channel,
//! and ties them together: `send` registers, pushes and waits; `deliver`
//! resolves; `close` fails whatever is still outstanding.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::pending::PendingTable;
use super::stats::CorrelationStats;
use crate::channel::{PushChannel, PushSubscription};
use crate::error::{Result, SamplingError};
use crate::protocol::{
    Capabilities, Message, MessageType, PushCapability, RequestEnvelope, RequestId,
    ResponseEnvelope, ResponseOutcome, SamplingRequest, SamplingResult, Session, SessionState,
    SessionStats,
};

/// Outcome of an incoming HELLO
#[derive(Debug)]
pub enum Handshake {
    /// Session established
    Accepted {
        /// The new session
        initiator: Arc<Initiator>,
        /// ACCEPT to send back
        reply: Message,
    },
    /// Session refused
    Rejected(Message),
}

/// Per-session correlation state
#[derive(Debug)]
pub struct Initiator {
    id: String,
    session: Mutex<Session>,
    pending: PendingTable,
    channel: PushChannel,
    next_id: AtomicU64,
    stats: Arc<CorrelationStats>,
}

/// Removes a registration when `send` finishes or is dropped mid-flight
struct PendingGuard<'a> {
    table: &'a PendingTable,
    id: RequestId,
    ticket: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.cancel(self.id, self.ticket);
    }
}

impl Initiator {
    /// Wrap a session that has completed its handshake
    pub fn new(session: Session, push_buffer: usize, stats: Arc<CorrelationStats>) -> Self {
        let id = session.id().to_string();
        Self {
            pending: PendingTable::new(&id),
            channel: PushChannel::new(push_buffer),
            id,
            session: Mutex::new(session),
            next_id: AtomicU64::new(1),
            stats,
        }
    }

    /// Process a HELLO from a responder
    pub fn accept(
        hello: &Message,
        capabilities: Capabilities,
        session_timeout: Duration,
        push_buffer: usize,
        stats: Arc<CorrelationStats>,
    ) -> Result<Handshake> {
        if hello.msg_type != MessageType::Hello {
            return Err(SamplingError::InvalidMessage(format!(
                "Expected HELLO, got {:?}",
                hello.msg_type
            )));
        }

        let mut session = Session::new(capabilities).with_timeout(session_timeout);
        let reply = session.process_hello(hello)?;

        if reply.msg_type == MessageType::Reject {
            info!(reason = ?reply.get_rejection(), "Rejected session");
            return Ok(Handshake::Rejected(reply));
        }

        stats.record_session_opened();
        let initiator = Arc::new(Self::new(session, push_buffer, stats));
        info!(
            session = %initiator.id,
            sampling = initiator.accepts_sampling(),
            "Session established"
        );
        Ok(Handshake::Accepted { initiator, reply })
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Session identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.session().state()
    }

    /// Session statistics
    pub fn stats(&self) -> SessionStats {
        self.session().stats()
    }

    /// Whether the session is active and the peer accepts sampling pushes
    pub fn accepts_sampling(&self) -> bool {
        let session = self.session();
        session.is_active() && session.peer_accepts(PushCapability::Sampling)
    }

    /// Whether the session has been idle past its timeout
    pub fn is_expired(&self) -> bool {
        self.session().is_expired()
    }

    /// Number of requests awaiting a response
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether `id` is awaiting a response
    pub fn is_pending(&self, id: RequestId) -> bool {
        self.pending.contains(id)
    }

    /// Whether a push subscriber is attached
    pub fn has_subscriber(&self) -> bool {
        self.channel.has_subscriber()
    }

    /// Push a sampling request with a fresh id and wait for its outcome
    pub async fn send(&self, request: SamplingRequest, timeout: Duration) -> Result<SamplingResult> {
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.send_with_id(id, request, timeout).await
    }

    /// Push a sampling request under a caller-chosen id
    pub async fn send_with_id(
        &self,
        id: RequestId,
        request: SamplingRequest,
        timeout: Duration,
    ) -> Result<SamplingResult> {
        request.validate()?;
        self.dispatch(RequestEnvelope::sampling(id, request), timeout)
            .await
    }

    async fn dispatch(&self, envelope: RequestEnvelope, timeout: Duration) -> Result<SamplingResult> {
        let capability = envelope.capability().ok_or_else(|| {
            SamplingError::Protocol(format!("Cannot push method {}", envelope.method))
        })?;

        let gate = self.session().require_push(capability);
        if let Err(err) = gate {
            if matches!(err, SamplingError::CapabilityNotSupported(_)) {
                self.stats.record_capability_rejection();
            }
            return Err(err);
        }

        let id = envelope.id;
        let registration = self.pending.register(id, timeout)?;
        let _guard = PendingGuard {
            table: &self.pending,
            id,
            ticket: registration.ticket,
        };
        self.stats.record_sent();
        debug!(session = %self.id, %id, ?timeout, "Pushing request");

        let started = Instant::now();
        let waited = tokio::time::timeout(timeout, async {
            self.channel.push(envelope).await?;
            self.session().record_sent();
            registration
                .receiver
                .await
                .map_err(|_| SamplingError::SessionClosed)?
        })
        .await;

        match waited {
            Ok(outcome) => outcome,
            Err(_) => {
                self.stats.record_timeouts(1);
                warn!(
                    session = %self.id,
                    %id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Request timed out"
                );
                Err(SamplingError::Timeout)
            },
        }
    }

    /// Hand a submitted response to whoever is waiting for it.
    ///
    /// Returns whether a pending request was resolved. A response nobody is
    /// waiting for is counted and dropped.
    pub fn deliver(&self, response: ResponseEnvelope) -> Result<bool> {
        {
            let mut session = self.session();
            if !session.can_deliver() {
                return Err(SamplingError::SessionClosed);
            }
            session.record_received();
        }

        let id = response.id;
        let failed = matches!(response.outcome, ResponseOutcome::Failure(_));
        match self.pending.resolve(id, response.into_result()) {
            Some(latency) => {
                if failed {
                    self.stats.record_handler_error(latency);
                } else {
                    self.stats.record_resolved(latency);
                }
                debug!(session = %self.id, %id, ?latency, failed, "Resolved request");
                Ok(true)
            },
            None => {
                self.stats.record_stale();
                warn!(session = %self.id, %id, "Discarding stale response");
                Ok(false)
            },
        }
    }

    /// Attach the push subscriber. Dropping the subscription closes the
    /// session. Returns `None` if a subscriber is already attached or the
    /// session is closed.
    pub fn subscribe(self: &Arc<Self>) -> Option<PushSubscription> {
        if self.session().is_closed() {
            return None;
        }
        let weak = Arc::downgrade(self);
        let subscription = self.channel.subscribe(move || {
            if let Some(initiator) = weak.upgrade() {
                if initiator.close().is_some() {
                    info!(session = %initiator.id, "Push subscriber disconnected");
                }
            }
        })?;
        self.session().touch();
        debug!(session = %self.id, "Push subscriber attached");
        Some(subscription)
    }

    /// Resolve pending entries whose deadline passed
    pub fn reap_expired(&self) -> usize {
        let reaped = self.pending.reap_expired();
        if reaped > 0 {
            self.stats.record_timeouts(reaped);
            debug!(session = %self.id, reaped, "Reaped expired requests");
        }
        reaped
    }

    /// Tear the session down. Every pending request fails with
    /// `SessionClosed`. Returns the CLOSE message, or `None` if the session
    /// was already closed.
    pub fn close(&self) -> Option<Message> {
        {
            let mut session = self.session();
            if session.is_closed() {
                return None;
            }
            session.begin_drain();
        }

        self.channel.close();
        let failed = self.pending.fail_all();
        self.stats.record_session_closed(failed);

        let message = self.session().close();
        info!(session = %self.id, failed, "Session closed");
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::protocol::{SamplingContent, StopReason};

    fn establish(responder_caps: Capabilities) -> Arc<Initiator> {
        let hello = Message::hello(responder_caps);
        match Initiator::accept(
            &hello,
            Capabilities::new("server"),
            Duration::from_secs(300),
            8,
            Arc::new(CorrelationStats::new()),
        )
        .unwrap()
        {
            Handshake::Accepted { initiator, .. } => initiator,
            Handshake::Rejected(msg) => panic!("rejected: {msg:?}"),
        }
    }

    fn request() -> SamplingRequest {
        SamplingRequest::new(SamplingContent::text("hello"))
    }

    #[tokio::test]
    async fn test_send_resolves_through_deliver() {
        let initiator = establish(Capabilities::responder("client"));
        let mut sub = initiator.subscribe().unwrap();

        let responder = Arc::clone(&initiator);
        tokio::spawn(async move {
            let pushed = sub.next().await.unwrap();
            responder
                .deliver(ResponseEnvelope::success(
                    pushed.id,
                    SamplingResult::new("ok", "m1", StopReason::EndTurn),
                ))
                .unwrap();
            // keep the stream open until the test ends
            let _ = sub.next().await;
        });

        let result = initiator.send(request(), Duration::from_secs(2)).await.unwrap();
        assert_eq!(result.content, "ok");
        assert_eq!(initiator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_capability_gate_never_registers() {
        let initiator = establish(Capabilities::new("plain-client"));

        let err = initiator
            .send_with_id(RequestId(1), request(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SamplingError::CapabilityNotSupported(_)));
        assert!(!initiator.is_pending(RequestId(1)));
    }

    #[tokio::test]
    async fn test_timeout_removes_entry() {
        let initiator = establish(Capabilities::responder("client"));

        let err = initiator
            .send_with_id(RequestId(42), request(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, SamplingError::Timeout));
        assert!(!initiator.is_pending(RequestId(42)));

        // Late response is stale
        let late = ResponseEnvelope::success(
            RequestId(42),
            SamplingResult::new("late", "m1", StopReason::EndTurn),
        );
        assert!(!initiator.deliver(late).unwrap());
    }

    #[tokio::test]
    async fn test_close_fails_pending_and_refuses_delivery() {
        let initiator = establish(Capabilities::responder("client"));

        let waiter = {
            let initiator = Arc::clone(&initiator);
            tokio::spawn(async move {
                initiator
                    .send_with_id(RequestId(1), request(), Duration::from_secs(5))
                    .await
            })
        };

        while !initiator.is_pending(RequestId(1)) {
            tokio::task::yield_now().await;
        }
        assert!(initiator.close().is_some());
        assert!(initiator.close().is_none());

        assert!(matches!(
            waiter.await.unwrap(),
            Err(SamplingError::SessionClosed)
        ));
        assert_eq!(initiator.state(), SessionState::Closed);

        let response = ResponseEnvelope::success(
            RequestId(1),
            SamplingResult::new("x", "m", StopReason::EndTurn),
        );
        assert!(matches!(
            initiator.deliver(response),
            Err(SamplingError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_subscriber_drop_closes_session() {
        let initiator = establish(Capabilities::responder("client"));
        let sub = initiator.subscribe().unwrap();
        assert!(initiator.subscribe().is_none());

        drop(sub);
        assert_eq!(initiator.state(), SessionState::Closed);
    }

    #[test]
    fn test_incompatible_hello_is_rejected() {
        let hello = Message::hello(Capabilities {
            protocol_version: "9.0".to_string(),
            ..Capabilities::responder("client")
        });
        let outcome = Initiator::accept(
            &hello,
            Capabilities::new("server"),
            Duration::from_secs(300),
            8,
            Arc::new(CorrelationStats::new()),
        )
        .unwrap();
        assert!(matches!(outcome, Handshake::Rejected(_)));
    }
}
