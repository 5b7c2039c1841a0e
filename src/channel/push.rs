//! Initiator side of the push channel.
//!
//! A bounded queue of request envelopes drained by at most one subscriber.
//! Requests pushed before anyone subscribes wait in the queue. Dropping the
//! subscription runs its disconnect hook, which the initiator uses to tear
//! the session down.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::error::{Result, SamplingError};
use crate::protocol::RequestEnvelope;

/// Default queue depth per session
pub const DEFAULT_PUSH_BUFFER: usize = 32;

type DisconnectHook = Box<dyn FnOnce() + Send + 'static>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Outbound queue for one session
#[derive(Debug)]
pub struct PushChannel {
    sender: Mutex<Option<mpsc::Sender<RequestEnvelope>>>,
    receiver: Mutex<Option<mpsc::Receiver<RequestEnvelope>>>,
    connected: Arc<AtomicBool>,
}

impl PushChannel {
    /// Create a channel holding up to `buffer` undelivered requests
    pub fn new(buffer: usize) -> Self {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queue a request. Waits for room when the queue is full; fails with
    /// `SessionClosed` once the channel is closed.
    pub async fn push(&self, envelope: RequestEnvelope) -> Result<()> {
        let sender = lock(&self.sender)
            .clone()
            .ok_or(SamplingError::SessionClosed)?;
        sender
            .send(envelope)
            .await
            .map_err(|_| SamplingError::SessionClosed)
    }

    /// Attach the single subscriber. Returns `None` if one was already
    /// attached or the channel is closed.
    pub fn subscribe<F>(&self, on_disconnect: F) -> Option<PushSubscription>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_closed() {
            return None;
        }
        let receiver = lock(&self.receiver).take()?;
        self.connected.store(true, Ordering::SeqCst);
        Some(PushSubscription {
            receiver,
            connected: Arc::clone(&self.connected),
            on_disconnect: Some(Box::new(on_disconnect)),
        })
    }

    /// Stop accepting requests. The subscriber sees the end of the stream
    /// once the queue is drained.
    pub fn close(&self) {
        lock(&self.sender).take();
    }

    /// Whether the channel no longer accepts requests
    pub fn is_closed(&self) -> bool {
        lock(&self.sender).is_none()
    }

    /// Whether a subscriber is currently attached
    pub fn has_subscriber(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// The subscriber end of a push channel
pub struct PushSubscription {
    receiver: mpsc::Receiver<RequestEnvelope>,
    connected: Arc<AtomicBool>,
    on_disconnect: Option<DisconnectHook>,
}

impl Stream for PushSubscription {
    type Item = RequestEnvelope;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(hook) = self.on_disconnect.take() {
            hook();
        }
    }
}

impl std::fmt::Debug for PushSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushSubscription")
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures::StreamExt;

    use super::*;
    use crate::protocol::{RequestId, SamplingContent, SamplingRequest};

    fn envelope(id: u64) -> RequestEnvelope {
        RequestEnvelope::sampling(
            RequestId(id),
            SamplingRequest::new(SamplingContent::text("hi")),
        )
    }

    #[tokio::test]
    async fn test_push_order_preserved() {
        let channel = PushChannel::new(8);
        for id in 1..=3 {
            channel.push(envelope(id)).await.unwrap();
        }

        let mut sub = channel.subscribe(|| {}).unwrap();
        for id in 1..=3 {
            assert_eq!(sub.next().await.unwrap().id, RequestId(id));
        }
    }

    #[tokio::test]
    async fn test_single_subscriber() {
        let channel = PushChannel::new(8);
        let _first = channel.subscribe(|| {}).unwrap();
        assert!(channel.has_subscriber());
        assert!(channel.subscribe(|| {}).is_none());
    }

    #[tokio::test]
    async fn test_close_ends_stream_and_refuses_push() {
        let channel = PushChannel::new(8);
        channel.push(envelope(1)).await.unwrap();
        let mut sub = channel.subscribe(|| {}).unwrap();

        channel.close();
        assert!(matches!(
            channel.push(envelope(2)).await,
            Err(SamplingError::SessionClosed)
        ));

        // Already-queued request is still delivered, then the stream ends
        assert_eq!(sub.next().await.unwrap().id, RequestId(1));
        assert!(sub.next().await.is_none());
    }

    #[test]
    fn test_drop_runs_disconnect_hook() {
        let channel = PushChannel::new(8);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let sub = channel
            .subscribe(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        drop(sub);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!channel.has_subscriber());
    }
}
