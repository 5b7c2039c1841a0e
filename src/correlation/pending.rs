//! Pending request table.
//!
//! Maps request identifiers to one-shot completion slots. Each slot is a
//! `oneshot::Sender`, so it can be fulfilled at most once; whoever removes the
//! entry from the map owns the sender and is the only one able to resolve it.
//! The map lock is never held across an `.await`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{Result, SamplingError};
use crate::protocol::{RequestId, SamplingResult};

/// What a waiting caller eventually receives
pub type Completion = Result<SamplingResult>;

struct PendingEntry {
    slot: oneshot::Sender<Completion>,
    ticket: u64,
    registered_at: Instant,
    deadline: Instant,
}

/// A freshly registered request
#[derive(Debug)]
pub struct Registration {
    /// Request identifier
    pub id: RequestId,
    /// Distinguishes this registration from a later one reusing the id
    pub ticket: u64,
    /// Completion slot receiver
    pub receiver: oneshot::Receiver<Completion>,
}

/// Concurrency-safe map from request id to completion slot
pub struct PendingTable {
    session_id: String,
    entries: Mutex<HashMap<RequestId, PendingEntry>>,
    next_ticket: AtomicU64,
}

impl PendingTable {
    /// Create an empty table owned by a session
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            entries: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<RequestId, PendingEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a request. Fails if the id is already pending; the existing
    /// entry is left as it was.
    pub fn register(&self, id: RequestId, timeout: Duration) -> Result<Registration> {
        let mut entries = self.entries();
        if entries.contains_key(&id) {
            return Err(SamplingError::DuplicateRequestId(id));
        }

        let (slot, receiver) = oneshot::channel();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        entries.insert(
            id,
            PendingEntry {
                slot,
                ticket,
                registered_at: now,
                deadline: now + timeout,
            },
        );

        debug!(session = %self.session_id, %id, "Registered pending request");
        Ok(Registration {
            id,
            ticket,
            receiver,
        })
    }

    /// Fulfil the slot for `id`. Returns the time the request spent pending,
    /// or `None` if nothing was waiting under that id.
    pub fn resolve(&self, id: RequestId, completion: Completion) -> Option<Duration> {
        let entry = self.entries().remove(&id)?;
        let waited = entry.registered_at.elapsed();
        // The caller may have gone away; its entry was still ours to consume
        let _ = entry.slot.send(completion);
        Some(waited)
    }

    /// Remove the entry only if it still belongs to the given registration
    pub fn cancel(&self, id: RequestId, ticket: u64) -> bool {
        let mut entries = self.entries();
        if entries.get(&id).is_some_and(|e| e.ticket == ticket) {
            entries.remove(&id);
            true
        } else {
            false
        }
    }

    /// Resolve every entry with `SessionClosed`, leaving the table empty
    pub fn fail_all(&self) -> usize {
        let drained: Vec<_> = self.entries().drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            let _ = entry.slot.send(Err(SamplingError::SessionClosed));
        }
        count
    }

    /// Resolve entries whose deadline has passed with `Timeout`
    pub fn reap_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<_> = {
            let mut entries = self.entries();
            let ids: Vec<_> = entries
                .iter()
                .filter(|(_, e)| e.deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id))
                .collect()
        };

        let count = expired.len();
        for entry in expired {
            let _ = entry.slot.send(Err(SamplingError::Timeout));
        }
        count
    }

    /// Whether `id` is pending
    pub fn contains(&self, id: RequestId) -> bool {
        self.entries().contains_key(&id)
    }

    /// Number of pending entries
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Pending ids, sorted
    pub fn ids(&self) -> Vec<RequestId> {
        let mut ids: Vec<_> = self.entries().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl std::fmt::Debug for PendingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTable")
            .field("session_id", &self.session_id)
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StopReason;

    fn ok(text: &str) -> Completion {
        Ok(SamplingResult::new(text, "m1", StopReason::EndTurn))
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let table = PendingTable::new("s1");
        let reg = table.register(RequestId(7), Duration::from_secs(5)).unwrap();
        assert!(table.contains(RequestId(7)));

        assert!(table.resolve(RequestId(7), ok("ok")).is_some());
        assert!(!table.contains(RequestId(7)));

        let result = reg.receiver.await.unwrap().unwrap();
        assert_eq!(result.content, "ok");
    }

    #[test]
    fn test_second_resolution_is_noop() {
        let table = PendingTable::new("s1");
        let _reg = table.register(RequestId(1), Duration::from_secs(5)).unwrap();

        assert!(table.resolve(RequestId(1), ok("first")).is_some());
        assert!(table.resolve(RequestId(1), ok("second")).is_none());
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_keeps_existing_entry() {
        let table = PendingTable::new("s1");
        let reg = table.register(RequestId(3), Duration::from_secs(5)).unwrap();

        let err = table.register(RequestId(3), Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, SamplingError::DuplicateRequestId(RequestId(3))));

        table.resolve(RequestId(3), ok("still here"));
        assert_eq!(reg.receiver.await.unwrap().unwrap().content, "still here");
    }

    #[tokio::test]
    async fn test_fail_all_empties_table() {
        let table = PendingTable::new("s1");
        let receivers: Vec<_> = (0..4)
            .map(|i| table.register(RequestId(i), Duration::from_secs(5)).unwrap().receiver)
            .collect();

        assert_eq!(table.fail_all(), 4);
        assert!(table.is_empty());

        for rx in receivers {
            assert!(matches!(rx.await.unwrap(), Err(SamplingError::SessionClosed)));
        }
    }

    #[tokio::test]
    async fn test_reap_expired_only_touches_past_deadline() {
        let table = PendingTable::new("s1");
        let short = table.register(RequestId(1), Duration::ZERO).unwrap();
        let _long = table.register(RequestId(2), Duration::from_secs(60)).unwrap();

        assert_eq!(table.reap_expired(), 1);
        assert_eq!(table.ids(), vec![RequestId(2)]);
        assert!(matches!(short.receiver.await.unwrap(), Err(SamplingError::Timeout)));
    }

    #[test]
    fn test_cancel_respects_ticket() {
        let table = PendingTable::new("s1");
        let first = table.register(RequestId(5), Duration::from_secs(5)).unwrap();
        table.resolve(RequestId(5), ok("done"));

        let second = table.register(RequestId(5), Duration::from_secs(5)).unwrap();
        assert!(!table.cancel(RequestId(5), first.ticket));
        assert!(table.contains(RequestId(5)));
        assert!(table.cancel(RequestId(5), second.ticket));
        assert!(table.is_empty());
    }

    #[test]
    fn test_resolve_after_receiver_dropped() {
        let table = PendingTable::new("s1");
        let reg = table.register(RequestId(9), Duration::from_secs(5)).unwrap();
        drop(reg);

        // Entry is consumed even though nobody listens
        assert!(table.resolve(RequestId(9), ok("late")).is_some());
        assert!(table.is_empty());
    }
}
