//! Server state and session management.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::info;

use super::config::ServerConfig;
use crate::correlation::{CorrelationStats, Handshake, Initiator};
use crate::error::Result;
use crate::files::FileSource;
use crate::protocol::{Capabilities, Message, SessionState};

/// Application state shared across handlers
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Session manager
    pub sessions: SessionManager,
    /// Correlation counters shared by every session
    pub stats: Arc<CorrelationStats>,
    /// Files offered to the analysis tool
    pub files: FileSource,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Create new application state
    pub fn new(config: ServerConfig) -> Self {
        let stats = Arc::new(CorrelationStats::new());
        let sessions = SessionManager::new(Arc::clone(&stats))
            .with_timeout(config.session_timeout)
            .with_push_buffer(config.push_buffer);

        Self {
            files: FileSource::new(config.files_dir.clone()),
            sessions,
            stats,
            config,
            start_time: Instant::now(),
        }
    }

    /// Get server uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Get server capabilities
    pub fn capabilities(&self) -> Capabilities {
        Capabilities::new(&self.config.name)
    }

    /// Process a HELLO and register the session if accepted
    pub async fn handshake(&self, hello: &Message) -> Result<Handshake> {
        self.sessions.handshake(hello, self.capabilities()).await
    }
}

/// Manages established sessions
pub struct SessionManager {
    /// Sessions by ID
    sessions: Arc<RwLock<HashMap<String, Arc<Initiator>>>>,
    /// Session idle timeout
    timeout: Duration,
    /// Push queue depth for new sessions
    push_buffer: usize,
    stats: Arc<CorrelationStats>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(Arc::new(CorrelationStats::new()))
    }
}

impl SessionManager {
    /// Create new session manager
    pub fn new(stats: Arc<CorrelationStats>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            timeout: Duration::from_secs(crate::protocol::SESSION_TIMEOUT_SECS),
            push_buffer: crate::channel::DEFAULT_PUSH_BUFFER,
            stats,
        }
    }

    /// Set session timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set push queue depth
    pub fn with_push_buffer(mut self, size: usize) -> Self {
        self.push_buffer = size;
        self
    }

    /// Negotiate a new session from a HELLO
    pub async fn handshake(&self, hello: &Message, capabilities: Capabilities) -> Result<Handshake> {
        let handshake = Initiator::accept(
            hello,
            capabilities,
            self.timeout,
            self.push_buffer,
            Arc::clone(&self.stats),
        )?;

        if let Handshake::Accepted { initiator, .. } = &handshake {
            self.sessions
                .write()
                .await
                .insert(initiator.id().to_string(), Arc::clone(initiator));
        }
        Ok(handshake)
    }

    /// Get session by ID
    pub async fn get(&self, id: &str) -> Option<Arc<Initiator>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Close and remove a session. Returns the CLOSE message if it was open.
    pub async fn remove(&self, id: &str) -> Option<Message> {
        let initiator = self.sessions.write().await.remove(id)?;
        initiator.close()
    }

    /// Get session count
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Sessions that can currently take sampling pushes
    pub async fn sampling_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.accepts_sampling())
            .count()
    }

    /// A session that can take sampling pushes. Sessions with an attached
    /// push stream come first, then the oldest.
    pub async fn find_sampling_session(&self) -> Option<Arc<Initiator>> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|s| s.accepts_sampling())
            .min_by_key(|s| (!s.has_subscriber(), s.stats().created_at))
            .cloned()
    }

    /// Reap expired requests and drop idle or closed sessions. A session with
    /// an attached push stream is never idle. Returns the number of sessions
    /// removed.
    pub async fn sweep(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();

        sessions.retain(|id, initiator| {
            initiator.reap_expired();
            if initiator.state() == SessionState::Closed {
                return false;
            }
            if initiator.is_expired()
                && !initiator.has_subscriber()
                && initiator.pending_count() == 0
            {
                initiator.close();
                info!(session = %id, "Session expired");
                return false;
            }
            true
        });

        before - sessions.len()
    }

    /// Close every session
    pub async fn close_all(&self) -> usize {
        let drained: Vec<_> = self.sessions.write().await.drain().collect();
        drained
            .into_iter()
            .filter(|(_, initiator)| initiator.close().is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;

    async fn open(manager: &SessionManager, sampling: bool) -> Arc<Initiator> {
        let hello = Message::hello(Capabilities::responder("client").with_sampling_push(sampling));
        match manager.handshake(&hello, Capabilities::new("server")).await.unwrap() {
            Handshake::Accepted { initiator, .. } => initiator,
            Handshake::Rejected(m) => panic!("rejected: {m:?}"),
        }
    }

    #[tokio::test]
    async fn test_handshake_and_get() {
        let manager = SessionManager::default();
        let initiator = open(&manager, true).await;

        let retrieved = manager.get(initiator.id()).await.unwrap();
        assert_eq!(retrieved.id(), initiator.id());
        assert_eq!(manager.count().await, 1);
    }

    #[tokio::test]
    async fn test_rejected_hello_not_registered() {
        let manager = SessionManager::default();
        let hello = Message::hello(Capabilities::responder("client").with_protocol_version("2.0"));

        let handshake = manager.handshake(&hello, Capabilities::new("server")).await.unwrap();
        assert!(matches!(handshake, Handshake::Rejected(m) if m.msg_type == MessageType::Reject));
        assert_eq!(manager.count().await, 0);
    }

    #[tokio::test]
    async fn test_remove_closes() {
        let manager = SessionManager::default();
        let initiator = open(&manager, true).await;
        let id = initiator.id().to_string();

        let close = manager.remove(&id).await.unwrap();
        assert_eq!(close.msg_type, MessageType::Close);
        assert_eq!(initiator.state(), SessionState::Closed);
        assert!(manager.get(&id).await.is_none());
        assert!(manager.remove(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_sampling_sessions() {
        let manager = SessionManager::default();
        open(&manager, false).await;
        let sampler = open(&manager, true).await;

        assert_eq!(manager.count().await, 2);
        assert_eq!(manager.sampling_count().await, 1);
        assert_eq!(manager.find_sampling_session().await.unwrap().id(), sampler.id());
    }

    #[tokio::test]
    async fn test_sweep_expired_and_closed() {
        let manager = SessionManager::default().with_timeout(Duration::from_millis(10));
        let idle = open(&manager, true).await;
        let closed = open(&manager, true).await;
        closed.close();

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(manager.sweep().await, 2);
        assert_eq!(manager.count().await, 0);
        assert_eq!(idle.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_sweep_keeps_subscribed_session() {
        let manager = SessionManager::default().with_timeout(Duration::from_millis(10));
        let listening = open(&manager, true).await;
        let _subscription = listening.subscribe().unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(listening.is_expired());
        assert_eq!(manager.sweep().await, 0);
        assert_eq!(manager.count().await, 1);
        assert_eq!(listening.state(), SessionState::Active);
    }
}
