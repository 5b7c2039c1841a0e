//! Server configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::channel::DEFAULT_PUSH_BUFFER;
use crate::files::ANALYSIS_TIMEOUT;
use crate::protocol::SESSION_TIMEOUT_SECS;

/// Default listen port
pub const DEFAULT_PORT: u16 = 8080;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub addr: SocketAddr,
    /// Idle time after which a session is expired
    pub session_timeout: Duration,
    /// Default wait for a pushed sampling request
    pub sampling_timeout: Duration,
    /// Undelivered requests queued per session
    pub push_buffer: usize,
    /// How often expired sessions and requests are swept
    pub reap_interval: Duration,
    /// SSE keep-alive interval
    pub keep_alive: Duration,
    /// Directory served to the analysis tool
    pub files_dir: PathBuf,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// CORS enabled
    pub cors_enabled: bool,
    /// Implementation name announced in ACCEPT
    pub name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            session_timeout: Duration::from_secs(SESSION_TIMEOUT_SECS),
            sampling_timeout: ANALYSIS_TIMEOUT,
            push_buffer: DEFAULT_PUSH_BUFFER,
            reap_interval: Duration::from_secs(1),
            keep_alive: Duration::from_secs(15),
            files_dir: PathBuf::from("files"),
            max_body_size: 10 * 1024 * 1024, // 10MB
            cors_enabled: true,
            name: "sampling-server".to_string(),
        }
    }
}

impl ServerConfig {
    /// Create with custom port
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }

    /// Bind to all interfaces
    pub fn bind_all(mut self) -> Self {
        self.addr.set_ip(Ipv4Addr::UNSPECIFIED.into());
        self
    }

    /// Set address directly
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Set session idle timeout
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Set default sampling timeout
    pub fn with_sampling_timeout(mut self, timeout: Duration) -> Self {
        self.sampling_timeout = timeout;
        self
    }

    /// Set per-session queue depth
    pub fn with_push_buffer(mut self, size: usize) -> Self {
        self.push_buffer = size;
        self
    }

    /// Set sweep interval
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Set files directory
    pub fn with_files_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.files_dir = dir.into();
        self
    }

    /// Set max body size
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Disable CORS
    pub fn without_cors(mut self) -> Self {
        self.cors_enabled = false;
        self
    }
}
