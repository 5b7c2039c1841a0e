//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files (default: `<config dir>/sampling/config.toml`)
//! - Environment variables (`SAMPLING_*`)
//! - CLI arguments (applied by the binary on top of both)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SamplingError};
use crate::responder::{DEFAULT_ANTHROPIC_MODEL, DEFAULT_ANTHROPIC_URL};
use crate::server::ServerConfig;

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Initiator (server) settings
    #[serde(default)]
    pub server: ServerSection,

    /// Responder (client) settings
    #[serde(default)]
    pub client: ClientSection,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| SamplingError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| SamplingError::Config(format!("Failed to parse config: {e}")))
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("sampling").join("config.toml"))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(host) = lookup("SAMPLING_HOST") {
            config.server.host = host;
        }
        if let Some(port) = lookup("SAMPLING_PORT").and_then(|p| p.parse().ok()) {
            config.server.port = port;
        }
        if let Some(dir) = lookup("SAMPLING_FILES_DIR") {
            config.server.files_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup("SAMPLING_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            config.server.sampling_timeout_secs = secs;
        }
        if let Some(endpoint) = lookup("SAMPLING_ENDPOINT") {
            config.client.endpoint = endpoint;
        }
        if let Some(model) = lookup("SAMPLING_MODEL") {
            config.client.model = model;
        }

        config
    }

    /// File (explicit path, else the default location if present) overlaid
    /// with environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(path)?,
                None => Self::default(),
            },
        };
        Ok(file.merge(Self::from_env()))
    }

    /// Merge with another config (other takes precedence where it differs
    /// from the defaults)
    pub fn merge(self, other: Self) -> Self {
        fn pick<T: PartialEq>(base: T, over: T, default: T) -> T {
            if over == default {
                base
            } else {
                over
            }
        }

        let ds = ServerSection::default();
        let dc = ClientSection::default();
        Self {
            server: ServerSection {
                host: pick(self.server.host, other.server.host, ds.host),
                port: pick(self.server.port, other.server.port, ds.port),
                files_dir: pick(self.server.files_dir, other.server.files_dir, ds.files_dir),
                session_timeout_secs: pick(
                    self.server.session_timeout_secs,
                    other.server.session_timeout_secs,
                    ds.session_timeout_secs,
                ),
                sampling_timeout_secs: pick(
                    self.server.sampling_timeout_secs,
                    other.server.sampling_timeout_secs,
                    ds.sampling_timeout_secs,
                ),
                push_buffer: pick(self.server.push_buffer, other.server.push_buffer, ds.push_buffer),
                max_body_size: pick(
                    self.server.max_body_size,
                    other.server.max_body_size,
                    ds.max_body_size,
                ),
                cors: pick(self.server.cors, other.server.cors, ds.cors),
            },
            client: ClientSection {
                endpoint: pick(self.client.endpoint, other.client.endpoint, dc.endpoint),
                name: pick(self.client.name, other.client.name, dc.name),
                model: pick(self.client.model, other.client.model, dc.model),
                anthropic_url: pick(
                    self.client.anthropic_url,
                    other.client.anthropic_url,
                    dc.anthropic_url,
                ),
            },
        }
    }
}

/// Initiator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Directory served to the analysis tool
    pub files_dir: PathBuf,
    /// Session idle timeout in seconds
    pub session_timeout_secs: u64,
    /// Default sampling timeout in seconds
    pub sampling_timeout_secs: u64,
    /// Undelivered requests queued per session
    pub push_buffer: usize,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    /// Enable CORS
    pub cors: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            host: defaults.addr.ip().to_string(),
            port: defaults.addr.port(),
            files_dir: defaults.files_dir,
            session_timeout_secs: defaults.session_timeout.as_secs(),
            sampling_timeout_secs: defaults.sampling_timeout.as_secs(),
            push_buffer: defaults.push_buffer,
            max_body_size: defaults.max_body_size,
            cors: defaults.cors_enabled,
        }
    }
}

impl ServerSection {
    /// Get the full listen address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Build the runtime server configuration
    pub fn to_server_config(&self) -> Result<ServerConfig> {
        let addr: SocketAddr = self
            .listen_addr()
            .parse()
            .map_err(|e| SamplingError::Config(format!("Invalid listen address: {e}")))?;

        let mut config = ServerConfig::default()
            .with_addr(addr)
            .with_files_dir(self.files_dir.clone())
            .with_session_timeout(Duration::from_secs(self.session_timeout_secs))
            .with_sampling_timeout(Duration::from_secs(self.sampling_timeout_secs))
            .with_push_buffer(self.push_buffer)
            .with_max_body_size(self.max_body_size);
        if !self.cors {
            config = config.without_cors();
        }
        Ok(config)
    }
}

/// Responder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    /// Initiator base URL
    pub endpoint: String,
    /// Implementation name announced in HELLO
    pub name: String,
    /// Model used by the Anthropic handler
    pub model: String,
    /// Anthropic API base URL
    pub anthropic_url: String,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080".to_string(),
            name: "sampling-client".to_string(),
            model: DEFAULT_ANTHROPIC_MODEL.to_string(),
            anthropic_url: DEFAULT_ANTHROPIC_URL.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.listen_addr(), "127.0.0.1:8080");
        assert_eq!(config.server.sampling_timeout_secs, 300);
        assert_eq!(config.client.endpoint, "http://127.0.0.1:8080");
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [server]
            port = 9090
            host = "0.0.0.0"
            files_dir = "/srv/files"

            [client]
            model = "claude-test"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.files_dir, PathBuf::from("/srv/files"));
        assert_eq!(config.server.session_timeout_secs, 300);
        assert_eq!(config.client.model, "claude-test");
        assert_eq!(config.client.name, "sampling-client");
    }

    #[test]
    fn test_env_lookup() {
        let vars: HashMap<&str, &str> = [
            ("SAMPLING_PORT", "7000"),
            ("SAMPLING_TIMEOUT_SECS", "12"),
            ("SAMPLING_ENDPOINT", "http://example:7000"),
            ("SAMPLING_HOST", "not-a-port-check"),
        ]
        .into_iter()
        .collect();

        let config = Config::from_lookup(|k| vars.get(k).map(|v| (*v).to_string()));
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.sampling_timeout_secs, 12);
        assert_eq!(config.client.endpoint, "http://example:7000");
    }

    #[test]
    fn test_merge_prefers_non_default() {
        let file: Config = toml::from_str("[server]\nport = 9090\nfiles_dir = \"docs\"").unwrap();
        let env = Config::from_lookup(|k| (k == "SAMPLING_PORT").then(|| "7000".to_string()));

        let merged = file.merge(env);
        assert_eq!(merged.server.port, 7000);
        assert_eq!(merged.server.files_dir, PathBuf::from("docs"));
    }

    #[test]
    fn test_to_server_config() {
        let mut section = ServerSection::default();
        section.sampling_timeout_secs = 2;
        section.cors = false;

        let config = section.to_server_config().unwrap();
        assert_eq!(config.sampling_timeout, Duration::from_secs(2));
        assert!(!config.cors_enabled);

        section.host = "not an ip".to_string();
        assert!(matches!(section.to_server_config(), Err(SamplingError::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[client]\nendpoint = \"http://10.0.0.1:8080\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.client.endpoint, "http://10.0.0.1:8080");
        assert!(Config::from_file(dir.path().join("missing.toml")).is_err());
    }
}
