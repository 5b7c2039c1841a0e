//! Initiator HTTP server.
//!
//! Provides the HTTP API of the sampling protocol:
//! - Session management (HELLO / ACCEPT / CLOSE)
//! - SSE push stream and response submission
//! - Sampling and file-analysis tools that drive `send`
//!
//! # Example
//!
//! ```rust,ignore
//! use sampling::server::{Server, ServerConfig};
//!
//! let config = ServerConfig::default().with_port(8080);
//! Server::new(config).run().await?;
//! ```

mod config;
mod handlers;
mod state;

use std::future::Future;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

pub use config::{ServerConfig, DEFAULT_PORT};
pub use handlers::{
    create_router, health_check, AnalyzeFileRequest, AnalyzeFileResponse, EchoResponse,
    ErrorResponse, FilesResponse, ResponseReceipt, SampleRequest,
};
pub use state::{AppState, SessionManager};

use crate::error::Result;

/// HTTP server wrapping the shared state
pub struct Server {
    state: Arc<AppState>,
}

impl Server {
    /// Create a server
    pub fn new(config: ServerConfig) -> Self {
        Self {
            state: Arc::new(AppState::new(config)),
        }
    }

    /// Shared state
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Router with tracing, CORS and body limit applied
    pub fn router(&self) -> Router {
        let config = &self.state.config;
        let mut router = create_router(self.state())
            .layer(DefaultBodyLimit::max(config.max_body_size))
            .layer(TraceLayer::new_for_http());
        if config.cors_enabled {
            router = router.layer(CorsLayer::permissive());
        }
        router
    }

    /// Bind the configured address and serve until Ctrl+C / SIGTERM
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.state.config.addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` completes.
    /// Every session is closed on shutdown so push streams end.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(%addr, files = %self.state.files.root().display(), "Starting sampling server");

        let sweeper = tokio::spawn(sweep_loop(self.state()));
        let state = self.state();
        let shutdown = async move {
            shutdown.await;
            let closed = state.sessions.close_all().await;
            info!(closed, "Shutting down");
        };

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await;
        sweeper.abort();
        served?;
        Ok(())
    }
}

async fn sweep_loop(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(state.config.reap_interval);
    loop {
        interval.tick().await;
        let removed = state.sessions.sweep().await;
        if removed > 0 {
            debug!(removed, "Swept sessions");
        }
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    () = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            },
            Err(_) => ctrl_c.await,
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}
