//! HTTP responder: opens a session, keeps the push stream open and answers
//! pushed requests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::{header, Client, StatusCode};
use tracing::{debug, info};

use super::delivery::{HttpDelivery, ResponseDelivery};
use super::handler::SamplingHandler;
use super::listener::{ListenSummary, PushListener};
use crate::correlation::CorrelationStats;
use crate::error::{Result, SamplingError};
use crate::protocol::{Capabilities, Message, MessageType, Session, SessionState};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A connected responder
#[derive(Debug)]
pub struct SamplingClient {
    base_url: String,
    http: Client,
    session: Arc<Mutex<Session>>,
    listener: PushListener,
}

impl SamplingClient {
    /// Perform the HELLO/ACCEPT handshake against an initiator
    pub async fn connect(
        base_url: &str,
        capabilities: Capabilities,
        handler: Arc<dyn SamplingHandler>,
    ) -> Result<Self> {
        let delivery = Arc::new(HttpDelivery::new(base_url)?);
        Self::connect_with(base_url, capabilities, handler, delivery).await
    }

    /// Handshake with a custom delivery path
    pub async fn connect_with(
        base_url: &str,
        capabilities: Capabilities,
        handler: Arc<dyn SamplingHandler>,
        delivery: Arc<dyn ResponseDelivery>,
    ) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        // No overall timeout: the push stream stays open indefinitely
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| SamplingError::Network(format!("Failed to create HTTP client: {e}")))?;

        let mut session = Session::new(capabilities);
        let hello = session.create_hello();

        let reply = http
            .post(format!("{base_url}/session"))
            .json(&hello)
            .send()
            .await?;
        let status = reply.status();
        let message: Message = reply
            .json()
            .await
            .map_err(|e| SamplingError::InvalidMessage(format!("Handshake reply ({status}): {e}")))?;

        match message.msg_type {
            MessageType::Accept => session.process_accept(&message)?,
            MessageType::Reject => session.process_reject(&message)?,
            other => {
                return Err(SamplingError::Protocol(format!(
                    "Unexpected handshake reply {other:?}"
                )))
            },
        }
        info!(session = %session.id(), server = %base_url, "Connected");

        let session = Arc::new(Mutex::new(session));
        let listener = PushListener::new(
            Arc::clone(&session),
            handler,
            delivery,
            Arc::new(CorrelationStats::new()),
        );

        Ok(Self {
            base_url,
            http,
            session,
            listener,
        })
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Session identifier assigned by the initiator
    pub fn session_id(&self) -> String {
        self.session().id().to_string()
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.session().state()
    }

    /// The read loop, for inspecting in-flight work
    pub fn listener(&self) -> &PushListener {
        &self.listener
    }

    /// Open the push stream and serve requests until it ends
    pub async fn listen(&self) -> Result<ListenSummary> {
        let session_id = self.session_id();
        let response = self
            .http
            .get(format!("{}/session/{}/events", self.base_url, session_id))
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {},
            StatusCode::CONFLICT => {
                return Err(SamplingError::Protocol(
                    "Push stream already has a subscriber".to_string(),
                ))
            },
            StatusCode::NOT_FOUND => return Err(SamplingError::SessionNotFound(session_id)),
            StatusCode::GONE => return Err(SamplingError::SessionClosed),
            status => {
                return Err(SamplingError::Network(format!(
                    "Push stream request returned {status}"
                )))
            },
        }

        debug!(session = %session_id, "Push stream open");
        Ok(self.listener.run(response.bytes_stream()).await)
    }

    /// Close the session locally and on the initiator
    pub async fn close(&self) -> Result<()> {
        let session_id = {
            let mut session = self.session();
            if session.is_closed() {
                return Ok(());
            }
            session.close();
            session.id().to_string()
        };

        let response = self
            .http
            .delete(format!("{}/session/{}", self.base_url, session_id))
            .send()
            .await?;
        info!(session = %session_id, status = %response.status(), "Session closed");
        Ok(())
    }
}
