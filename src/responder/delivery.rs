//! Response delivery path: responder → initiator, out of band.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::error::{Result, SamplingError};
use crate::protocol::ResponseEnvelope;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends response envelopes back to the initiator
pub trait ResponseDelivery: Send + Sync {
    /// Submit a response. `Ok(true)` means it resolved a pending request,
    /// `Ok(false)` that the initiator had nothing waiting under that id.
    fn deliver<'a>(&'a self, session_id: &'a str, response: ResponseEnvelope) -> BoxFuture<'a, Result<bool>>;
}

/// Body of a 202 answer
#[derive(Debug, Deserialize)]
struct DeliveryReceipt {
    resolved: bool,
}

/// Delivery over HTTP POST to `/session/{id}/responses`
#[derive(Debug, Clone)]
pub struct HttpDelivery {
    client: Client,
    base_url: String,
}

impl HttpDelivery {
    /// Create a delivery path against an initiator base URL
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .map_err(|e| SamplingError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, session_id: &str, response: ResponseEnvelope) -> Result<bool> {
        let url = format!("{}/session/{}/responses", self.base_url, session_id);
        let reply = self.client.post(&url).json(&response).send().await?;

        match reply.status() {
            StatusCode::ACCEPTED | StatusCode::OK => {
                let receipt: DeliveryReceipt = reply.json().await?;
                Ok(receipt.resolved)
            },
            StatusCode::GONE => Err(SamplingError::SessionClosed),
            StatusCode::NOT_FOUND => Err(SamplingError::SessionNotFound(session_id.to_string())),
            StatusCode::BAD_REQUEST => {
                let body = reply.text().await.unwrap_or_default();
                Err(SamplingError::MalformedEnvelope(body))
            },
            status => Err(SamplingError::Network(format!(
                "Response submission returned {status}"
            ))),
        }
    }
}

impl ResponseDelivery for HttpDelivery {
    fn deliver<'a>(&'a self, session_id: &'a str, response: ResponseEnvelope) -> BoxFuture<'a, Result<bool>> {
        self.post(session_id, response).boxed()
    }
}
