//! HTTP request handlers.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{
        sse::{KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::state::AppState;
use crate::channel::encode_request;
use crate::correlation::{Handshake, Initiator, StatsSummary};
use crate::error::{Result, SamplingError};
use crate::files::{analysis_request, format_report, AnalysisType, FileEntry};
use crate::protocol::{
    Capabilities, Message, RequestId, ResponseEnvelope, SamplingContent, SamplingRequest,
    SamplingResult, SessionStats, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, SAMPLING_METHOD,
};

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health and status
        .route("/health", get(health_check))
        .route("/status", get(status))
        .route("/stats", get(stats))
        // Session lifecycle
        .route("/session", post(create_session))
        .route("/session/:id", get(get_session).delete(delete_session))
        // Push stream and response submission
        .route("/session/:id/events", get(session_events))
        .route("/session/:id/responses", post(submit_response))
        .route("/session/:id/sample", post(sample))
        // Tools
        .route("/tools/files", get(list_files))
        .route("/tools/analyze_file", post(analyze_file))
        .route("/tools/echo", post(echo))
        .with_state(state)
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable kind
    pub kind: String,
    /// Human-readable message
    pub error: String,
}

fn error_response(status: StatusCode, kind: &str, message: String) -> Response {
    let body = ErrorResponse {
        kind: kind.to_string(),
        error: message,
    };
    (status, Json(body)).into_response()
}

impl IntoResponse for SamplingError {
    fn into_response(self) -> Response {
        error_response(self.status_code(), self.kind(), self.to_string())
    }
}

async fn find_session(state: &AppState, id: &str) -> Result<Arc<Initiator>> {
    state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| SamplingError::SessionNotFound(id.to_string()))
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: crate::VERSION,
    })
}

/// Status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub active_sessions: usize,
    pub sampling_clients: usize,
    pub capabilities: Capabilities,
    pub diagnostics: StatsSummary,
}

/// Status endpoint
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StatusResponse {
        status: "ok",
        version: crate::VERSION,
        uptime_secs: state.uptime().as_secs(),
        active_sessions: state.sessions.count().await,
        sampling_clients: state.sessions.sampling_count().await,
        capabilities: state.capabilities(),
        diagnostics: state.stats.summary(),
    })
}

/// Correlation diagnostics
async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.stats.summary())
}

/// HELLO → ACCEPT (201) or REJECT (400)
async fn create_session(State(state): State<Arc<AppState>>, body: String) -> Response {
    let hello = match Message::from_json(&body) {
        Ok(hello) => hello,
        Err(e) => return SamplingError::InvalidMessage(e.to_string()).into_response(),
    };

    match state.handshake(&hello).await {
        Ok(Handshake::Accepted { reply, .. }) => (StatusCode::CREATED, Json(reply)).into_response(),
        Ok(Handshake::Rejected(reply)) => (StatusCode::BAD_REQUEST, Json(reply)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Session info
#[derive(Serialize)]
pub struct SessionInfo {
    #[serde(flatten)]
    pub stats: SessionStats,
    pub pending_requests: usize,
    pub push_stream_attached: bool,
}

/// Get session info
async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>> {
    let initiator = find_session(&state, &id).await?;
    Ok(Json(SessionInfo {
        stats: initiator.stats(),
        pending_requests: initiator.pending_count(),
        push_stream_attached: initiator.has_subscriber(),
    }))
}

/// Close session
async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    find_session(&state, &id).await?;
    state.sessions.remove(&id).await;
    Ok(StatusCode::NO_CONTENT)
}

/// SSE push stream. One subscriber per session; disconnecting closes the
/// session.
async fn session_events(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let initiator = match find_session(&state, &id).await {
        Ok(initiator) => initiator,
        Err(e) => return e.into_response(),
    };

    let Some(subscription) = initiator.subscribe() else {
        if initiator.state() == crate::protocol::SessionState::Closed {
            return SamplingError::SessionClosed.into_response();
        }
        return error_response(
            StatusCode::CONFLICT,
            "push_stream_attached",
            format!("Session {id} already has a push stream"),
        );
    };

    let events = subscription.filter_map(|envelope| async move {
        match encode_request(&envelope) {
            Ok(event) => {
                debug!(id = %envelope.id, "Pushing request");
                Some(Ok::<_, Infallible>(event))
            },
            Err(e) => {
                warn!(id = %envelope.id, error = %e, "Dropping unencodable request");
                None
            },
        }
    });

    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(state.config.keep_alive))
        .into_response()
}

/// Response submission reply
#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseReceipt {
    /// Whether a pending request was completed
    pub resolved: bool,
}

/// Deliver a responder's answer
async fn submit_response(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: String,
) -> Result<(StatusCode, Json<ResponseReceipt>)> {
    let initiator = find_session(&state, &id).await?;

    let response = ResponseEnvelope::from_json(&body).inspect_err(|e| {
        state.stats.record_malformed();
        warn!(session = %id, error = %e, "Malformed response");
    })?;

    let resolved = initiator.deliver(response)?;
    Ok((StatusCode::ACCEPTED, Json(ResponseReceipt { resolved })))
}

/// Ad-hoc sampling request against a session
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleRequest {
    pub content: SamplingContent,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Explicit request id; allocated by the session when absent
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl SampleRequest {
    fn to_request(&self) -> SamplingRequest {
        let mut request = SamplingRequest::new(self.content.clone())
            .with_max_tokens(self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS));
        request.temperature = self.temperature.unwrap_or(DEFAULT_TEMPERATURE);
        if let Some(prompt) = &self.system_prompt {
            request = request.with_system_prompt(prompt);
        }
        request
    }
}

/// Issue a sampling request and wait for the result
async fn sample(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SampleRequest>,
) -> Result<Json<SamplingResult>> {
    let initiator = find_session(&state, &id).await?;
    let timeout = req
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(state.config.sampling_timeout);

    let request = req.to_request();
    let result = match req.id {
        Some(request_id) => {
            initiator
                .send_with_id(RequestId(request_id), request, timeout)
                .await?
        },
        None => initiator.send(request, timeout).await?,
    };
    Ok(Json(result))
}

/// Listing of the files directory
#[derive(Debug, Serialize, Deserialize)]
pub struct FilesResponse {
    pub directory: String,
    pub files: Vec<FileEntry>,
}

/// List files available for analysis
async fn list_files(State(state): State<Arc<AppState>>) -> Result<Json<FilesResponse>> {
    Ok(Json(FilesResponse {
        directory: state.files.root().display().to_string(),
        files: state.files.list()?,
    }))
}

/// File analysis tool arguments
#[derive(Debug, Deserialize)]
pub struct AnalyzeFileRequest {
    pub filename: String,
    #[serde(default)]
    pub analysis_type: Option<String>,
    #[serde(default)]
    pub custom_prompt: Option<String>,
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// File analysis result
#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzeFileResponse {
    pub session_id: String,
    pub report: String,
    pub result: SamplingResult,
}

/// Read a file, push it to a sampling client and format the answer
async fn analyze_file(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalyzeFileRequest>,
) -> Result<Json<AnalyzeFileResponse>> {
    let file = state.files.load(&req.filename)?;

    let initiator = match &req.session_id {
        Some(id) => find_session(&state, id).await?,
        None => state.sessions.find_sampling_session().await.ok_or_else(|| {
            SamplingError::CapabilityNotSupported(format!(
                "{SAMPLING_METHOD}: no connected client declared sampling support"
            ))
        })?,
    };

    let analysis = req
        .analysis_type
        .as_deref()
        .map(AnalysisType::parse)
        .unwrap_or_default();
    let request = analysis_request(&file, &analysis, req.custom_prompt.as_deref());
    let timeout = req
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(state.config.sampling_timeout);

    debug!(
        session = %initiator.id(),
        file = %file.name,
        kind = request.content.kind(),
        "Requesting file analysis"
    );
    let result = initiator.send(request, timeout).await?;

    Ok(Json(AnalyzeFileResponse {
        session_id: initiator.id().to_string(),
        report: format_report(&file, &analysis, &result),
        result,
    }))
}

/// Echo tool arguments
#[derive(Debug, Deserialize)]
pub struct EchoRequest {
    pub message: String,
}

/// Echo tool reply
#[derive(Debug, Serialize, Deserialize)]
pub struct EchoResponse {
    pub content: String,
}

/// Echo tool
async fn echo(Json(req): Json<EchoRequest>) -> impl IntoResponse {
    Json(EchoResponse {
        content: format!("Echo: {}", req.message),
    })
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::protocol::MessageType;
    use crate::server::ServerConfig;

    fn router() -> (Arc<AppState>, Router) {
        let state = Arc::new(AppState::new(ServerConfig::default()));
        (Arc::clone(&state), create_router(state))
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post(uri: &str, body: String) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn open_session(app: &Router) -> String {
        let hello = Message::hello(Capabilities::responder("test-client").with_sampling_push(true));
        let response = app
            .clone()
            .oneshot(post("/session", hello.to_json().unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let accept: Message = body_json(response).await;
        assert_eq!(accept.msg_type, MessageType::Accept);
        accept.session_id.unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (_, app) = router();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_handshake_reject() {
        let (state, app) = router();
        let hello = Message::hello(Capabilities::responder("old").with_protocol_version("2.0"));

        let response = app.oneshot(post("/session", hello.to_json().unwrap())).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let reject: Message = body_json(response).await;
        assert_eq!(reject.msg_type, MessageType::Reject);
        assert_eq!(state.sessions.count().await, 0);
    }

    #[tokio::test]
    async fn test_garbage_hello() {
        let (_, app) = router();
        let response = app.oneshot(post("/session", "not json".into())).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = body_json(response).await;
        assert_eq!(body.kind, "invalid_message");
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let (_, app) = router();
        let response = app
            .oneshot(Request::get("/session/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_response_counted() {
        let (state, app) = router();
        let id = open_session(&app).await;

        let response = app
            .clone()
            .oneshot(post(
                &format!("/session/{id}/responses"),
                r#"{"id":1,"result":{"content":"a","model":"m","stopReason":"endTurn"},"error":{"code":1,"message":"x"}}"#.into(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.stats.malformed_envelopes(), 1);
    }

    #[tokio::test]
    async fn test_stale_response_accepted() {
        let (state, app) = router();
        let id = open_session(&app).await;

        let response = app
            .oneshot(post(
                &format!("/session/{id}/responses"),
                r#"{"id":99,"result":{"content":"late","model":"m","stopReason":"endTurn"}}"#.into(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let receipt: ResponseReceipt = body_json(response).await;
        assert!(!receipt.resolved);
        assert_eq!(state.stats.stale_responses(), 1);
    }

    #[tokio::test]
    async fn test_closed_session_responses_gone() {
        let (state, app) = router();
        let id = open_session(&app).await;
        let initiator = state.sessions.get(&id).await.unwrap();

        let response = app
            .clone()
            .oneshot(Request::delete(format!("/session/{id}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(initiator.deliver(ResponseEnvelope::success(
            RequestId(1),
            SamplingResult::new("x", "m", crate::protocol::StopReason::EndTurn),
        ))
        .is_err());

        let response = app
            .oneshot(Request::delete(format!("/session/{id}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_analyze_without_sampling_client() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let state = Arc::new(AppState::new(ServerConfig::default().with_files_dir(dir.path())));
        let app = create_router(state);

        let response = app
            .oneshot(post("/tools/analyze_file", r#"{"filename":"a.txt"}"#.into()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
        let body: ErrorResponse = body_json(response).await;
        assert_eq!(body.kind, "capability_not_supported");
    }

    #[tokio::test]
    async fn test_analyze_traversal_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(AppState::new(ServerConfig::default().with_files_dir(dir.path())));
        let app = create_router(state);

        let response = app
            .oneshot(post("/tools/analyze_file", r#"{"filename":"../secret"}"#.into()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_echo() {
        let (_, app) = router();
        let response = app
            .oneshot(post("/tools/echo", r#"{"message":"hi"}"#.into()))
            .await
            .unwrap();
        let body: EchoResponse = body_json(response).await;
        assert_eq!(body.content, "Echo: hi");
    }
}
