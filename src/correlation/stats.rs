//! Correlation diagnostics.
//!
//! Tracks request outcomes, stale responses, dropped frames and round-trip
//! latencies.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Number of latencies kept for percentile calculation
const LATENCY_WINDOW: usize = 1000;

/// Thread-safe correlation statistics
#[derive(Debug)]
pub struct CorrelationStats {
    /// Requests pushed to a responder
    requests_sent: AtomicU64,
    /// Requests resolved with content
    responses_resolved: AtomicU64,
    /// Requests resolved with a handler failure
    handler_errors: AtomicU64,
    /// Requests that hit their deadline
    timeouts: AtomicU64,
    /// Requests failed by session teardown
    session_closed: AtomicU64,
    /// Sends refused by capability gating
    capability_rejections: AtomicU64,
    /// Responses with no pending entry
    stale_responses: AtomicU64,
    /// Frames or submissions that could not be decoded
    malformed_envelopes: AtomicU64,
    /// Sessions accepted
    sessions_opened: AtomicU64,
    /// Sessions closed
    sessions_closed: AtomicU64,
    /// Round-trip latencies
    latencies: RwLock<Vec<Duration>>,
    /// Start time
    started_at: Instant,
}

impl Default for CorrelationStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self {
            requests_sent: AtomicU64::new(0),
            responses_resolved: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            session_closed: AtomicU64::new(0),
            capability_rejections: AtomicU64::new(0),
            stale_responses: AtomicU64::new(0),
            malformed_envelopes: AtomicU64::new(0),
            sessions_opened: AtomicU64::new(0),
            sessions_closed: AtomicU64::new(0),
            latencies: RwLock::new(Vec::new()),
            started_at: Instant::now(),
        }
    }

    /// Record a pushed request
    pub fn record_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful resolution
    pub fn record_resolved(&self, latency: Duration) {
        self.responses_resolved.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
    }

    /// Record a resolution carrying a handler failure
    pub fn record_handler_error(&self, latency: Duration) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
    }

    /// Record timed-out requests
    pub fn record_timeouts(&self, count: usize) {
        self.timeouts.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record requests failed by session teardown
    pub fn record_session_closed(&self, failed: usize) {
        self.session_closed.fetch_add(failed as u64, Ordering::Relaxed);
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a send refused by capability gating
    pub fn record_capability_rejection(&self) {
        self.capability_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a response that matched nothing
    pub fn record_stale(&self) {
        self.stale_responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an undecodable envelope
    pub fn record_malformed(&self) {
        self.malformed_envelopes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an accepted session
    pub fn record_session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, latency: Duration) {
        if let Ok(mut latencies) = self.latencies.write() {
            latencies.push(latency);
            if latencies.len() > LATENCY_WINDOW {
                latencies.remove(0);
            }
        }
    }

    /// Requests pushed
    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    /// Successful resolutions
    pub fn responses_resolved(&self) -> u64 {
        self.responses_resolved.load(Ordering::Relaxed)
    }

    /// Handler failures
    pub fn handler_errors(&self) -> u64 {
        self.handler_errors.load(Ordering::Relaxed)
    }

    /// Timed-out requests
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Requests failed by teardown
    pub fn session_closed(&self) -> u64 {
        self.session_closed.load(Ordering::Relaxed)
    }

    /// Capability rejections
    pub fn capability_rejections(&self) -> u64 {
        self.capability_rejections.load(Ordering::Relaxed)
    }

    /// Stale responses
    pub fn stale_responses(&self) -> u64 {
        self.stale_responses.load(Ordering::Relaxed)
    }

    /// Malformed envelopes
    pub fn malformed_envelopes(&self) -> u64 {
        self.malformed_envelopes.load(Ordering::Relaxed)
    }

    /// Get p50 latency
    pub fn p50_latency(&self) -> Option<Duration> {
        self.percentile_latency(50)
    }

    /// Get p95 latency
    pub fn p95_latency(&self) -> Option<Duration> {
        self.percentile_latency(95)
    }

    /// Get p99 latency
    pub fn p99_latency(&self) -> Option<Duration> {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> Option<Duration> {
        let latencies = self.latencies.read().ok()?;
        if latencies.is_empty() {
            return None;
        }

        let mut sorted = latencies.clone();
        sorted.sort();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        Some(sorted[idx])
    }

    /// Get uptime
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Get summary as JSON-compatible struct
    pub fn summary(&self) -> StatsSummary {
        StatsSummary {
            requests_sent: self.requests_sent(),
            responses_resolved: self.responses_resolved(),
            handler_errors: self.handler_errors(),
            timeouts: self.timeouts(),
            session_closed: self.session_closed(),
            capability_rejections: self.capability_rejections(),
            stale_responses: self.stale_responses(),
            malformed_envelopes: self.malformed_envelopes(),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            p50_latency_ms: self.p50_latency().map(|d| d.as_secs_f64() * 1000.0),
            p95_latency_ms: self.p95_latency().map(|d| d.as_secs_f64() * 1000.0),
            p99_latency_ms: self.p99_latency().map(|d| d.as_secs_f64() * 1000.0),
            uptime_secs: self.uptime().as_secs(),
        }
    }
}

/// Statistics summary for serialization.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StatsSummary {
    /// Requests pushed to responders.
    pub requests_sent: u64,
    /// Requests resolved with content.
    pub responses_resolved: u64,
    /// Requests resolved with a handler failure.
    pub handler_errors: u64,
    /// Requests that timed out.
    pub timeouts: u64,
    /// Requests failed because their session closed.
    pub session_closed: u64,
    /// Sends refused because the peer lacked the capability.
    pub capability_rejections: u64,
    /// Responses that matched no pending request.
    pub stale_responses: u64,
    /// Envelopes that could not be decoded.
    pub malformed_envelopes: u64,
    /// Sessions accepted.
    pub sessions_opened: u64,
    /// Sessions closed.
    pub sessions_closed: u64,
    /// 50th percentile round trip in milliseconds.
    pub p50_latency_ms: Option<f64>,
    /// 95th percentile round trip in milliseconds.
    pub p95_latency_ms: Option<f64>,
    /// 99th percentile round trip in milliseconds.
    pub p99_latency_ms: Option<f64>,
    /// Uptime in seconds.
    pub uptime_secs: u64,
}
