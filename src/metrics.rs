// =============================================================================
// metrics.rs - request metrics, provider telemetry, and the ops endpoint
// =============================================================================
//
// Two collectors and one tiny HTTP server.
//
// RequestMetrics counts API traffic and keeps a bounded buffer of latency
// samples (percentiles by linear interpolation over a sorted copy).
// ProviderMetrics counts per-provider router events (success, failure,
// circuit_open, circuit_skip, fallback_success).
//
// The ops server answers GET /healthz and GET /ops/metrics over raw TCP.
// The metrics route is bearer-guarded in production.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};
use uuid::Uuid;

pub const DEFAULT_MAX_LATENCY_SAMPLES: usize = 2048;

// =============================================================================
// Provider telemetry
// =============================================================================

/// Per-provider event counters, mutated by the router behind a lock.
pub struct ProviderMetrics {
    counters: Mutex<HashMap<String, HashMap<String, u64>>>,
}

impl ProviderMetrics {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn increment(&self, provider: &str, event: &str) {
        let mut counters = self.counters.lock();
        *counters
            .entry(provider.to_string())
            .or_default()
            .entry(event.to_string())
            .or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> HashMap<String, HashMap<String, u64>> {
        self.counters.lock().clone()
    }
}

impl Default for ProviderMetrics {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Request metrics
// =============================================================================

/// Outcome bucket for an export attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportOutcome {
    Allowed,
    Blocked,
    FetchFailed,
    TooLarge,
}

#[derive(Debug, Default)]
struct RequestMetricsInner {
    api_requests: u64,
    api_errors: u64,
    chat_requests: u64,
    chat_fallbacks: u64,
    chat_refusals: u64,
    export_attempts: u64,
    export_allowed: u64,
    export_blocked: u64,
    export_fetch_failures: u64,
    export_too_large: u64,
    export_policy_reasons: HashMap<String, u64>,
    latencies_ms: VecDeque<f64>,
}

pub struct RequestMetrics {
    started_at: Instant,
    max_latency_samples: usize,
    inner: Mutex<RequestMetricsInner>,
}

impl RequestMetrics {
    pub fn new(max_latency_samples: usize) -> Self {
        Self {
            started_at: Instant::now(),
            max_latency_samples: max_latency_samples.max(1),
            inner: Mutex::new(RequestMetricsInner::default()),
        }
    }

    pub fn record_api_response(&self, status_code: u16, duration: Duration) {
        let latency_ms = duration.as_secs_f64() * 1000.0;
        let mut inner = self.inner.lock();
        inner.api_requests += 1;
        if status_code >= 400 {
            inner.api_errors += 1;
        }
        if inner.latencies_ms.len() == self.max_latency_samples {
            inner.latencies_ms.pop_front();
        }
        inner.latencies_ms.push_back(latency_ms.max(0.0));
    }

    pub fn record_chat_outcome(&self, fallback_used: bool, refusal_used: bool) {
        let mut inner = self.inner.lock();
        inner.chat_requests += 1;
        if fallback_used {
            inner.chat_fallbacks += 1;
        }
        if refusal_used {
            inner.chat_refusals += 1;
        }
    }

    pub fn record_export_outcome(&self, outcome: ExportOutcome, policy_reason: Option<&str>) {
        let mut inner = self.inner.lock();
        inner.export_attempts += 1;
        match outcome {
            ExportOutcome::Allowed => inner.export_allowed += 1,
            ExportOutcome::Blocked => inner.export_blocked += 1,
            ExportOutcome::FetchFailed => inner.export_fetch_failures += 1,
            ExportOutcome::TooLarge => inner.export_too_large += 1,
        }
        if let Some(reason) = policy_reason {
            *inner
                .export_policy_reasons
                .entry(reason.to_string())
                .or_insert(0) += 1;
        }
    }

    pub fn snapshot(&self) -> RequestMetricsSnapshot {
        let inner = self.inner.lock();
        let elapsed_seconds = self.started_at.elapsed().as_secs_f64().max(1e-9);
        let latencies: Vec<f64> = inner.latencies_ms.iter().copied().collect();

        let rate = |count: u64, denominator: u64| {
            if denominator == 0 {
                0.0
            } else {
                count as f64 / denominator as f64
            }
        };

        RequestMetricsSnapshot {
            window_seconds: elapsed_seconds,
            requests: CounterWithRate {
                total: inner.api_requests,
                rate: (inner.api_requests as f64 / elapsed_seconds) * 60.0,
            },
            errors: CounterWithRate {
                total: inner.api_errors,
                rate: rate(inner.api_errors, inner.api_requests),
            },
            fallback: CounterWithRate {
                total: inner.chat_fallbacks,
                rate: rate(inner.chat_fallbacks, inner.chat_requests),
            },
            refusal: CounterWithRate {
                total: inner.chat_refusals,
                rate: rate(inner.chat_refusals, inner.chat_requests),
            },
            export: ExportSnapshot {
                attempts: inner.export_attempts,
                allowed: inner.export_allowed,
                blocked: inner.export_blocked,
                fetch_failures: inner.export_fetch_failures,
                too_large: inner.export_too_large,
                policy_reasons: inner.export_policy_reasons.clone(),
            },
            latency_ms: LatencySnapshot {
                sample_count: latencies.len(),
                p50: percentile(&latencies, 50.0),
                p95: percentile(&latencies, 95.0),
                p99: percentile(&latencies, 99.0),
            },
        }
    }
}

impl Default for RequestMetrics {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LATENCY_SAMPLES)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CounterWithRate {
    pub total: u64,
    pub rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSnapshot {
    pub attempts: u64,
    pub allowed: u64,
    pub blocked: u64,
    pub fetch_failures: u64,
    pub too_large: u64,
    pub policy_reasons: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySnapshot {
    pub sample_count: usize,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestMetricsSnapshot {
    pub window_seconds: f64,
    pub requests: CounterWithRate,
    pub errors: CounterWithRate,
    pub fallback: CounterWithRate,
    pub refusal: CounterWithRate,
    pub export: ExportSnapshot,
    pub latency_ms: LatencySnapshot,
}

/// Linear-interpolated percentile over a sorted copy. Empty input is 0.
fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    if values.len() == 1 {
        return values[0];
    }
    let mut ordered = values.to_vec();
    ordered.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = (ordered.len() - 1) as f64 * (pct / 100.0);
    let lower_index = rank.floor() as usize;
    let upper_index = rank.ceil() as usize;
    if lower_index == upper_index {
        return ordered[lower_index];
    }
    let blend = rank - lower_index as f64;
    ordered[lower_index] + (ordered[upper_index] - ordered[lower_index]) * blend
}

// =============================================================================
// Ops endpoint server
// =============================================================================

pub struct OpsState {
    pub request_metrics: Arc<RequestMetrics>,
    pub provider_metrics: Arc<ProviderMetrics>,
    /// Token required for /ops/metrics when require_bearer is set.
    pub bearer_token: Option<String>,
    pub require_bearer: bool,
    pub environment: String,
}

#[derive(Debug, Serialize)]
struct OpsMetricsPayload {
    environment: String,
    requests: RequestMetricsSnapshot,
    providers: HashMap<String, HashMap<String, u64>>,
}

fn http_response(status: u16, reason: &str, trace_id: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nx-trace-id: {trace_id}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// Pure request handler for the ops surface; the TCP loop below is just
/// plumbing around it.
fn handle_ops_request(state: &OpsState, raw_request: &str) -> String {
    let trace_id = Uuid::new_v4().to_string();

    let mut lines = raw_request.lines();
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let path = parts.next().unwrap_or_default();
    let path = path.split('?').next().unwrap_or_default();

    if method != "GET" {
        return http_response(
            405,
            "Method Not Allowed",
            &trace_id,
            &format!(
                r#"{{"error":{{"code":"VALIDATION_ERROR","message":"method not allowed","trace_id":"{trace_id}"}}}}"#
            ),
        );
    }

    match path {
        "/healthz" => {
            let body = serde_json::json!({
                "status": "ok",
                "environment": state.environment,
            });
            http_response(200, "OK", &trace_id, &body.to_string())
        }
        "/ops/metrics" => {
            if state.require_bearer {
                let authorized = state.bearer_token.as_deref().is_some_and(|token| {
                    lines.clone().any(|line| {
                        line.split_once(':').is_some_and(|(name, value)| {
                            name.trim().eq_ignore_ascii_case("authorization")
                                && value.trim() == format!("Bearer {token}")
                        })
                    })
                });
                if !authorized {
                    return http_response(
                        401,
                        "Unauthorized",
                        &trace_id,
                        &format!(
                            r#"{{"error":{{"code":"UNAUTHORIZED","message":"Unauthorized","trace_id":"{trace_id}"}}}}"#
                        ),
                    );
                }
            }
            let payload = OpsMetricsPayload {
                environment: state.environment.clone(),
                requests: state.request_metrics.snapshot(),
                providers: state.provider_metrics.snapshot(),
            };
            let body = serde_json::to_string(&payload)
                .unwrap_or_else(|_| "{}".to_string());
            http_response(200, "OK", &trace_id, &body)
        }
        _ => http_response(
            404,
            "Not Found",
            &trace_id,
            &format!(
                r#"{{"error":{{"code":"VALIDATION_ERROR","message":"not found","trace_id":"{trace_id}"}}}}"#
            ),
        ),
    }
}

/// Serve /healthz and /ops/metrics until shutdown flips.
pub async fn run_ops_server(
    state: Arc<OpsState>,
    port: u16,
    shutdown: &mut watch::Receiver<bool>,
) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    let listener = match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(port, error = %err, "failed to bind ops server");
            return;
        }
    };

    info!(port, "ops server listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((mut stream, _addr)) => {
                        let mut buffer = vec![0u8; 4096];
                        let read = stream.read(&mut buffer).await.unwrap_or(0);
                        let raw_request = String::from_utf8_lossy(&buffer[..read]).to_string();
                        let response = handle_ops_request(&state, &raw_request);
                        let _ = stream.write_all(response.as_bytes()).await;
                        let _ = stream.shutdown().await;
                    }
                    Err(err) => {
                        error!(error = %err, "ops server accept error");
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("ops server shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(require_bearer: bool, token: Option<&str>) -> OpsState {
        OpsState {
            request_metrics: Arc::new(RequestMetrics::default()),
            provider_metrics: Arc::new(ProviderMetrics::new()),
            bearer_token: token.map(|t| t.to_string()),
            require_bearer,
            environment: "test".into(),
        }
    }

    #[test]
    fn percentile_of_empty_sample_is_zero() {
        assert_eq!(percentile(&[], 95.0), 0.0);
    }

    #[test]
    fn percentile_of_single_sample_is_that_sample() {
        assert_eq!(percentile(&[42.5], 99.0), 42.5);
    }

    #[test]
    fn percentile_interpolates_linearly() {
        let values = vec![10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&values, 50.0), 25.0);
        assert_eq!(percentile(&values, 0.0), 10.0);
        assert_eq!(percentile(&values, 100.0), 40.0);
    }

    #[test]
    fn latency_buffer_is_bounded() {
        let metrics = RequestMetrics::new(3);
        for index in 0..5 {
            metrics.record_api_response(200, Duration::from_millis(index * 10));
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.latency_ms.sample_count, 3);
        assert_eq!(snapshot.requests.total, 5);
    }

    #[test]
    fn error_and_chat_counters_accumulate() {
        let metrics = RequestMetrics::default();
        metrics.record_api_response(200, Duration::from_millis(5));
        metrics.record_api_response(503, Duration::from_millis(5));
        metrics.record_chat_outcome(true, false);
        metrics.record_chat_outcome(false, true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests.total, 2);
        assert_eq!(snapshot.errors.total, 1);
        assert_eq!(snapshot.errors.rate, 0.5);
        assert_eq!(snapshot.fallback.total, 1);
        assert_eq!(snapshot.refusal.total, 1);
    }

    #[test]
    fn export_outcomes_track_policy_reasons() {
        let metrics = RequestMetrics::default();
        metrics.record_export_outcome(ExportOutcome::Allowed, Some("source_export_allowed"));
        metrics.record_export_outcome(
            ExportOutcome::Blocked,
            Some("source_export_blocked_by_policy"),
        );
        metrics.record_export_outcome(ExportOutcome::FetchFailed, None);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.export.attempts, 3);
        assert_eq!(snapshot.export.allowed, 1);
        assert_eq!(snapshot.export.blocked, 1);
        assert_eq!(snapshot.export.fetch_failures, 1);
        assert_eq!(
            snapshot.export.policy_reasons["source_export_blocked_by_policy"],
            1
        );
    }

    #[test]
    fn provider_metrics_snapshot_counts_events() {
        let metrics = ProviderMetrics::new();
        metrics.increment("openai", "failure");
        metrics.increment("openai", "failure");
        metrics.increment("gemini", "fallback_success");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot["openai"]["failure"], 2);
        assert_eq!(snapshot["gemini"]["fallback_success"], 1);
    }

    #[test]
    fn healthz_answers_without_auth() {
        let response = handle_ops_request(&state(true, Some("secret")), "GET /healthz HTTP/1.1\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"status\":\"ok\""));
        assert!(response.contains("x-trace-id:"));
    }

    #[test]
    fn metrics_route_requires_bearer_when_guarded() {
        let guarded = state(true, Some("secret"));
        let denied = handle_ops_request(&guarded, "GET /ops/metrics HTTP/1.1\r\n\r\n");
        assert!(denied.starts_with("HTTP/1.1 401"));

        let granted = handle_ops_request(
            &guarded,
            "GET /ops/metrics HTTP/1.1\r\nAuthorization: Bearer secret\r\n\r\n",
        );
        assert!(granted.starts_with("HTTP/1.1 200"));
        assert!(granted.contains("\"providers\""));
    }

    #[test]
    fn metrics_route_is_open_when_unguarded() {
        let response = handle_ops_request(&state(false, None), "GET /ops/metrics HTTP/1.1\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 200"));
    }

    #[test]
    fn unknown_paths_get_404() {
        let response = handle_ops_request(&state(false, None), "GET /nope HTTP/1.1\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 404"));
    }
}
