// =============================================================================
// canlii_client.rs - licensed fallback case-law client
// =============================================================================
//
// CanLII is the commercial-grade fallback when the official feeds are down.
// Access is licensed and budgeted, so every call passes through a usage
// limiter first: a daily budget, a per-second cap, and an in-flight ceiling.
// Exceeding any of them surfaces as source-unavailable rather than burning
// through the license terms.
//
// Without an API key the client can serve deterministic synthetic results,
// but only when the deployment explicitly allows synthetic citations. That
// flag is refused at startup in production.
// =============================================================================

use std::collections::VecDeque;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::errors::ApiError;
use crate::models::{CaseSearchRequest, CaseSearchResponse, CaseSearchResult};

pub const DEFAULT_CANLII_BASE_URL: &str = "https://api.canlii.org/v1";

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CanLIIUsageLimits {
    pub daily_limit: u32,
    pub per_second_limit: u32,
    pub max_in_flight: u32,
}

impl Default for CanLIIUsageLimits {
    fn default() -> Self {
        // Stays inside the unauthenticated courtesy budget with headroom.
        Self {
            daily_limit: 90,
            per_second_limit: 2,
            max_in_flight: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("canlii usage limit exceeded: {reason}")]
pub struct CanLIIUsageLimitExceeded {
    pub reason: &'static str,
}

#[derive(Debug)]
struct LimiterInner {
    daily_date: NaiveDate,
    daily_count: u32,
    in_flight: u32,
    recent: VecDeque<Instant>,
    blocked_daily: u64,
    blocked_per_second: u64,
    blocked_concurrent: u64,
}

/// Process-local usage limiter for the CanLII license budget.
#[derive(Debug)]
pub struct InMemoryCanLIIUsageLimiter {
    limits: CanLIIUsageLimits,
    inner: Mutex<LimiterInner>,
}

/// Live lease on one CanLII call. Dropping the lease releases the in-flight
/// slot.
#[derive(Debug)]
pub struct UsageLease<'a> {
    limiter: &'a InMemoryCanLIIUsageLimiter,
    released: bool,
}

impl UsageLease<'_> {
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            let mut inner = self.limiter.inner.lock();
            inner.in_flight = inner.in_flight.saturating_sub(1);
        }
    }
}

impl Drop for UsageLease<'_> {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl InMemoryCanLIIUsageLimiter {
    pub fn new(limits: CanLIIUsageLimits) -> Self {
        Self {
            limits,
            inner: Mutex::new(LimiterInner {
                daily_date: Utc::now().date_naive(),
                daily_count: 0,
                in_flight: 0,
                recent: VecDeque::new(),
                blocked_daily: 0,
                blocked_per_second: 0,
                blocked_concurrent: 0,
            }),
        }
    }

    pub fn acquire(&self) -> Result<UsageLease<'_>, CanLIIUsageLimitExceeded> {
        let mut inner = self.inner.lock();

        let today = Utc::now().date_naive();
        if inner.daily_date != today {
            inner.daily_date = today;
            inner.daily_count = 0;
        }

        if inner.in_flight >= self.limits.max_in_flight {
            inner.blocked_concurrent += 1;
            return Err(CanLIIUsageLimitExceeded {
                reason: "concurrent_limit",
            });
        }
        if inner.daily_count >= self.limits.daily_limit {
            inner.blocked_daily += 1;
            return Err(CanLIIUsageLimitExceeded {
                reason: "daily_limit",
            });
        }

        let now = Instant::now();
        while let Some(front) = inner.recent.front() {
            if now.duration_since(*front).as_secs_f64() >= 1.0 {
                inner.recent.pop_front();
            } else {
                break;
            }
        }
        if inner.recent.len() as u32 >= self.limits.per_second_limit {
            inner.blocked_per_second += 1;
            return Err(CanLIIUsageLimitExceeded {
                reason: "per_second_limit",
            });
        }

        inner.daily_count += 1;
        inner.in_flight += 1;
        inner.recent.push_back(now);
        drop(inner);

        Ok(UsageLease {
            limiter: self,
            released: false,
        })
    }

    pub fn snapshot(&self) -> CanLIIUsageSnapshot {
        let inner = self.inner.lock();
        CanLIIUsageSnapshot {
            mode: "in_memory",
            limits: self.limits,
            daily_count: inner.daily_count,
            daily_remaining: self.limits.daily_limit.saturating_sub(inner.daily_count),
            in_flight: inner.in_flight,
            blocked_daily: inner.blocked_daily,
            blocked_per_second: inner.blocked_per_second,
            blocked_concurrent: inner.blocked_concurrent,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CanLIIUsageSnapshot {
    pub mode: &'static str,
    pub limits: CanLIIUsageLimits,
    pub daily_count: u32,
    pub daily_remaining: u32,
    pub in_flight: u32,
    pub blocked_daily: u64,
    pub blocked_per_second: u64,
    pub blocked_concurrent: u64,
}

/// Licensed fallback client. Bounded integration point: the upstream API
/// surface varies by dataset, so parsing is tolerant of several envelope
/// shapes.
pub struct CanLIIClient {
    api_key: Option<String>,
    base_url: String,
    http: reqwest::Client,
    limiter: InMemoryCanLIIUsageLimiter,
    allow_synthetic_results: bool,
}

impl CanLIIClient {
    pub fn new(
        api_key: Option<String>,
        base_url: Option<String>,
        timeout: std::time::Duration,
        limits: CanLIIUsageLimits,
        allow_synthetic_results: bool,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("immcad-api/0.1 (case-law-fallback)")
            .build()?;
        Ok(Self {
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_CANLII_BASE_URL.to_string()),
            http,
            limiter: InMemoryCanLIIUsageLimiter::new(limits),
            allow_synthetic_results,
        })
    }

    pub fn usage_snapshot(&self) -> CanLIIUsageSnapshot {
        self.limiter.snapshot()
    }

    pub async fn search_cases(
        &self,
        request: &CaseSearchRequest,
    ) -> Result<CaseSearchResponse, ApiError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return self.fallback(request);
        };

        let _lease = self.limiter.acquire().map_err(|err| {
            warn!(reason = err.reason, "canlii usage limiter refused the call");
            ApiError::source_unavailable("Case-law fallback budget is exhausted. Please retry later.")
        })?;

        let mut endpoint = format!(
            "{}/caseBrowse/en/{}/",
            self.base_url.trim_end_matches('/'),
            request.jurisdiction
        );
        if let Some(court) = &request.court {
            endpoint.push_str(court);
            endpoint.push('/');
        }

        let response = self
            .http
            .get(&endpoint)
            .header("Authorization", format!("Token {api_key}"))
            .query(&[
                ("searchTerm", request.query.as_str()),
                ("offset", "0"),
                ("resultCount", &request.limit.to_string()),
            ])
            .send()
            .await;

        let payload: serde_json::Value = match response {
            Ok(response) if response.status().is_success() => match response.json().await {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(error = %err, "canlii payload decode failed");
                    return self.fallback(request);
                }
            },
            Ok(response) => {
                warn!(status = %response.status(), "canlii returned non-success status");
                return self.fallback(request);
            }
            Err(err) => {
                warn!(error = %err, "canlii request failed");
                return self.fallback(request);
            }
        };

        let results = parse_canlii_payload(&payload, request.limit);
        if results.is_empty() {
            return self.fallback(request);
        }
        Ok(CaseSearchResponse { results })
    }

    /// Last-resort path: deterministic synthetic results in scaffold
    /// deployments, source-unavailable everywhere else.
    fn fallback(&self, request: &CaseSearchRequest) -> Result<CaseSearchResponse, ApiError> {
        if !self.allow_synthetic_results {
            return Err(ApiError::source_unavailable(
                "Case-law sources are unavailable. Please retry later.",
            ));
        }

        let court = request
            .court
            .clone()
            .unwrap_or_else(|| "fct".to_string())
            .to_uppercase();
        let today = Utc::now().date_naive();
        let year = chrono::Datelike::year(&today);
        let slug: String = request
            .query
            .to_lowercase()
            .replace(' ', "-")
            .chars()
            .take(48)
            .collect();

        let results = (1..=request.limit.min(3))
            .map(|index| CaseSearchResult {
                case_id: format!("{court}-{year}-{index}"),
                title: format!("Scaffold Case {index}: {}", request.query),
                citation: format!("{court} {year} {index}"),
                decision_date: today,
                url: format!(
                    "https://www.canlii.org/en/ca/{}/doc/{year}/{slug}-{index}.html",
                    court.to_lowercase()
                ),
            })
            .collect();
        Ok(CaseSearchResponse { results })
    }
}

/// Pull case entries out of whichever envelope shape the API returned.
fn parse_canlii_payload(payload: &serde_json::Value, limit: usize) -> Vec<CaseSearchResult> {
    let cases = ["cases", "results", "caseResults"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(|value| value.as_array()));
    let Some(cases) = cases else {
        return Vec::new();
    };

    cases
        .iter()
        .take(limit)
        .map(|item| {
            let text = |key: &str| {
                item.get(key)
                    .and_then(|value| value.as_str())
                    .map(|value| value.to_string())
            };
            CaseSearchResult {
                case_id: text("caseId")
                    .or_else(|| text("databaseId"))
                    .unwrap_or_else(|| "unknown-case".to_string()),
                title: text("title").unwrap_or_else(|| "Untitled".to_string()),
                citation: text("citation").unwrap_or_default(),
                decision_date: text("decisionDate")
                    .and_then(|value| parse_decision_date(&value))
                    .unwrap_or_else(|| Utc::now().date_naive()),
                url: text("url").unwrap_or_else(|| "https://www.canlii.org/".to_string()),
            }
        })
        .collect()
}

fn parse_decision_date(value: &str) -> Option<NaiveDate> {
    let normalized = value.split('T').next().unwrap_or(value);
    NaiveDate::parse_from_str(normalized, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_enforces_concurrency_and_reports_snapshot() {
        let limiter = InMemoryCanLIIUsageLimiter::new(CanLIIUsageLimits {
            daily_limit: 10,
            per_second_limit: 10,
            max_in_flight: 1,
        });

        let lease = limiter.acquire().unwrap();
        let err = limiter.acquire().unwrap_err();
        assert_eq!(err.reason, "concurrent_limit");
        lease.release();

        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.mode, "in_memory");
        assert_eq!(snapshot.limits.max_in_flight, 1);
        assert!(snapshot.daily_count >= 1);
        assert!(snapshot.blocked_concurrent >= 1);
    }

    #[test]
    fn limiter_enforces_daily_budget() {
        let limiter = InMemoryCanLIIUsageLimiter::new(CanLIIUsageLimits {
            daily_limit: 1,
            per_second_limit: 10,
            max_in_flight: 1,
        });

        limiter.acquire().unwrap().release();
        let err = limiter.acquire().unwrap_err();
        assert_eq!(err.reason, "daily_limit");

        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.daily_count, 1);
        assert_eq!(snapshot.daily_remaining, 0);
        assert!(snapshot.blocked_daily >= 1);
    }

    #[test]
    fn lease_drop_releases_the_in_flight_slot() {
        let limiter = InMemoryCanLIIUsageLimiter::new(CanLIIUsageLimits {
            daily_limit: 10,
            per_second_limit: 10,
            max_in_flight: 1,
        });
        {
            let _lease = limiter.acquire().unwrap();
        }
        assert!(limiter.acquire().is_ok());
    }

    #[test]
    fn payload_parsing_handles_alternate_envelopes() {
        let payload = serde_json::json!({
            "caseResults": [{
                "caseId": "2024fc10",
                "title": "Doe v Canada",
                "citation": "2024 FC 10",
                "decisionDate": "2024-02-19T00:00:00Z",
                "url": "https://www.canlii.org/en/ca/fct/doc/2024/2024fc10/2024fc10.html"
            }]
        });
        let results = parse_canlii_payload(&payload, 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].case_id, "2024fc10");
        assert_eq!(
            results[0].decision_date,
            NaiveDate::from_ymd_opt(2024, 2, 19).unwrap()
        );
    }

    #[test]
    fn unparseable_payload_yields_no_results() {
        let payload = serde_json::json!({"unexpected": true});
        assert!(parse_canlii_payload(&payload, 5).is_empty());
    }

    #[tokio::test]
    async fn unconfigured_client_without_synthetic_results_is_unavailable() {
        let client = CanLIIClient::new(
            None,
            None,
            std::time::Duration::from_secs(1),
            CanLIIUsageLimits::default(),
            false,
        )
        .unwrap();
        let err = client
            .search_cases(&CaseSearchRequest {
                query: "refugee appeal".into(),
                jurisdiction: "ca".into(),
                court: None,
                limit: 5,
            })
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 503);
    }

    #[tokio::test]
    async fn unconfigured_client_with_synthetic_results_scaffolds() {
        let client = CanLIIClient::new(
            None,
            None,
            std::time::Duration::from_secs(1),
            CanLIIUsageLimits::default(),
            true,
        )
        .unwrap();
        let response = client
            .search_cases(&CaseSearchRequest {
                query: "refugee appeal".into(),
                jurisdiction: "ca".into(),
                court: Some("fc".into()),
                limit: 5,
            })
            .await
            .unwrap();
        assert_eq!(response.results.len(), 3);
        assert!(response.results[0].citation.starts_with("FC "));
    }
}
