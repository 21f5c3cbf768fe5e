// =============================================================================
// router.rs - ordered provider routing with per-provider circuit breakers
// =============================================================================
//
// The router walks its providers in configured order. A provider whose
// circuit is open is skipped outright; the first success wins. Circuit state
// per provider is two fields: a consecutive-failure count and an open_until
// deadline on the monotonic clock.
//
//   closed    open_until = None, failures < threshold. Calls flow.
//   open      open_until > now. Calls are skipped (circuit_skip).
//   half-open open_until <= now on the next routing attempt: the deadline is
//             cleared and one probe call goes through. Success keeps the
//             circuit closed; failure re-opens it with a fresh window.
//
// Time is injected so the window semantics are testable without sleeping.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics::ProviderMetrics;
use crate::models::Citation;
use crate::providers::{Provider, ProviderError, ProviderErrorCode, ProviderResult};

/// Monotonic time source. Production uses the process clock; tests drive a
/// manual one.
pub trait Clock: Send + Sync {
    fn monotonic(&self) -> f64;
}

pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn monotonic(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Hand-cranked clock for circuit-window tests.
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { now: Mutex::new(0.0) }
    }

    pub fn advance(&self, seconds: f64) {
        *self.now.lock() += seconds;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn monotonic(&self) -> f64 {
        *self.now.lock()
    }
}

#[derive(Debug, Default, Clone)]
struct CircuitState {
    failures: u32,
    open_until: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RoutingResult {
    pub result: ProviderResult,
    pub fallback_used: bool,
    pub fallback_reason: Option<ProviderErrorCode>,
}

#[derive(Debug, Error)]
pub enum RouterConfigError {
    #[error("ProviderRouter requires at least one provider")]
    NoProviders,
    #[error("failure threshold must be >= 1")]
    InvalidFailureThreshold,
    #[error("open window seconds must be > 0")]
    InvalidOpenWindow,
}

pub struct ProviderRouter {
    providers: Vec<Arc<dyn Provider>>,
    primary_provider_name: String,
    failure_threshold: u32,
    open_window_seconds: f64,
    telemetry: Arc<ProviderMetrics>,
    clock: Arc<dyn Clock>,
    states: Mutex<HashMap<String, CircuitState>>,
}

impl ProviderRouter {
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        primary_provider_name: impl Into<String>,
        failure_threshold: u32,
        open_window_seconds: f64,
        telemetry: Arc<ProviderMetrics>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RouterConfigError> {
        if providers.is_empty() {
            return Err(RouterConfigError::NoProviders);
        }
        if failure_threshold < 1 {
            return Err(RouterConfigError::InvalidFailureThreshold);
        }
        if open_window_seconds <= 0.0 {
            return Err(RouterConfigError::InvalidOpenWindow);
        }

        let states = providers
            .iter()
            .map(|provider| (provider.name().to_string(), CircuitState::default()))
            .collect();

        Ok(Self {
            providers,
            primary_provider_name: primary_provider_name.into(),
            failure_threshold,
            open_window_seconds,
            telemetry,
            clock,
            states: Mutex::new(states),
        })
    }

    /// Route one generation request. Returns the first success, or the last
    /// provider error after exhausting the list.
    pub async fn generate(
        &self,
        message: &str,
        citations: &[Citation],
        locale: &str,
    ) -> Result<RoutingResult, ProviderError> {
        let mut last_error: Option<ProviderError> = None;

        for provider in &self.providers {
            let name = provider.name();
            if self.is_circuit_open(name) {
                debug!(provider = name, "circuit open; provider skipped");
                self.telemetry.increment(name, "circuit_skip");
                if last_error.is_none() {
                    last_error = Some(ProviderError::new(
                        name,
                        ProviderErrorCode::ProviderError,
                        format!("Circuit breaker open for provider '{name}'"),
                    ));
                }
                continue;
            }

            match provider.generate(message, citations, locale).await {
                Ok(result) => {
                    let fallback_used = name != self.primary_provider_name;
                    let fallback_reason = if fallback_used {
                        last_error.as_ref().map(|err| err.code)
                    } else {
                        None
                    };
                    self.record_success(name, fallback_used);
                    return Ok(RoutingResult {
                        result,
                        fallback_used,
                        fallback_reason,
                    });
                }
                Err(err) => {
                    self.record_failure(name);
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ProviderError::new(
                "router",
                ProviderErrorCode::ProviderError,
                "No provider returned a response",
            )
        }))
    }

    pub fn telemetry_snapshot(&self) -> HashMap<String, HashMap<String, u64>> {
        self.telemetry.snapshot()
    }

    /// Open-circuit check with half-open transition: an expired deadline is
    /// cleared (failures reset) and the call proceeds as the probe.
    fn is_circuit_open(&self, provider_name: &str) -> bool {
        let mut states = self.states.lock();
        let state = states.entry(provider_name.to_string()).or_default();
        let Some(open_until) = state.open_until else {
            return false;
        };
        if self.clock.monotonic() >= open_until {
            state.open_until = None;
            state.failures = 0;
            debug!(provider = provider_name, "circuit window elapsed; half-open probe allowed");
            return false;
        }
        true
    }

    fn record_failure(&self, provider_name: &str) {
        let mut states = self.states.lock();
        let state = states.entry(provider_name.to_string()).or_default();
        state.failures += 1;
        self.telemetry.increment(provider_name, "failure");
        if state.failures >= self.failure_threshold {
            let open_until = self.clock.monotonic() + self.open_window_seconds;
            state.open_until = Some(open_until);
            self.telemetry.increment(provider_name, "circuit_open");
            warn!(
                provider = provider_name,
                failures = state.failures,
                open_seconds = self.open_window_seconds,
                "circuit opened"
            );
        }
    }

    fn record_success(&self, provider_name: &str, fallback_used: bool) {
        let mut states = self.states.lock();
        let state = states.entry(provider_name.to_string()).or_default();
        state.failures = 0;
        state.open_until = None;
        self.telemetry.increment(provider_name, "success");
        if fallback_used {
            self.telemetry.increment(provider_name, "fallback_success");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Confidence;
    use async_trait::async_trait;

    struct FailingProvider {
        name: String,
        code: ProviderErrorCode,
    }

    #[async_trait]
    impl Provider for FailingProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn generate(
            &self,
            _message: &str,
            _citations: &[Citation],
            _locale: &str,
        ) -> Result<ProviderResult, ProviderError> {
            Err(ProviderError::new(&self.name, self.code, "provider failed"))
        }
    }

    struct SuccessProvider {
        name: String,
        answer: String,
    }

    #[async_trait]
    impl Provider for SuccessProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn generate(
            &self,
            _message: &str,
            citations: &[Citation],
            _locale: &str,
        ) -> Result<ProviderResult, ProviderError> {
            Ok(ProviderResult {
                provider: self.name.clone(),
                answer: self.answer.clone(),
                citations: citations.to_vec(),
                confidence: Confidence::Medium,
            })
        }
    }

    /// Fails a fixed number of times, then succeeds.
    struct FlakyProvider {
        name: String,
        failures_remaining: Mutex<u32>,
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn generate(
            &self,
            _message: &str,
            citations: &[Citation],
            _locale: &str,
        ) -> Result<ProviderResult, ProviderError> {
            let mut remaining = self.failures_remaining.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ProviderError::new(
                    &self.name,
                    ProviderErrorCode::Timeout,
                    "temporary timeout",
                ));
            }
            Ok(ProviderResult {
                provider: self.name.clone(),
                answer: "ok".into(),
                citations: citations.to_vec(),
                confidence: Confidence::Medium,
            })
        }
    }

    fn router_with(
        providers: Vec<Arc<dyn Provider>>,
        threshold: u32,
        window: f64,
        clock: Arc<dyn Clock>,
    ) -> ProviderRouter {
        ProviderRouter::new(
            providers,
            "openai",
            threshold,
            window,
            Arc::new(ProviderMetrics::new()),
            clock,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn fallback_carries_the_primary_error_code() {
        let router = router_with(
            vec![
                Arc::new(FailingProvider {
                    name: "openai".into(),
                    code: ProviderErrorCode::Timeout,
                }),
                Arc::new(SuccessProvider {
                    name: "gemini".into(),
                    answer: "fallback answer".into(),
                }),
            ],
            3,
            30.0,
            Arc::new(SystemClock::default()),
        );

        let routed = router.generate("q", &[], "en-CA").await.unwrap();
        assert!(routed.fallback_used);
        assert_eq!(routed.fallback_reason, Some(ProviderErrorCode::Timeout));
        assert_eq!(routed.result.provider, "gemini");

        let metrics = router.telemetry_snapshot();
        assert_eq!(metrics["openai"]["failure"], 1);
        assert_eq!(metrics["gemini"]["success"], 1);
        assert_eq!(metrics["gemini"]["fallback_success"], 1);
    }

    #[tokio::test]
    async fn open_circuit_skips_the_provider() {
        let clock = Arc::new(ManualClock::new());
        let router = router_with(
            vec![
                Arc::new(FailingProvider {
                    name: "openai".into(),
                    code: ProviderErrorCode::ProviderError,
                }),
                Arc::new(SuccessProvider {
                    name: "gemini".into(),
                    answer: "x".into(),
                }),
            ],
            1,
            60.0,
            clock,
        );

        let first = router.generate("q1", &[], "en-CA").await.unwrap();
        let second = router.generate("q2", &[], "en-CA").await.unwrap();
        assert!(first.fallback_used);
        assert!(second.fallback_used);

        let metrics = router.telemetry_snapshot();
        assert_eq!(metrics["openai"]["failure"], 1);
        assert_eq!(metrics["openai"]["circuit_open"], 1);
        assert_eq!(metrics["openai"]["circuit_skip"], 1);
    }

    #[tokio::test]
    async fn circuit_resets_after_the_window() {
        let clock = Arc::new(ManualClock::new());
        let router = router_with(
            vec![
                Arc::new(FlakyProvider {
                    name: "openai".into(),
                    failures_remaining: Mutex::new(1),
                }),
                Arc::new(SuccessProvider {
                    name: "gemini".into(),
                    answer: "x".into(),
                }),
            ],
            1,
            5.0,
            Arc::clone(&clock) as Arc<dyn Clock>,
        );

        let first = router.generate("q1", &[], "en-CA").await.unwrap();
        assert!(first.fallback_used);

        clock.advance(10.0);
        let second = router.generate("q2", &[], "en-CA").await.unwrap();
        assert!(!second.fallback_used);
        assert_eq!(second.result.provider, "openai");

        let metrics = router.telemetry_snapshot();
        assert_eq!(metrics["openai"]["success"], 1);
    }

    #[tokio::test]
    async fn threshold_three_opens_after_three_failures() {
        let clock = Arc::new(ManualClock::new());
        let router = router_with(
            vec![
                Arc::new(FailingProvider {
                    name: "openai".into(),
                    code: ProviderErrorCode::Timeout,
                }),
                Arc::new(SuccessProvider {
                    name: "gemini".into(),
                    answer: "X".into(),
                }),
            ],
            3,
            30.0,
            clock,
        );

        for _ in 0..3 {
            let routed = router.generate("q", &[], "en-CA").await.unwrap();
            assert!(routed.fallback_used);
            assert_eq!(routed.fallback_reason, Some(ProviderErrorCode::Timeout));
        }

        // Fourth request: openai is open and skipped, not called.
        let routed = router.generate("q", &[], "en-CA").await.unwrap();
        assert!(routed.fallback_used);
        assert_eq!(routed.result.provider, "gemini");

        let metrics = router.telemetry_snapshot();
        assert_eq!(metrics["openai"]["failure"], 3);
        assert_eq!(metrics["openai"]["circuit_open"], 1);
        assert_eq!(metrics["openai"]["circuit_skip"], 1);
        assert_eq!(metrics["gemini"]["fallback_success"], 4);
    }

    #[tokio::test]
    async fn exhausted_providers_surface_the_last_error() {
        let router = router_with(
            vec![
                Arc::new(FailingProvider {
                    name: "openai".into(),
                    code: ProviderErrorCode::Timeout,
                }),
                Arc::new(FailingProvider {
                    name: "gemini".into(),
                    code: ProviderErrorCode::RateLimit,
                }),
            ],
            3,
            30.0,
            Arc::new(SystemClock::default()),
        );

        let err = router.generate("q", &[], "en-CA").await.unwrap_err();
        assert_eq!(err.provider, "gemini");
        assert_eq!(err.code, ProviderErrorCode::RateLimit);
    }

    #[tokio::test]
    async fn all_circuits_open_synthesizes_a_router_error() {
        let clock = Arc::new(ManualClock::new());
        let router = router_with(
            vec![Arc::new(FailingProvider {
                name: "openai".into(),
                code: ProviderErrorCode::ProviderError,
            })],
            1,
            60.0,
            clock,
        );

        // Trip the only provider, then route again while it is open.
        router.generate("q", &[], "en-CA").await.unwrap_err();
        let err = router.generate("q", &[], "en-CA").await.unwrap_err();
        assert_eq!(err.code, ProviderErrorCode::ProviderError);
        assert!(err.message.contains("Circuit breaker open"));
    }

    #[test]
    fn constructor_validates_configuration() {
        let providers: Vec<Arc<dyn Provider>> = vec![Arc::new(SuccessProvider {
            name: "openai".into(),
            answer: "x".into(),
        })];
        assert!(matches!(
            ProviderRouter::new(
                vec![],
                "openai",
                3,
                30.0,
                Arc::new(ProviderMetrics::new()),
                Arc::new(SystemClock::default()),
            ),
            Err(RouterConfigError::NoProviders)
        ));
        assert!(matches!(
            ProviderRouter::new(
                providers.clone(),
                "openai",
                0,
                30.0,
                Arc::new(ProviderMetrics::new()),
                Arc::new(SystemClock::default()),
            ),
            Err(RouterConfigError::InvalidFailureThreshold)
        ));
        assert!(matches!(
            ProviderRouter::new(
                providers,
                "openai",
                3,
                0.0,
                Arc::new(ProviderMetrics::new()),
                Arc::new(SystemClock::default()),
            ),
            Err(RouterConfigError::InvalidOpenWindow)
        ));
    }
}
