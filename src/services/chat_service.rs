// =============================================================================
// chat_service.rs - the grounded answering pipeline
// =============================================================================
//
// One request, four gates, in order:
//
//   1. policy refusal gate   (representation/advice solicitations stop here)
//   2. grounding adapter     (candidate citations for the provider)
//   3. provider router       (circuit-breaker fallback chain)
//   4. citation enforcement  (ungrounded answers are replaced)
//
// Audit events fire on refusals and provider failures. They carry the message
// length, never the message.
// =============================================================================

use std::sync::Arc;

use crate::audit::{AuditEventType, ChatAuditEvent};
use crate::errors::ApiError;
use crate::models::{ChatRequest, ChatResponse, FallbackUsed};
use crate::policy::{
    enforce_citation_requirement, filter_citations_to_trusted_domains, should_refuse_for_policy,
    DISCLAIMER_TEXT, POLICY_REFUSAL_TEXT,
};
use crate::providers::ProviderRouter;
use crate::services::grounding::GroundingAdapter;

pub struct ChatService {
    router: Arc<ProviderRouter>,
    grounding: Arc<dyn GroundingAdapter>,
    /// Normalized trusted-domain list; empty disables the hardened filter.
    trusted_citation_domains: Vec<String>,
}

impl ChatService {
    pub fn new(
        router: Arc<ProviderRouter>,
        grounding: Arc<dyn GroundingAdapter>,
        trusted_citation_domains: Vec<String>,
    ) -> Self {
        Self {
            router,
            grounding,
            trusted_citation_domains,
        }
    }

    pub async fn handle_chat(
        &self,
        request: &ChatRequest,
        trace_id: &str,
    ) -> Result<ChatResponse, ApiError> {
        request.validate()?;

        if should_refuse_for_policy(&request.message) {
            ChatAuditEvent::new(
                trace_id,
                AuditEventType::PolicyBlock,
                request.locale,
                request.mode,
                request.message.len(),
            )
            .emit();
            return Ok(ChatResponse {
                answer: POLICY_REFUSAL_TEXT.to_string(),
                citations: Vec::new(),
                confidence: crate::models::Confidence::Low,
                disclaimer: DISCLAIMER_TEXT.to_string(),
                fallback_used: FallbackUsed::policy_block(),
            });
        }

        let candidates = self.grounding.citation_candidates(
            &request.message,
            request.locale,
            request.mode,
        );

        let locale = request.locale.to_string();
        let routed = match self
            .router
            .generate(&request.message, &candidates, &locale)
            .await
        {
            Ok(routed) => routed,
            Err(err) => {
                ChatAuditEvent::new(
                    trace_id,
                    AuditEventType::ProviderError,
                    request.locale,
                    request.mode,
                    request.message.len(),
                )
                .with_provider(&err.provider, &err.code.to_string())
                .emit();
                return Err(ApiError::provider(err.message));
            }
        };

        // Enforcement runs on the final list, after the hardened-domain filter.
        let final_citations = filter_citations_to_trusted_domains(
            routed.result.citations,
            &self.trusted_citation_domains,
        );
        let (answer, citations, confidence) =
            enforce_citation_requirement(routed.result.answer, final_citations);

        let fallback_provider = routed
            .fallback_used
            .then(|| routed.result.provider.clone());
        let fallback_reason = routed
            .fallback_used
            .then(|| routed.fallback_reason.map(|code| code.as_fallback_reason()))
            .flatten();

        Ok(ChatResponse {
            answer,
            citations,
            confidence,
            disclaimer: DISCLAIMER_TEXT.to_string(),
            fallback_used: FallbackUsed {
                used: routed.fallback_used,
                provider: fallback_provider,
                reason: fallback_reason,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ProviderMetrics;
    use crate::models::{ChatLocale, ChatMode, Citation, Confidence};
    use crate::policy::SAFE_CONSTRAINED_RESPONSE;
    use crate::providers::{
        Provider, ProviderError, ProviderErrorCode, ProviderResult, SystemClock,
    };
    use crate::services::grounding::{baseline_citation, StaticGroundingAdapter};
    use async_trait::async_trait;

    struct EchoProvider {
        name: String,
        answer: String,
    }

    #[async_trait]
    impl Provider for EchoProvider {
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
            Err(ProviderError::new(&self.name, self.code, "provider timed out"))
        }
    }

    struct EmptyGrounding;

    impl GroundingAdapter for EmptyGrounding {
        fn citation_candidates(
            &self,
            _message: &str,
            _locale: ChatLocale,
            _mode: ChatMode,
        ) -> Vec<Citation> {
            Vec::new()
        }
    }

    fn router(providers: Vec<Arc<dyn Provider>>) -> Arc<ProviderRouter> {
        Arc::new(
            ProviderRouter::new(
                providers,
                "openai",
                3,
                30.0,
                Arc::new(ProviderMetrics::new()),
                Arc::new(SystemClock::default()),
            )
            .unwrap(),
        )
    }

    fn request(message: &str) -> ChatRequest {
        ChatRequest {
            session_id: "session-123456".into(),
            message: message.into(),
            locale: ChatLocale::EnCa,
            mode: ChatMode::Standard,
        }
    }

    fn service(router: Arc<ProviderRouter>, grounding: Arc<dyn GroundingAdapter>) -> ChatService {
        ChatService::new(router, grounding, Vec::new())
    }

    #[tokio::test]
    async fn representation_requests_are_refused_with_policy_block() {
        let service = service(
            router(vec![Arc::new(EchoProvider {
                name: "openai".into(),
                answer: "should never run".into(),
            })]),
            Arc::new(StaticGroundingAdapter),
        );

        let response = service
            .handle_chat(&request("Please represent me before the IRB."), "trace-1")
            .await
            .unwrap();

        assert_eq!(response.answer, POLICY_REFUSAL_TEXT);
        assert!(response.citations.is_empty());
        assert_eq!(response.confidence, Confidence::Low);
        assert!(!response.fallback_used.used);
        assert_eq!(
            response.fallback_used.reason,
            Some(crate::models::FallbackReason::PolicyBlock)
        );
        assert_eq!(response.disclaimer, DISCLAIMER_TEXT);
    }

    #[tokio::test]
    async fn grounded_answer_passes_through_with_baseline_citation() {
        let service = service(
            router(vec![Arc::new(EchoProvider {
                name: "openai".into(),
                answer: "Informational answer.".into(),
            })]),
            Arc::new(StaticGroundingAdapter),
        );

        let response = service
            .handle_chat(&request("What does IRPA section 11 require?"), "trace-2")
            .await
            .unwrap();

        assert_eq!(response.answer, "Informational answer.");
        assert_eq!(response.citations, vec![baseline_citation()]);
        assert_eq!(response.confidence, Confidence::Medium);
        assert!(!response.fallback_used.used);
        assert!(response.fallback_used.provider.is_none());
    }

    #[tokio::test]
    async fn ungrounded_answer_is_replaced_with_the_safe_response() {
        let service = service(
            router(vec![Arc::new(EchoProvider {
                name: "openai".into(),
                answer: "Confident but unsourced.".into(),
            })]),
            Arc::new(EmptyGrounding),
        );

        let response = service
            .handle_chat(&request("Tell me about processing times"), "trace-3")
            .await
            .unwrap();

        assert_eq!(response.answer, SAFE_CONSTRAINED_RESPONSE);
        assert!(response.citations.is_empty());
        assert_eq!(response.confidence, Confidence::Low);
    }

    #[tokio::test]
    async fn untrusted_citation_hosts_are_dropped_in_hardened_mode() {
        let router = router(vec![Arc::new(EchoProvider {
            name: "openai".into(),
            answer: "Answer with a dubious source.".into(),
        })]);
        let service = ChatService::new(
            router,
            Arc::new(StaticGroundingAdapter),
            vec!["evil.example".into()],
        );

        // Baseline is hosted on justice.gc.ca, which is not in the configured
        // allow-list, so the answer loses its grounding and gets constrained.
        let response = service
            .handle_chat(&request("What does IRPA say?"), "trace-4")
            .await
            .unwrap();
        assert_eq!(response.answer, SAFE_CONSTRAINED_RESPONSE);
        assert_eq!(response.confidence, Confidence::Low);
    }

    #[tokio::test]
    async fn fallback_metadata_names_the_provider_and_reason() {
        let service = service(
            router(vec![
                Arc::new(FailingProvider {
                    name: "openai".into(),
                    code: ProviderErrorCode::Timeout,
                }),
                Arc::new(EchoProvider {
                    name: "gemini".into(),
                    answer: "X".into(),
                }),
            ]),
            Arc::new(StaticGroundingAdapter),
        );

        let response = service
            .handle_chat(&request("What is section 11?"), "trace-5")
            .await
            .unwrap();
        assert!(response.fallback_used.used);
        assert_eq!(response.fallback_used.provider.as_deref(), Some("gemini"));
        assert_eq!(
            response.fallback_used.reason,
            Some(crate::models::FallbackReason::Timeout)
        );
    }

    #[tokio::test]
    async fn exhausted_router_surfaces_a_provider_error() {
        let service = service(
            router(vec![Arc::new(FailingProvider {
                name: "openai".into(),
                code: ProviderErrorCode::Timeout,
            })]),
            Arc::new(StaticGroundingAdapter),
        );

        let err = service
            .handle_chat(&request("What is section 11?"), "trace-6")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 502);
    }

    #[tokio::test]
    async fn invalid_requests_fail_validation_before_any_provider_call() {
        let service = service(
            router(vec![Arc::new(FailingProvider {
                name: "openai".into(),
                code: ProviderErrorCode::ProviderError,
            })]),
            Arc::new(StaticGroundingAdapter),
        );

        let mut invalid = request("valid message");
        invalid.session_id = "short".into();
        let err = service.handle_chat(&invalid, "trace-7").await.unwrap_err();
        assert_eq!(err.status_code(), 422);
    }
}
