// =============================================================================
// app.rs - composition root
// =============================================================================
//
// Builds the full service graph from Settings. The external HTTP framework
// adapter consumes AppContext to mount the JSON routes; the daemon binary
// uses the same context to run the ingestion scheduler and ops server.
// Everything here fails fast: a bad registry, policy file, or provider
// configuration stops startup.
// =============================================================================

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::config::Settings;
use crate::ingestion::{
    load_fetch_policy, CheckpointStore, HttpSourceFetcher, IngestionEngine, SourceFetchPolicy,
};
use crate::metrics::{OpsState, ProviderMetrics, RequestMetrics};
use crate::policy::normalize_trusted_domains;
use crate::providers::{
    GeminiProvider, OpenAIProvider, Provider, ProviderRouter, ScaffoldProvider, SystemClock,
};
use crate::ratelimit::{build_rate_limiter, RateLimiter};
use crate::services::{
    CaseSearchService, ChatService, ExportApprovalSigner, ExportPolicyGate,
    KeywordGroundingAdapter, LawyerCaseResearchService,
};
use crate::sources::canlii_client::{CanLIIClient, CanLIIUsageLimits};
use crate::sources::official_client::{HttpCourtFeedFetcher, OfficialCaseLawClient};
use crate::sources::registry::SourceRegistry;
use crate::sources::source_policy::SourcePolicy;
use crate::sources::{load_source_policy, load_source_registry};

const DEFAULT_MAX_GROUNDING_CITATIONS: usize = 3;

pub struct AppContext {
    pub settings: Settings,
    pub registry: Arc<SourceRegistry>,
    pub source_policy: Arc<SourcePolicy>,
    pub fetch_policy: SourceFetchPolicy,

    pub chat_service: Arc<ChatService>,
    pub case_search_service: Arc<CaseSearchService>,
    pub lawyer_research_service: Arc<LawyerCaseResearchService>,
    pub export_gate: Arc<ExportPolicyGate>,
    pub rate_limiter: Arc<dyn RateLimiter>,

    pub request_metrics: Arc<RequestMetrics>,
    pub provider_metrics: Arc<ProviderMetrics>,
    pub ingestion_engine: Arc<IngestionEngine>,
}

impl AppContext {
    /// Open the checkpoint store at the configured path. The ingestion
    /// scheduler is the single writer.
    pub fn open_checkpoint_store(&self) -> CheckpointStore {
        CheckpointStore::load(&self.settings.ingestion_checkpoint_state_path)
    }

    pub fn ops_state(&self) -> Arc<OpsState> {
        Arc::new(OpsState {
            request_metrics: Arc::clone(&self.request_metrics),
            provider_metrics: Arc::clone(&self.provider_metrics),
            bearer_token: self.settings.api_bearer_token.clone(),
            require_bearer: self.settings.is_production(),
            environment: self.settings.environment.clone(),
        })
    }
}

pub async fn build_app_context(settings: Settings) -> anyhow::Result<AppContext> {
    let registry = Arc::new(
        load_source_registry(None).context("failed to load the source registry")?,
    );
    let missing = registry.missing_production_required_sources();
    if settings.is_production() && !missing.is_empty() {
        anyhow::bail!(
            "registry is missing production-required sources: {}",
            missing.join(", ")
        );
    }

    let source_policy = Arc::new(
        load_source_policy(None).context("failed to load the source policy")?,
    );
    let fetch_policy =
        load_fetch_policy(None, 30.0).context("failed to load the fetch policy")?;

    // Provider chain: the configured primary first, its peer second, the
    // scaffold last when a deployment explicitly enables it.
    let openai: Arc<dyn Provider> = Arc::new(
        OpenAIProvider::new(
            settings.openai_api_key.clone(),
            settings.openai_model.clone(),
            settings.provider_timeout,
            settings.provider_max_retries,
        )
        .context("failed to build the OpenAI client")?,
    );
    let gemini: Arc<dyn Provider> = Arc::new(
        GeminiProvider::new(
            settings.gemini_api_key.clone(),
            settings.gemini_model.clone(),
            settings.gemini_fallback_models.clone(),
            settings.provider_timeout,
            settings.provider_max_retries,
        )
        .context("failed to build the Gemini client")?,
    );
    let mut providers: Vec<Arc<dyn Provider>> = if settings.primary_provider == "gemini" {
        vec![gemini, openai]
    } else {
        vec![openai, gemini]
    };
    if settings.enable_scaffold_provider {
        providers.push(Arc::new(ScaffoldProvider::new(
            settings.allow_scaffold_synthetic_citations,
        )));
    }

    let provider_metrics = Arc::new(ProviderMetrics::new());
    let router = Arc::new(
        ProviderRouter::new(
            providers,
            settings.primary_provider.clone(),
            settings.provider_circuit_breaker_failure_threshold,
            settings.provider_circuit_breaker_open_seconds,
            Arc::clone(&provider_metrics),
            Arc::new(SystemClock::default()),
        )
        .context("failed to build the provider router")?,
    );

    let grounding = Arc::new(KeywordGroundingAdapter::new(
        crate::services::official_grounding_catalog(),
        DEFAULT_MAX_GROUNDING_CITATIONS,
    ));
    let chat_service = Arc::new(ChatService::new(
        router,
        grounding,
        normalize_trusted_domains(&settings.citation_trusted_domains),
    ));

    let official_client = if settings.enable_official_case_sources {
        let fetcher = HttpCourtFeedFetcher::new(settings.case_search_timeout)
            .context("failed to build the court feed client")?;
        Some(Arc::new(OfficialCaseLawClient::new(
            Arc::clone(&registry),
            Arc::new(fetcher),
        )))
    } else {
        None
    };
    let canlii_client = if settings.enable_case_search {
        Some(Arc::new(
            CanLIIClient::new(
                std::env::var("CANLII_API_KEY").ok().filter(|k| !k.is_empty()),
                None,
                settings.case_search_timeout,
                CanLIIUsageLimits::default(),
                settings.allow_scaffold_synthetic_citations,
            )
            .context("failed to build the CanLII client")?,
        ))
    } else {
        None
    };

    let case_search_service = Arc::new(CaseSearchService::new(
        official_client.clone(),
        canlii_client.clone(),
    ));
    let lawyer_research_service = Arc::new(LawyerCaseResearchService::new(
        official_client,
        canlii_client,
    ));

    let request_metrics = Arc::new(RequestMetrics::default());
    // Approval tokens are process-scoped; rotating the secret on restart
    // invalidates outstanding tokens, which is the intended lifetime.
    let approval_secret = settings
        .api_bearer_token
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let export_gate = Arc::new(ExportPolicyGate::new(
        Arc::clone(&registry),
        Arc::clone(&source_policy),
        ExportApprovalSigner::new(approval_secret),
        Arc::clone(&request_metrics),
        settings.export_policy_gate_enabled,
        settings.document_require_https,
    ));

    let rate_limiter = build_rate_limiter(
        settings.rate_limit_per_minute,
        settings.redis_url.as_deref(),
    )
    .await;

    let ingestion_engine = Arc::new(IngestionEngine::new(
        Arc::clone(&registry),
        Arc::clone(&source_policy),
        fetch_policy.clone(),
        settings.runtime_environment,
        Arc::new(HttpSourceFetcher::new().context("failed to build the ingestion client")?),
    ));

    info!(
        environment = %settings.runtime_environment,
        registry_sources = registry.sources.len(),
        policy_sources = source_policy.sources.len(),
        primary_provider = settings.primary_provider.as_str(),
        checkpoint_path = %settings.ingestion_checkpoint_state_path.display(),
        "application context ready"
    );
    if !missing.is_empty() {
        info!(
            missing = missing.join(", "),
            "registry is missing production-required sources (allowed outside production)"
        );
    }

    Ok(AppContext {
        settings,
        registry,
        source_policy,
        fetch_policy,
        chat_service,
        case_search_service,
        lawyer_research_service,
        export_gate,
        rate_limiter,
        request_metrics,
        provider_metrics,
        ingestion_engine,
    })
}

/// Transparency payload for the current context; reads the checkpoint file
/// fresh on every call.
pub fn source_transparency(
    context: &AppContext,
) -> crate::services::SourceTransparencyResponse {
    crate::services::build_source_transparency_payload(
        &context.registry,
        &context.source_policy,
        context.settings.ingestion_checkpoint_state_path.as_path(),
    )
}
