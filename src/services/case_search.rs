// =============================================================================
// case_search.rs - official-first, licensed-fallback search policy
// =============================================================================

use std::sync::Arc;

use tracing::warn;

use crate::errors::{ApiError, ErrorCode};
use crate::models::{CaseSearchRequest, CaseSearchResponse};
use crate::sources::canlii_client::CanLIIClient;
use crate::sources::official_client::OfficialCaseLawClient;

pub struct CaseSearchService {
    official: Option<Arc<OfficialCaseLawClient>>,
    canlii: Option<Arc<CanLIIClient>>,
}

impl CaseSearchService {
    pub fn new(
        official: Option<Arc<OfficialCaseLawClient>>,
        canlii: Option<Arc<CanLIIClient>>,
    ) -> Self {
        Self { official, canlii }
    }

    pub fn has_official_client(&self) -> bool {
        self.official.is_some()
    }

    /// Official sources answer first; the licensed fallback only runs when
    /// every official source is unavailable.
    pub async fn search(&self, request: &CaseSearchRequest) -> Result<CaseSearchResponse, ApiError> {
        request.validate()?;

        if let Some(official) = &self.official {
            match official.search_cases(request).await {
                Ok(response) => return Ok(response),
                Err(err) if err.code == ErrorCode::SourceUnavailable => {
                    warn!("official case-law sources unavailable; trying licensed fallback");
                }
                Err(err) => return Err(err),
            }
        }

        if let Some(canlii) = &self.canlii {
            return canlii.search_cases(request).await;
        }

        Err(ApiError::source_unavailable(
            "Case-law sources are unavailable. Please retry later.",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::canlii_client::CanLIIUsageLimits;
    use crate::sources::official_client::CourtFeedFetcher;
    use crate::sources::registry::{
        SourceRegistry, SourceRegistryEntry, SourceType, UpdateCadence,
    };
    use async_trait::async_trait;

    struct DownFetcher;

    #[async_trait]
    impl CourtFeedFetcher for DownFetcher {
        async fn fetch(&self, source: &SourceRegistryEntry) -> Result<Vec<u8>, String> {
            Err(format!("{}: HTTP 503", source.source_id))
        }
    }

    fn registry() -> Arc<SourceRegistry> {
        Arc::new(SourceRegistry {
            version: "test".into(),
            jurisdiction: "ca".into(),
            sources: vec![SourceRegistryEntry {
                source_id: "FC_DECISIONS".into(),
                source_type: SourceType::CaseLaw,
                instrument: "FC feed".into(),
                url: "https://decisions.fct-cf.gc.ca/fc-cf/en/rss.do".into(),
                update_cadence: UpdateCadence::Daily,
            }],
        })
    }

    fn request() -> CaseSearchRequest {
        CaseSearchRequest {
            query: "procedural fairness".into(),
            jurisdiction: "ca".into(),
            court: Some("fc".into()),
            limit: 5,
        }
    }

    fn scaffold_canlii() -> Arc<CanLIIClient> {
        Arc::new(
            CanLIIClient::new(
                None,
                None,
                std::time::Duration::from_secs(1),
                CanLIIUsageLimits::default(),
                true,
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn unavailable_official_sources_fall_through_to_canlii() {
        let official = Arc::new(OfficialCaseLawClient::new(registry(), Arc::new(DownFetcher)));
        let service = CaseSearchService::new(Some(official), Some(scaffold_canlii()));

        let response = service.search(&request()).await.unwrap();
        assert!(!response.results.is_empty());
        assert!(response.results[0].title.starts_with("Scaffold Case"));
    }

    #[tokio::test]
    async fn no_clients_configured_is_source_unavailable() {
        let service = CaseSearchService::new(None, None);
        let err = service.search(&request()).await.unwrap_err();
        assert_eq!(err.status_code(), 503);
    }

    #[tokio::test]
    async fn invalid_request_is_rejected_before_any_fetch() {
        let service = CaseSearchService::new(None, Some(scaffold_canlii()));
        let mut invalid = request();
        invalid.query = "x".into();
        let err = service.search(&invalid).await.unwrap_err();
        assert_eq!(err.status_code(), 422);
    }
}
