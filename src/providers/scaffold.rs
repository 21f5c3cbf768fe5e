// =============================================================================
// scaffold.rs - deterministic local provider
// =============================================================================
//
// Dev and CI environments run without upstream credentials. The scaffold
// provider answers deterministically so the full chat pipeline, including
// citation enforcement, stays exercisable offline. Startup validation refuses
// to enable it in production.
// =============================================================================

use async_trait::async_trait;

use crate::models::{Citation, Confidence};
use crate::providers::{Provider, ProviderError, ProviderResult};

pub struct ScaffoldProvider {
    /// When set, an empty citation list is backfilled with one synthetic
    /// citation so grounded-path behavior can be exercised offline. Refused
    /// in production at settings load.
    allow_synthetic_citations: bool,
}

impl ScaffoldProvider {
    pub fn new(allow_synthetic_citations: bool) -> Self {
        Self {
            allow_synthetic_citations,
        }
    }

    fn synthetic_citation() -> Citation {
        Citation {
            source_id: "IRPA".into(),
            title: "Immigration and Refugee Protection Act (scaffold)".into(),
            url: "https://laws-lois.justice.gc.ca/eng/acts/i-2.5/".into(),
            pin: "s. 11".into(),
            snippet: "Synthetic grounding produced by the scaffold provider.".into(),
        }
    }
}

#[async_trait]
impl Provider for ScaffoldProvider {
    fn name(&self) -> &str {
        "scaffold"
    }

    async fn generate(
        &self,
        message: &str,
        citations: &[Citation],
        _locale: &str,
    ) -> Result<ProviderResult, ProviderError> {
        let answer = format!(
            "Scaffold response: this environment is using deterministic fallback content. \
             Replace provider adapters with production SDK integrations. \
             Query received: {}",
            message.trim()
        );

        let citations = if citations.is_empty() && self.allow_synthetic_citations {
            vec![Self::synthetic_citation()]
        } else {
            citations.to_vec()
        };

        Ok(ProviderResult {
            provider: self.name().to_string(),
            answer,
            citations,
            confidence: Confidence::Low,
        })
    }
}
