// =============================================================================
// providers - text-generation adapters and the routing layer
// =============================================================================
//
// Every upstream generator implements the same capability: name() plus
// generate(message, citations, locale). Adapter failures collapse into a
// three-code taxonomy (rate_limit, timeout, provider_error) so the router can
// decide fallback behavior without knowing which SDK-shaped error occurred.
// =============================================================================

pub mod gemini;
pub mod openai;
pub mod router;
pub mod scaffold;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::models::{Citation, Confidence, FallbackReason};

pub use gemini::GeminiProvider;
pub use openai::OpenAIProvider;
pub use router::{Clock, ManualClock, ProviderRouter, RoutingResult, SystemClock};
pub use scaffold::ScaffoldProvider;

/// The closed error taxonomy the router understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorCode {
    RateLimit,
    Timeout,
    ProviderError,
}

impl ProviderErrorCode {
    pub fn as_fallback_reason(&self) -> FallbackReason {
        match self {
            ProviderErrorCode::RateLimit => FallbackReason::RateLimit,
            ProviderErrorCode::Timeout => FallbackReason::Timeout,
            ProviderErrorCode::ProviderError => FallbackReason::ProviderError,
        }
    }
}

impl std::fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderErrorCode::RateLimit => write!(f, "rate_limit"),
            ProviderErrorCode::Timeout => write!(f, "timeout"),
            ProviderErrorCode::ProviderError => write!(f, "provider_error"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("provider '{provider}' failed ({code}): {message}")]
pub struct ProviderError {
    pub provider: String,
    pub code: ProviderErrorCode,
    pub message: String,
}

impl ProviderError {
    pub fn new(
        provider: impl Into<String>,
        code: ProviderErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderResult {
    pub provider: String,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub confidence: Confidence,
}

/// A text generator the router can call.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        message: &str,
        citations: &[Citation],
        locale: &str,
    ) -> Result<ProviderResult, ProviderError>;
}

/// Classify an arbitrary upstream failure message into the taxonomy.
pub fn map_provider_error_message(provider: &str, message: &str) -> ProviderError {
    let lowered = message.to_lowercase();
    let code = if lowered.contains("rate") || lowered.contains("429") || lowered.contains("quota") {
        ProviderErrorCode::RateLimit
    } else if lowered.contains("timeout")
        || lowered.contains("timed out")
        || lowered.contains("deadline")
    {
        ProviderErrorCode::Timeout
    } else {
        ProviderErrorCode::ProviderError
    };
    ProviderError::new(provider, code, message)
}

/// Classify a transport-level failure. reqwest knows about timeouts directly;
/// everything else falls back to message classification.
pub fn map_transport_error(provider: &str, err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        return ProviderError::new(provider, ProviderErrorCode::Timeout, err.to_string());
    }
    map_provider_error_message(provider, &err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_classification_covers_the_taxonomy() {
        assert_eq!(
            map_provider_error_message("openai", "Rate limit reached for gpt-4o-mini").code,
            ProviderErrorCode::RateLimit
        );
        assert_eq!(
            map_provider_error_message("openai", "HTTP 429 returned").code,
            ProviderErrorCode::RateLimit
        );
        assert_eq!(
            map_provider_error_message("gemini", "quota exceeded for project").code,
            ProviderErrorCode::RateLimit
        );
        assert_eq!(
            map_provider_error_message("openai", "request timed out").code,
            ProviderErrorCode::Timeout
        );
        assert_eq!(
            map_provider_error_message("gemini", "deadline exceeded").code,
            ProviderErrorCode::Timeout
        );
        assert_eq!(
            map_provider_error_message("openai", "internal server error").code,
            ProviderErrorCode::ProviderError
        );
    }

    #[test]
    fn codes_render_as_wire_strings() {
        assert_eq!(ProviderErrorCode::RateLimit.to_string(), "rate_limit");
        assert_eq!(ProviderErrorCode::Timeout.to_string(), "timeout");
        assert_eq!(ProviderErrorCode::ProviderError.to_string(), "provider_error");
    }

    #[test]
    fn codes_map_onto_fallback_reasons() {
        assert_eq!(
            ProviderErrorCode::Timeout.as_fallback_reason(),
            FallbackReason::Timeout
        );
        assert_eq!(
            ProviderErrorCode::RateLimit.as_fallback_reason(),
            FallbackReason::RateLimit
        );
    }
}
