// =============================================================================
// errors.rs - API error taxonomy and wire envelope
// =============================================================================
//
// Every failure the service surfaces to a caller is one of six codes, each
// with a fixed HTTP status. The envelope always carries the trace id, and a
// policy_reason is attached whenever a policy predicate made the decision
// (for example case_search_query_too_broad or production_ingest_blocked_by_policy).
// =============================================================================

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire-level error code. The set is closed; collaborating frontends switch
/// on these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    ProviderError,
    SourceUnavailable,
    PolicyBlocked,
    RateLimited,
    Unauthorized,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::ValidationError => write!(f, "VALIDATION_ERROR"),
            ErrorCode::ProviderError => write!(f, "PROVIDER_ERROR"),
            ErrorCode::SourceUnavailable => write!(f, "SOURCE_UNAVAILABLE"),
            ErrorCode::PolicyBlocked => write!(f, "POLICY_BLOCKED"),
            ErrorCode::RateLimited => write!(f, "RATE_LIMITED"),
            ErrorCode::Unauthorized => write!(f, "UNAUTHORIZED"),
        }
    }
}

/// Service-level error. The HTTP adapter maps this onto a status code and the
/// JSON envelope below.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    /// Set when a policy predicate caused the decision.
    pub policy_reason: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            policy_reason: None,
        }
    }

    pub fn with_policy_reason(mut self, reason: impl Into<String>) -> Self {
        self.policy_reason = Some(reason.into());
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProviderError, message)
    }

    pub fn source_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SourceUnavailable, message)
    }

    pub fn policy_blocked(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PolicyBlocked, message)
    }

    pub fn rate_limited() -> Self {
        Self::new(ErrorCode::RateLimited, "Rate limit exceeded")
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorCode::Unauthorized, "Unauthorized")
    }

    /// HTTP status the adapter should answer with.
    pub fn status_code(&self) -> u16 {
        match self.code {
            ErrorCode::ValidationError => 422,
            ErrorCode::PolicyBlocked => 422,
            ErrorCode::RateLimited => 429,
            ErrorCode::Unauthorized => 401,
            ErrorCode::SourceUnavailable => 503,
            ErrorCode::ProviderError => 502,
        }
    }

    /// Build the wire envelope for this error.
    pub fn to_envelope(&self, trace_id: &str) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorBody {
                code: self.code,
                message: self.message.clone(),
                trace_id: trace_id.to_string(),
                policy_reason: self.policy_reason.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}
