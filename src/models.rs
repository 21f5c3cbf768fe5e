// =============================================================================
// models.rs - request/response data structures
// =============================================================================
//
// The wire shapes consumed by the external HTTP adapter. Schema validation at
// the framework boundary is a collaborator concern; the invariants that the
// core itself depends on (length bounds, limit ranges, date ordering) are
// re-checked here via the validate() methods so the services never trust the
// adapter blindly.
// =============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::ApiError;

/// Confidence attached to a chat answer or research result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confidence::Low => write!(f, "low"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::High => write!(f, "high"),
        }
    }
}

/// Why a non-primary provider (or no provider at all) produced the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    Timeout,
    RateLimit,
    PolicyBlock,
    ProviderError,
}

/// Supported response locales. Canadian English and Canadian French only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatLocale {
    #[serde(rename = "en-CA")]
    EnCa,
    #[serde(rename = "fr-CA")]
    FrCa,
}

impl Default for ChatLocale {
    fn default() -> Self {
        ChatLocale::EnCa
    }
}

impl std::fmt::Display for ChatLocale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatLocale::EnCa => write!(f, "en-CA"),
            ChatLocale::FrCa => write!(f, "fr-CA"),
        }
    }
}

/// Chat mode. A single mode today; the enum keeps the wire contract explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    #[default]
    Standard,
}

impl std::fmt::Display for ChatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatMode::Standard => write!(f, "standard"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
    #[serde(default)]
    pub locale: ChatLocale,
    #[serde(default)]
    pub mode: ChatMode,
}

impl ChatRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.session_id.len() < 8 || self.session_id.len() > 128 {
            return Err(ApiError::validation(
                "session_id must be between 8 and 128 characters",
            ));
        }
        if self.message.is_empty() || self.message.len() > 8000 {
            return Err(ApiError::validation(
                "message must be between 1 and 8000 characters",
            ));
        }
        Ok(())
    }
}

/// A grounding citation: the proof that an answer traces back to an
/// authoritative source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub source_id: String,
    pub title: String,
    pub url: String,
    /// Section/paragraph locator within the source ("s. 11", "para 23", "n/a").
    pub pin: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackUsed {
    pub used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FallbackReason>,
}

impl FallbackUsed {
    pub fn none() -> Self {
        Self {
            used: false,
            provider: None,
            reason: None,
        }
    }

    pub fn policy_block() -> Self {
        Self {
            used: false,
            provider: None,
            reason: Some(FallbackReason::PolicyBlock),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub confidence: Confidence,
    pub disclaimer: String,
    pub fallback_used: FallbackUsed,
}

// =============================================================================
// Case-law search
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseSearchRequest {
    pub query: String,
    #[serde(default = "default_jurisdiction")]
    pub jurisdiction: String,
    #[serde(default)]
    pub court: Option<String>,
    #[serde(default = "default_case_search_limit")]
    pub limit: usize,
}

fn default_jurisdiction() -> String {
    "ca".to_string()
}

fn default_case_search_limit() -> usize {
    10
}

impl CaseSearchRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.query.len() < 2 || self.query.len() > 300 {
            return Err(ApiError::validation(
                "query must be between 2 and 300 characters",
            ));
        }
        if self.jurisdiction.len() > 16 {
            return Err(ApiError::validation("jurisdiction must be at most 16 characters"));
        }
        if let Some(court) = &self.court {
            if court.len() > 32 {
                return Err(ApiError::validation("court must be at most 32 characters"));
            }
        }
        if self.limit < 1 || self.limit > 25 {
            return Err(ApiError::validation("limit must be between 1 and 25"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseSearchResult {
    pub case_id: String,
    pub title: String,
    pub citation: String,
    pub decision_date: NaiveDate,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseSearchResponse {
    pub results: Vec<CaseSearchResult>,
}

// =============================================================================
// Case export
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseExportRequest {
    pub source_id: String,
    pub case_id: String,
    #[serde(default)]
    pub document_url: Option<String>,
    #[serde(default = "default_export_format")]
    pub format: String,
    #[serde(default)]
    pub user_approved: bool,
    #[serde(default)]
    pub approval_token: Option<String>,
}

fn default_export_format() -> String {
    "pdf".to_string()
}

impl CaseExportRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.source_id.len() < 2 || self.source_id.len() > 128 {
            return Err(ApiError::validation(
                "source_id must be between 2 and 128 characters",
            ));
        }
        if self.case_id.is_empty() || self.case_id.len() > 256 {
            return Err(ApiError::validation(
                "case_id must be between 1 and 256 characters",
            ));
        }
        if self.format != "pdf" {
            return Err(ApiError::validation("format must be 'pdf'"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportApprovalRequest {
    pub source_id: String,
    pub case_id: String,
    pub document_url: String,
    pub user_approved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportApprovalResponse {
    pub approval_token: String,
}

// =============================================================================
// Lawyer case research
// =============================================================================

/// Structured intake a lawyer can attach to sharpen the research pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LawyerResearchIntake {
    #[serde(default)]
    pub objective: Option<String>,
    #[serde(default)]
    pub target_court: Option<String>,
    #[serde(default)]
    pub procedural_posture: Option<String>,
    #[serde(default)]
    pub issue_tags: Vec<String>,
    #[serde(default)]
    pub anchor_citations: Vec<String>,
    #[serde(default)]
    pub fact_keywords: Vec<String>,
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
}

impl LawyerResearchIntake {
    pub fn validate(&self) -> Result<(), ApiError> {
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(ApiError::validation("date_from must not be after date_to"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LawyerCaseResearchRequest {
    pub session_id: String,
    pub matter_summary: String,
    #[serde(default = "default_jurisdiction")]
    pub jurisdiction: String,
    #[serde(default)]
    pub intake: Option<LawyerResearchIntake>,
    #[serde(default = "default_research_limit")]
    pub limit: usize,
}

fn default_research_limit() -> usize {
    5
}

impl LawyerCaseResearchRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.session_id.len() < 8 || self.session_id.len() > 128 {
            return Err(ApiError::validation(
                "session_id must be between 8 and 128 characters",
            ));
        }
        if self.matter_summary.len() < 2 || self.matter_summary.len() > 2000 {
            return Err(ApiError::validation(
                "matter_summary must be between 2 and 2000 characters",
            ));
        }
        if self.limit < 1 || self.limit > 25 {
            return Err(ApiError::validation("limit must be between 1 and 25"));
        }
        if let Some(intake) = &self.intake {
            intake.validate()?;
        }
        Ok(())
    }
}

/// Whether a decision's full document can be fetched from a trusted host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PdfStatus {
    Available,
    Unavailable,
}

/// One supporting case in a research response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LawyerCaseSupport {
    pub case_id: String,
    pub title: String,
    pub citation: String,
    pub court: String,
    pub decision_date: NaiveDate,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,
    pub pdf_status: PdfStatus,
    pub relevance_reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Profile extracted from the matter summary by the research planner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatterProfile {
    pub issue_tags: Vec<String>,
    pub target_court: Option<String>,
    pub procedural_posture: Option<String>,
    pub fact_keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStatus {
    /// "ok" | "unavailable"
    pub official: String,
    /// "ok" | "not_used" | "unavailable"
    pub canlii: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LawyerCaseResearchResponse {
    pub matter_profile: MatterProfile,
    pub cases: Vec<LawyerCaseSupport>,
    pub source_status: SourceStatus,
    pub research_confidence: Confidence,
    pub confidence_reasons: Vec<String>,
    /// "low" | "medium" | "high"
    pub intake_completeness: String,
    pub intake_hints: Vec<String>,
}

// =============================================================================
// Source transparency
// =============================================================================

/// Derived freshness of an ingested source, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFreshnessStatus {
    Fresh,
    Stale,
    Missing,
}

impl std::fmt::Display for SourceFreshnessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFreshnessStatus::Fresh => write!(f, "fresh"),
            SourceFreshnessStatus::Stale => write!(f, "stale"),
            SourceFreshnessStatus::Missing => write!(f, "missing"),
        }
    }
}
