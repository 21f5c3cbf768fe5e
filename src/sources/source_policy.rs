// =============================================================================
// source_policy.rs - per-source licensing and environment policy
// =============================================================================
//
// The policy document answers, for every source in the registry namespace:
// may we ingest it internally, may we ingest it in production, may answers
// cite it, and may we export its full text. Each entry records who reviewed
// the licensing terms and when.
//
// The gates return a (decision, reason) pair. The reason strings are part of
// the operational contract: they flow into ingestion reports and error
// envelopes as policy_reason values.
// =============================================================================

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RuntimeEnvironment;

pub const DEFAULT_SOURCE_POLICY_PATH: &str = "config/source_policy.yaml";

static REVIEW_DATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceClass {
    Official,
    Unofficial,
    Commercial,
}

impl std::fmt::Display for SourceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceClass::Official => write!(f, "official"),
            SourceClass::Unofficial => write!(f, "unofficial"),
            SourceClass::Commercial => write!(f, "commercial"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePolicyEntry {
    pub source_id: String,
    pub source_class: SourceClass,
    pub internal_ingest_allowed: bool,
    pub production_ingest_allowed: bool,
    pub answer_citation_allowed: bool,
    pub export_fulltext_allowed: bool,
    pub license_notes: String,
    pub review_owner: String,
    /// YYYY-MM-DD of the last licensing review.
    pub review_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePolicy {
    pub version: String,
    pub jurisdiction: String,
    pub sources: Vec<SourcePolicyEntry>,
}

#[derive(Debug, Error)]
pub enum SourcePolicyError {
    #[error("source policy not found at {0}")]
    NotFound(String),
    #[error("failed to read source policy: {0}")]
    Io(#[from] std::io::Error),
    #[error("source policy parse failed: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("source policy parse failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported source policy format for {0} (expected .json/.yaml/.yml)")]
    UnsupportedFormat(String),
    #[error("invalid source policy: {0}")]
    Invalid(String),
}

impl SourcePolicy {
    fn validate(&self) -> Result<(), SourcePolicyError> {
        if self.jurisdiction.len() != 2 || !self.jurisdiction.chars().all(|c| c.is_ascii_alphabetic())
        {
            return Err(SourcePolicyError::Invalid(format!(
                "jurisdiction must be a two-letter code, got '{}'",
                self.jurisdiction
            )));
        }

        let mut seen = HashSet::new();
        let mut duplicates: Vec<&str> = Vec::new();
        for entry in &self.sources {
            if entry.source_id.len() < 3 || entry.source_id.len() > 128 {
                return Err(SourcePolicyError::Invalid(format!(
                    "source_id '{}' must be between 3 and 128 characters",
                    entry.source_id
                )));
            }
            if !seen.insert(entry.source_id.as_str()) {
                duplicates.push(entry.source_id.as_str());
            }
            if entry.license_notes.len() < 3 {
                return Err(SourcePolicyError::Invalid(format!(
                    "license_notes for '{}' must not be empty",
                    entry.source_id
                )));
            }
            if entry.review_owner.len() < 2 {
                return Err(SourcePolicyError::Invalid(format!(
                    "review_owner for '{}' must not be empty",
                    entry.source_id
                )));
            }
            if !REVIEW_DATE_PATTERN.is_match(&entry.review_date) {
                return Err(SourcePolicyError::Invalid(format!(
                    "review_date for '{}' must be YYYY-MM-DD",
                    entry.source_id
                )));
            }
        }
        if !duplicates.is_empty() {
            duplicates.sort_unstable();
            duplicates.dedup();
            return Err(SourcePolicyError::Invalid(format!(
                "duplicate source_id values in source policy: {}",
                duplicates.join(", ")
            )));
        }
        Ok(())
    }

    pub fn get_source(&self, source_id: &str) -> Option<&SourcePolicyEntry> {
        self.sources.iter().find(|entry| entry.source_id == source_id)
    }
}

/// Load the policy document. YAML and JSON are both accepted, selected by
/// file extension.
pub fn load_source_policy(path: Option<&Path>) -> Result<SourcePolicy, SourcePolicyError> {
    let candidate = path.unwrap_or_else(|| Path::new(DEFAULT_SOURCE_POLICY_PATH));
    if !candidate.exists() {
        return Err(SourcePolicyError::NotFound(candidate.display().to_string()));
    }
    let raw = std::fs::read_to_string(candidate)?;
    let extension = candidate
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default();
    let policy: SourcePolicy = match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&raw)?,
        "json" => serde_json::from_str(&raw)?,
        _ => {
            return Err(SourcePolicyError::UnsupportedFormat(
                candidate.display().to_string(),
            ))
        }
    };
    policy.validate()?;
    Ok(policy)
}

/// Ingest gate. Unknown sources are blocked in production and allowed
/// internally; known sources follow their per-environment flags.
pub fn is_source_ingest_allowed(
    source_id: &str,
    policy: &SourcePolicy,
    environment: RuntimeEnvironment,
) -> (bool, &'static str) {
    match policy.get_source(source_id) {
        None => match environment {
            RuntimeEnvironment::Production => (false, "source_not_in_policy_for_production"),
            RuntimeEnvironment::Internal => (true, "source_not_in_policy_allowed_internal"),
        },
        Some(entry) => match environment {
            RuntimeEnvironment::Production => {
                if entry.production_ingest_allowed {
                    (true, "production_ingest_allowed")
                } else {
                    (false, "production_ingest_blocked_by_policy")
                }
            }
            RuntimeEnvironment::Internal => {
                if entry.internal_ingest_allowed {
                    (true, "internal_ingest_allowed")
                } else {
                    (false, "internal_ingest_blocked_by_policy")
                }
            }
        },
    }
}

/// Export gate. Unknown sources are never exportable.
pub fn is_source_export_allowed(source_id: &str, policy: &SourcePolicy) -> (bool, &'static str) {
    match policy.get_source(source_id) {
        None => (false, "source_not_in_policy_for_export"),
        Some(entry) => {
            if entry.export_fulltext_allowed {
                (true, "source_export_allowed")
            } else {
                (false, "source_export_blocked_by_policy")
            }
        }
    }
}
