// =============================================================================
// registry.rs - the source registry
// =============================================================================
//
// The registry is the validated, deduplicated catalog of every source the
// service is allowed to know about: statutes, regulations, operational policy
// pages, and the court decision feeds. It is loaded once at startup and
// reloaded only by restart.
//
// Validation is strict on load. A registry that ships a duplicate source_id,
// a plain-http URL, or a jurisdiction other than "ca" is a deployment error,
// not a runtime condition.
// =============================================================================

use std::collections::HashSet;
use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical on-disk location of the Canadian immigration registry.
pub const DEFAULT_REGISTRY_PATH: &str = "data/sources/canada-immigration/registry.json";

/// Source ids that must be present in any registry promoted to production.
pub const PRODUCTION_REQUIRED_SOURCE_IDS: &[&str] = &[
    "IRPA",
    "IRPR",
    "CIT_ACT",
    "CIT_REG",
    "IRB_ID_RULES",
    "IRB_IAD_RULES",
    "IRB_RPD_RULES",
    "IRB_RAD_RULES",
    "IRCC_PDI",
    "EE_MI_CURRENT",
    "SCC_DECISIONS",
    "FC_DECISIONS",
    "FCA_DECISIONS",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Statute,
    Regulation,
    Policy,
    CaseLaw,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::Statute => write!(f, "statute"),
            SourceType::Regulation => write!(f, "regulation"),
            SourceType::Policy => write!(f, "policy"),
            SourceType::CaseLaw => write!(f, "case_law"),
        }
    }
}

/// How often a source is expected to be re-fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateCadence {
    Daily,
    Weekly,
    ScheduledIncremental,
}

impl UpdateCadence {
    /// Window inside which a checkpoint still counts as fresh. Wider than the
    /// cadence itself so one missed run does not flip the transparency page.
    pub fn freshness_window(&self) -> Duration {
        match self {
            UpdateCadence::Daily => Duration::hours(36),
            UpdateCadence::Weekly => Duration::days(9),
            UpdateCadence::ScheduledIncremental => Duration::days(40),
        }
    }
}

impl std::fmt::Display for UpdateCadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateCadence::Daily => write!(f, "daily"),
            UpdateCadence::Weekly => write!(f, "weekly"),
            UpdateCadence::ScheduledIncremental => write!(f, "scheduled_incremental"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRegistryEntry {
    pub source_id: String,
    pub source_type: SourceType,
    /// Human-readable instrument name ("Immigration and Refugee Protection Act").
    pub instrument: String,
    pub url: String,
    pub update_cadence: UpdateCadence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRegistry {
    pub version: String,
    pub jurisdiction: String,
    pub sources: Vec<SourceRegistryEntry>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("source registry not found at {0}")]
    NotFound(String),
    #[error("failed to read source registry: {0}")]
    Io(#[from] std::io::Error),
    #[error("source registry parse failed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid source registry: {0}")]
    Invalid(String),
}

impl SourceRegistry {
    /// Parse and validate a registry document.
    pub fn from_json_str(raw: &str) -> Result<Self, RegistryError> {
        let registry: SourceRegistry = serde_json::from_str(raw)?;
        registry.validate()?;
        Ok(registry)
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if self.version.len() < 3 || self.version.len() > 64 {
            return Err(RegistryError::Invalid(
                "version must be between 3 and 64 characters".into(),
            ));
        }
        if !self.jurisdiction.eq_ignore_ascii_case("ca") {
            return Err(RegistryError::Invalid(format!(
                "jurisdiction must be 'ca', got '{}'",
                self.jurisdiction
            )));
        }

        let mut seen = HashSet::new();
        for entry in &self.sources {
            if entry.source_id.len() < 3 || entry.source_id.len() > 128 {
                return Err(RegistryError::Invalid(format!(
                    "source_id '{}' must be between 3 and 128 characters",
                    entry.source_id
                )));
            }
            if !seen.insert(entry.source_id.as_str()) {
                return Err(RegistryError::Invalid(format!(
                    "duplicate source_id '{}' in registry",
                    entry.source_id
                )));
            }
            if entry.instrument.len() < 3 || entry.instrument.len() > 256 {
                return Err(RegistryError::Invalid(format!(
                    "instrument for '{}' must be between 3 and 256 characters",
                    entry.source_id
                )));
            }
            let parsed = url::Url::parse(&entry.url).map_err(|err| {
                RegistryError::Invalid(format!(
                    "url for '{}' is not an absolute URL: {err}",
                    entry.source_id
                ))
            })?;
            if parsed.scheme() != "https" {
                return Err(RegistryError::Invalid(format!(
                    "url for '{}' must be https",
                    entry.source_id
                )));
            }
        }
        Ok(())
    }

    pub fn get_source(&self, source_id: &str) -> Option<&SourceRegistryEntry> {
        self.sources.iter().find(|entry| entry.source_id == source_id)
    }

    /// Production-required ids that this registry is missing, sorted.
    pub fn missing_production_required_sources(&self) -> Vec<&'static str> {
        let present: HashSet<&str> = self.sources.iter().map(|s| s.source_id.as_str()).collect();
        let mut missing: Vec<&'static str> = PRODUCTION_REQUIRED_SOURCE_IDS
            .iter()
            .copied()
            .filter(|id| !present.contains(id))
            .collect();
        missing.sort_unstable();
        missing
    }
}

/// Load the registry from an explicit path, or the canonical location when
/// none is given.
pub fn load_source_registry(path: Option<&Path>) -> Result<SourceRegistry, RegistryError> {
    let candidate = path.unwrap_or_else(|| Path::new(DEFAULT_REGISTRY_PATH));
    if !candidate.exists() {
        return Err(RegistryError::NotFound(candidate.display().to_string()));
    }
    let raw = std::fs::read_to_string(candidate)?;
    SourceRegistry::from_json_str(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_json(sources: &str) -> String {
        format!(
            r#"{{"version": "2026-02-24", "jurisdiction": "ca", "sources": [{sources}]}}"#
        )
    }

    fn entry_json(source_id: &str, url: &str) -> String {
        format!(
            r#"{{"source_id": "{source_id}", "source_type": "statute",
                 "instrument": "Test instrument", "url": "{url}",
                 "update_cadence": "weekly"}}"#
        )
    }

    #[test]
    fn valid_registry_loads_and_indexes() {
        let raw = registry_json(&entry_json("IRPA", "https://laws-lois.justice.gc.ca/eng/acts/i-2.5/"));
        let registry = SourceRegistry::from_json_str(&raw).unwrap();
        assert_eq!(registry.sources.len(), 1);
        assert!(registry.get_source("IRPA").is_some());
        assert!(registry.get_source("IRPR").is_none());
    }

    #[test]
    fn duplicate_source_ids_are_rejected() {
        let raw = registry_json(&format!(
            "{},{}",
            entry_json("IRPA", "https://laws-lois.justice.gc.ca/a"),
            entry_json("IRPA", "https://laws-lois.justice.gc.ca/b"),
        ));
        let err = SourceRegistry::from_json_str(&raw).unwrap_err();
        assert!(err.to_string().contains("duplicate source_id"));
    }

    #[test]
    fn plain_http_urls_are_rejected() {
        let raw = registry_json(&entry_json("IRPA", "http://laws-lois.justice.gc.ca/"));
        let err = SourceRegistry::from_json_str(&raw).unwrap_err();
        assert!(err.to_string().contains("must be https"));
    }

    #[test]
    fn foreign_jurisdiction_is_rejected() {
        let raw = r#"{"version": "2026-02-24", "jurisdiction": "us", "sources": []}"#;
        let err = SourceRegistry::from_json_str(raw).unwrap_err();
        assert!(err.to_string().contains("jurisdiction"));
    }

    #[test]
    fn invalid_cadence_fails_to_parse() {
        let raw = registry_json(
            r#"{"source_id": "IRPA", "source_type": "statute",
                "instrument": "Test", "url": "https://example.gc.ca/",
                "update_cadence": "hourly"}"#,
        );
        assert!(SourceRegistry::from_json_str(&raw).is_err());
    }

    #[test]
    fn missing_production_sources_are_reported_sorted() {
        let raw = registry_json(&entry_json("IRPA", "https://laws-lois.justice.gc.ca/"));
        let registry = SourceRegistry::from_json_str(&raw).unwrap();
        let missing = registry.missing_production_required_sources();
        assert!(missing.contains(&"FC_DECISIONS"));
        assert!(!missing.contains(&"IRPA"));
        let mut sorted = missing.clone();
        sorted.sort_unstable();
        assert_eq!(missing, sorted);
    }

    #[test]
    fn freshness_windows_scale_with_cadence() {
        assert!(UpdateCadence::Daily.freshness_window() < UpdateCadence::Weekly.freshness_window());
        assert!(
            UpdateCadence::Weekly.freshness_window()
                < UpdateCadence::ScheduledIncremental.freshness_window()
        );
    }
}
