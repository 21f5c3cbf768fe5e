// =============================================================================
// fetch_policy.rs - per-source fetch behavior
// =============================================================================
//
// Operators tune ingestion per source through a small YAML document: one
// default rule plus overrides keyed by source_id. Parsing is forgiving on
// purpose. A malformed or out-of-range field falls back to the default for
// that field alone, so one typo cannot take a source's whole override down
// with it.
//
// max_retries counts retries, not attempts: zero retries still means exactly
// one attempt.
// =============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_FETCH_POLICY_PATH: &str = "config/fetch_policy.yaml";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchPolicyRule {
    pub timeout_seconds: f64,
    pub max_retries: u32,
    pub retry_backoff_seconds: f64,
}

impl FetchPolicyRule {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds)
    }

    /// Exponential backoff before retry `attempt` (0-based).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt.min(16) as i32);
        Duration::from_secs_f64(self.retry_backoff_seconds * factor)
    }
}

#[derive(Debug, Clone)]
pub struct SourceFetchPolicy {
    default: FetchPolicyRule,
    by_source: BTreeMap<String, FetchPolicyRule>,
}

impl SourceFetchPolicy {
    pub fn with_default(default: FetchPolicyRule) -> Self {
        Self {
            default,
            by_source: BTreeMap::new(),
        }
    }

    pub fn for_source(&self, source_id: &str) -> FetchPolicyRule {
        self.by_source
            .get(source_id)
            .copied()
            .unwrap_or(self.default)
    }

    pub fn default_rule(&self) -> FetchPolicyRule {
        self.default
    }
}

#[derive(Debug, Error)]
pub enum FetchPolicyError {
    #[error("fetch policy file not found: {0}")]
    NotFound(String),
    #[error("failed to read fetch policy: {0}")]
    Io(#[from] std::io::Error),
    #[error("fetch policy parse failed: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("fetch policy 'sources' must be an object keyed by source_id")]
    SourcesNotAMap,
}

#[derive(Debug, Default, Deserialize)]
struct RawFetchPolicyDoc {
    #[serde(default)]
    default: Option<serde_yaml::Value>,
    #[serde(default)]
    sources: Option<serde_yaml::Value>,
}

fn baseline_rule(default_timeout_seconds: f64) -> FetchPolicyRule {
    FetchPolicyRule {
        timeout_seconds: default_timeout_seconds.max(1.0),
        max_retries: 1,
        retry_backoff_seconds: 0.5,
    }
}

fn value_as_f64(value: &serde_yaml::Value) -> Option<f64> {
    match value {
        serde_yaml::Value::Number(number) => number.as_f64(),
        serde_yaml::Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_u32(value: &serde_yaml::Value) -> Option<u32> {
    match value {
        serde_yaml::Value::Number(number) => number
            .as_i64()
            .and_then(|n| u32::try_from(n).ok())
            .or_else(|| number.as_f64().filter(|f| *f >= 0.0).map(|f| f as u32)),
        serde_yaml::Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_positive_f64(raw: Option<&serde_yaml::Value>, fallback: f64) -> f64 {
    raw.and_then(value_as_f64)
        .filter(|value| *value > 0.0)
        .unwrap_or(fallback)
}

fn coerce_nonnegative_f64(raw: Option<&serde_yaml::Value>, fallback: f64) -> f64 {
    raw.and_then(value_as_f64)
        .filter(|value| *value >= 0.0)
        .unwrap_or(fallback)
}

fn coerce_nonnegative_u32(raw: Option<&serde_yaml::Value>, fallback: u32) -> u32 {
    raw.and_then(value_as_u32).unwrap_or(fallback)
}

/// Field-wise rule parse: every field independently falls back to the given
/// default when missing or invalid.
fn parse_rule(raw: Option<&serde_yaml::Value>, fallback: FetchPolicyRule) -> FetchPolicyRule {
    let Some(serde_yaml::Value::Mapping(map)) = raw else {
        return fallback;
    };
    let field = |name: &str| map.get(serde_yaml::Value::String(name.to_string()));
    FetchPolicyRule {
        timeout_seconds: coerce_positive_f64(field("timeout_seconds"), fallback.timeout_seconds),
        max_retries: coerce_nonnegative_u32(field("max_retries"), fallback.max_retries),
        retry_backoff_seconds: coerce_nonnegative_f64(
            field("retry_backoff_seconds"),
            fallback.retry_backoff_seconds,
        ),
    }
}

fn parse_fetch_policy_str(
    raw: &str,
    default_timeout_seconds: f64,
) -> Result<SourceFetchPolicy, FetchPolicyError> {
    let parsed: serde_yaml::Value = serde_yaml::from_str(raw)?;
    let document: RawFetchPolicyDoc = match parsed {
        serde_yaml::Value::Null => RawFetchPolicyDoc::default(),
        other => serde_yaml::from_value(other)?,
    };
    let default = parse_rule(document.default.as_ref(), baseline_rule(default_timeout_seconds));

    let mut by_source = BTreeMap::new();
    match document.sources {
        None | Some(serde_yaml::Value::Null) => {}
        Some(serde_yaml::Value::Mapping(sources)) => {
            for (key, value) in &sources {
                let Some(source_id) = key.as_str().map(str::trim).filter(|id| !id.is_empty())
                else {
                    continue;
                };
                by_source.insert(source_id.to_string(), parse_rule(Some(value), default));
            }
        }
        Some(_) => return Err(FetchPolicyError::SourcesNotAMap),
    }

    debug!(
        overrides = by_source.len(),
        timeout_seconds = default.timeout_seconds,
        "fetch policy loaded"
    );
    Ok(SourceFetchPolicy { default, by_source })
}

/// Load the fetch policy. A missing file at the canonical location yields the
/// baseline defaults; a missing file at an explicit path is an error.
pub fn load_fetch_policy(
    path: Option<&Path>,
    default_timeout_seconds: f64,
) -> Result<SourceFetchPolicy, FetchPolicyError> {
    let (candidate, explicit) = match path {
        Some(path) => (path, true),
        None => (Path::new(DEFAULT_FETCH_POLICY_PATH), false),
    };

    if !candidate.exists() {
        if explicit {
            return Err(FetchPolicyError::NotFound(candidate.display().to_string()));
        }
        return Ok(SourceFetchPolicy::with_default(baseline_rule(
            default_timeout_seconds,
        )));
    }

    let raw = std::fs::read_to_string(candidate)?;
    parse_fetch_policy_str(&raw, default_timeout_seconds)
}
