// =============================================================================
// config.rs - runtime configuration
// =============================================================================
//
// Every tunable parameter in the service lives here, loaded once at startup.
// All values can be overridden via environment variables, named exactly as
// the deployment documentation lists them (ENVIRONMENT, API_BEARER_TOKEN,
// PROVIDER_CIRCUIT_BREAKER_FAILURE_THRESHOLD, ...).
//
// Production hardening is enforced at load time: a hardened environment
// requires a bearer token for the ops surface and refuses to start with the
// scaffold provider or synthetic citations enabled.
// =============================================================================

use std::env;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

/// Environments matching this pattern are treated as hardened (production
/// policy gates apply). Everything else is internal.
static HARDENED_ENVIRONMENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(production|prod|ci)(?:[-_].+)?$").unwrap());

/// Runtime environment class derived from the ENVIRONMENT variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeEnvironment {
    Production,
    Internal,
}

impl std::fmt::Display for RuntimeEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeEnvironment::Production => write!(f, "production"),
            RuntimeEnvironment::Internal => write!(f, "internal"),
        }
    }
}

/// Classify a raw ENVIRONMENT value. `production`, `prod`, and `ci` (with
/// optional `-suffix`/`_suffix`) are hardened; anything else, including an
/// unset value, is internal.
pub fn normalize_runtime_environment(environment: Option<&str>) -> RuntimeEnvironment {
    let normalized = environment.unwrap_or("development").trim().to_lowercase();
    if HARDENED_ENVIRONMENT_PATTERN.is_match(&normalized) {
        RuntimeEnvironment::Production
    } else {
        RuntimeEnvironment::Internal
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("API_BEARER_TOKEN is required when ENVIRONMENT is production")]
    MissingBearerToken,
    #[error("ENABLE_SCAFFOLD_PROVIDER must be false in production")]
    ScaffoldProviderInProduction,
    #[error("ALLOW_SCAFFOLD_SYNTHETIC_CITATIONS must be false in production")]
    SyntheticCitationsInProduction,
    #[error("PRIMARY_PROVIDER must be one of: openai, gemini (got '{0}')")]
    InvalidPrimaryProvider(String),
}

/// Resolved service configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Raw ENVIRONMENT value, kept for logging and policy-gate reasons.
    pub environment: String,
    /// Derived environment class. Policy gates key off this, never the raw value.
    pub runtime_environment: RuntimeEnvironment,

    /// Bearer token guarding /ops/metrics. Required in production.
    pub api_bearer_token: Option<String>,

    // Provider credentials and model selection
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    /// Ordered Gemini models to try after the configured one.
    pub gemini_fallback_models: Vec<String>,
    /// Which provider the router treats as primary: "openai" or "gemini".
    pub primary_provider: String,
    /// Deterministic local provider for dev/test. Never enabled in production.
    pub enable_scaffold_provider: bool,
    /// Whether the scaffold provider may invent citations. Never in production.
    pub allow_scaffold_synthetic_citations: bool,

    // Feature gates
    pub enable_case_search: bool,
    pub enable_official_case_sources: bool,
    pub export_policy_gate_enabled: bool,
    pub document_require_https: bool,

    // Circuit breaker tuning
    pub provider_circuit_breaker_failure_threshold: u32,
    pub provider_circuit_breaker_open_seconds: f64,

    // Per-provider HTTP behavior
    pub provider_timeout: Duration,
    pub provider_max_retries: u32,

    // Rate limiting
    pub redis_url: Option<String>,
    pub rate_limit_per_minute: u32,

    // Ingestion
    pub ingestion_checkpoint_state_path: PathBuf,

    /// Trusted citation domains for hardened mode. Empty disables the filter.
    pub citation_trusted_domains: Vec<String>,

    /// Public base URL of this API deployment, used in operator-facing output.
    pub api_base_url: String,

    /// Per-source timeout for the case-law fan-out.
    pub case_search_timeout: Duration,

    /// Port for the operational endpoint server (/healthz, /ops/metrics).
    pub ops_port: u16,
}

impl Settings {
    /// Load configuration from environment variables with documented defaults.
    /// Reads a .env file first when one exists; missing files are fine.
    pub fn from_env() -> Result<Self, SettingsError> {
        let _ = dotenvy::dotenv();

        let environment = env_or_default("ENVIRONMENT", "development");
        let runtime_environment = normalize_runtime_environment(Some(&environment));

        let api_bearer_token = env_nonempty("API_BEARER_TOKEN");
        if runtime_environment == RuntimeEnvironment::Production && api_bearer_token.is_none() {
            return Err(SettingsError::MissingBearerToken);
        }

        let enable_scaffold_provider = env_bool("ENABLE_SCAFFOLD_PROVIDER", false);
        let allow_scaffold_synthetic_citations =
            env_bool("ALLOW_SCAFFOLD_SYNTHETIC_CITATIONS", false);
        if runtime_environment == RuntimeEnvironment::Production {
            if enable_scaffold_provider {
                return Err(SettingsError::ScaffoldProviderInProduction);
            }
            if allow_scaffold_synthetic_citations {
                return Err(SettingsError::SyntheticCitationsInProduction);
            }
        }

        let primary_provider = env_or_default("PRIMARY_PROVIDER", "openai").to_lowercase();
        if primary_provider != "openai" && primary_provider != "gemini" {
            return Err(SettingsError::InvalidPrimaryProvider(primary_provider));
        }

        Ok(Settings {
            environment,
            runtime_environment,
            api_bearer_token,
            openai_api_key: env_nonempty("OPENAI_API_KEY"),
            openai_model: env_or_default("OPENAI_MODEL", "gpt-4o-mini"),
            gemini_api_key: env_nonempty("GEMINI_API_KEY"),
            gemini_model: env_or_default("GEMINI_MODEL", "gemini-2.0-flash"),
            gemini_fallback_models: env_list(
                "GEMINI_FALLBACK_MODELS",
                &["gemini-2.0-flash-lite", "gemini-1.5-flash"],
            ),
            primary_provider,
            enable_scaffold_provider,
            allow_scaffold_synthetic_citations,
            enable_case_search: env_bool("ENABLE_CASE_SEARCH", true),
            enable_official_case_sources: env_bool("ENABLE_OFFICIAL_CASE_SOURCES", true),
            export_policy_gate_enabled: env_bool("EXPORT_POLICY_GATE_ENABLED", true),
            document_require_https: env_bool("DOCUMENT_REQUIRE_HTTPS", true),
            provider_circuit_breaker_failure_threshold: env_parse(
                "PROVIDER_CIRCUIT_BREAKER_FAILURE_THRESHOLD",
                3u32,
            )
            .max(1),
            provider_circuit_breaker_open_seconds: positive_or(
                env_parse("PROVIDER_CIRCUIT_BREAKER_OPEN_SECONDS", 30.0f64),
                30.0,
            ),
            provider_timeout: Duration::from_secs_f64(positive_or(
                env_parse("PROVIDER_TIMEOUT_SECONDS", 20.0f64),
                20.0,
            )),
            provider_max_retries: env_parse("PROVIDER_MAX_RETRIES", 1u32),
            redis_url: env_nonempty("REDIS_URL"),
            rate_limit_per_minute: env_parse("RATE_LIMIT_PER_MINUTE", 60u32).max(1),
            ingestion_checkpoint_state_path: PathBuf::from(env_or_default(
                "INGESTION_CHECKPOINT_STATE_PATH",
                ".cache/immcad/ingestion-checkpoints.json",
            )),
            citation_trusted_domains: env_list("CITATION_TRUSTED_DOMAINS", &[]),
            api_base_url: env_or_default("IMMCAD_API_BASE_URL", "http://127.0.0.1:8000"),
            case_search_timeout: Duration::from_secs_f64(positive_or(
                env_parse("CASE_SEARCH_TIMEOUT_SECONDS", 8.0f64),
                8.0,
            )),
            ops_port: env_parse("OPS_PORT", 9090u16),
        })
    }

    pub fn is_production(&self) -> bool {
        self.runtime_environment == RuntimeEnvironment::Production
    }
}

/// Read an environment variable with a default fallback.
fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read an environment variable, treating unset and empty alike.
fn env_nonempty(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

/// Parse a boolean flag: 1/true/yes/on (any case) are true.
fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

/// Parse a typed value, falling back to the default on any parse failure.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

/// Comma-separated list; entries are trimmed, empties dropped.
fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(value) => value
            .split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect(),
        Err(_) => default.iter().map(|item| item.to_string()).collect(),
    }
}

fn positive_or(value: f64, fallback: f64) -> f64 {
    if value > 0.0 {
        value
    } else {
        fallback
    }
}
