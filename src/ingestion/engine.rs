// =============================================================================
// engine.rs - the incremental ingestion engine
// =============================================================================
//
// One run walks a selection of registry sources and brings their checkpoints
// up to date:
//
//   select (cadence or explicit ids) -> policy gate -> conditional GET
//     -> outcome classification -> checkpoint update -> single atomic flush
//
// Failure isolation is the rule: a source that is blocked, unreachable, or
// serving garbage gets its outcome recorded and the batch moves on. Transient
// failures (transport errors, 5xx) retry with exponential backoff; client
// errors do not. Zero max_retries still means one attempt.
// =============================================================================

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::RuntimeEnvironment;
use crate::ingestion::checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
use crate::ingestion::fetch_policy::SourceFetchPolicy;
use crate::sources::registry::{SourceRegistry, SourceRegistryEntry, UpdateCadence};
use crate::sources::source_policy::{is_source_ingest_allowed, SourcePolicy};

/// Conditional-request inputs for one fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchContext {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub timeout: Duration,
}

/// What came back from one fetch. payload is None on 304.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub http_status: u16,
    pub payload: Option<Vec<u8>>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),
}

/// Capability to fetch one source. Production uses HTTP; tests inject fakes.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(
        &self,
        source: &SourceRegistryEntry,
        context: &FetchContext,
    ) -> Result<FetchResult, FetchError>;
}

pub struct HttpSourceFetcher {
    client: reqwest::Client,
}

impl HttpSourceFetcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        // No client-level timeout: each request carries the per-source value.
        let client = reqwest::Client::builder()
            .user_agent("immcad-api/0.1 (source-ingestion)")
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SourceFetcher for HttpSourceFetcher {
    async fn fetch(
        &self,
        source: &SourceRegistryEntry,
        context: &FetchContext,
    ) -> Result<FetchResult, FetchError> {
        let mut request = self.client.get(&source.url).timeout(context.timeout);
        if let Some(etag) = &context.etag {
            request = request.header(reqwest::header::IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &context.last_modified {
            request = request.header(reqwest::header::IF_MODIFIED_SINCE, last_modified);
        }

        let response = request
            .send()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        let http_status = response.status().as_u16();
        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(|value| value.to_string())
        };
        let etag = header(reqwest::header::ETAG);
        let last_modified = header(reqwest::header::LAST_MODIFIED);

        let payload = if http_status == 304 {
            None
        } else {
            Some(
                response
                    .bytes()
                    .await
                    .map_err(|err| FetchError::Transport(err.to_string()))?
                    .to_vec(),
            )
        };

        Ok(FetchResult {
            http_status,
            payload,
            etag,
            last_modified,
        })
    }
}

/// Final classification for one source in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    Updated,
    UnchangedBody,
    NotModified,
    Blocked,
    Failed,
}

impl std::fmt::Display for IngestOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestOutcome::Updated => write!(f, "updated"),
            IngestOutcome::UnchangedBody => write!(f, "unchanged_body"),
            IngestOutcome::NotModified => write!(f, "not_modified"),
            IngestOutcome::Blocked => write!(f, "blocked"),
            IngestOutcome::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceIngestRecord {
    pub source_id: String,
    pub outcome: IngestOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub cadence: String,
    pub total: usize,
    /// 2xx outcomes: updated plus unchanged_body.
    pub succeeded: usize,
    pub not_modified: usize,
    pub blocked: usize,
    pub failed: usize,
    pub unchanged_body: usize,
    pub records: Vec<SourceIngestRecord>,
}

impl IngestionReport {
    fn new(cadence: String) -> Self {
        Self {
            cadence,
            total: 0,
            succeeded: 0,
            not_modified: 0,
            blocked: 0,
            failed: 0,
            unchanged_body: 0,
            records: Vec::new(),
        }
    }

    fn push(&mut self, record: SourceIngestRecord) {
        self.total += 1;
        match record.outcome {
            IngestOutcome::Updated => self.succeeded += 1,
            IngestOutcome::UnchangedBody => {
                self.succeeded += 1;
                self.unchanged_body += 1;
            }
            IngestOutcome::NotModified => self.not_modified += 1,
            IngestOutcome::Blocked => self.blocked += 1,
            IngestOutcome::Failed => self.failed += 1,
        }
        self.records.push(record);
    }
}

/// Cadence -> sorted source ids, derived from the registry. The scheduler and
/// operational tooling both consume this.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionPlan {
    pub jurisdiction: String,
    pub version: String,
    pub cadence_to_sources: BTreeMap<String, Vec<String>>,
}

pub fn build_ingestion_plan(registry: &SourceRegistry) -> IngestionPlan {
    let mut cadence_to_sources: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for source in &registry.sources {
        cadence_to_sources
            .entry(source.update_cadence.to_string())
            .or_default()
            .push(source.source_id.clone());
    }
    for sources in cadence_to_sources.values_mut() {
        sources.sort();
    }
    IngestionPlan {
        jurisdiction: registry.jurisdiction.to_lowercase(),
        version: registry.version.clone(),
        cadence_to_sources,
    }
}

pub struct IngestionEngine {
    registry: Arc<SourceRegistry>,
    policy: Arc<SourcePolicy>,
    fetch_policy: SourceFetchPolicy,
    environment: RuntimeEnvironment,
    fetcher: Arc<dyn SourceFetcher>,
}

impl IngestionEngine {
    pub fn new(
        registry: Arc<SourceRegistry>,
        policy: Arc<SourcePolicy>,
        fetch_policy: SourceFetchPolicy,
        environment: RuntimeEnvironment,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Self {
        Self {
            registry,
            policy,
            fetch_policy,
            environment,
            fetcher,
        }
    }

    /// Run one ingestion batch. Sources are processed sequentially; the
    /// checkpoint store is flushed once at the end.
    pub async fn run(
        &self,
        store: &mut CheckpointStore,
        cadence: Option<UpdateCadence>,
        source_ids: Option<&[String]>,
    ) -> Result<IngestionReport, CheckpointError> {
        let cadence_label = cadence
            .map(|value| value.to_string())
            .unwrap_or_else(|| "all".to_string());
        let mut report = IngestionReport::new(cadence_label.clone());

        let explicit: Option<HashSet<&str>> =
            source_ids.map(|ids| ids.iter().map(String::as_str).collect());

        let selected: Vec<&SourceRegistryEntry> = self
            .registry
            .sources
            .iter()
            .filter(|entry| match (&explicit, cadence) {
                (Some(ids), _) => ids.contains(entry.source_id.as_str()),
                (None, Some(cadence)) => entry.update_cadence == cadence,
                (None, None) => true,
            })
            .collect();

        info!(
            cadence = cadence_label.as_str(),
            selected = selected.len(),
            environment = %self.environment,
            "ingestion run starting"
        );

        for entry in selected {
            let record = self.process_source(store, entry).await;
            debug!(
                source_id = record.source_id.as_str(),
                outcome = %record.outcome,
                attempts = record.attempts,
                "source processed"
            );
            report.push(record);
        }

        store.save()?;

        info!(
            cadence = report.cadence.as_str(),
            total = report.total,
            succeeded = report.succeeded,
            not_modified = report.not_modified,
            blocked = report.blocked,
            failed = report.failed,
            "ingestion run complete"
        );
        Ok(report)
    }

    async fn process_source(
        &self,
        store: &mut CheckpointStore,
        entry: &SourceRegistryEntry,
    ) -> SourceIngestRecord {
        let (allowed, reason) =
            is_source_ingest_allowed(&entry.source_id, &self.policy, self.environment);
        if !allowed {
            return SourceIngestRecord {
                source_id: entry.source_id.clone(),
                outcome: IngestOutcome::Blocked,
                http_status: None,
                policy_reason: Some(reason.to_string()),
                error: None,
                attempts: 0,
            };
        }

        let rule = self.fetch_policy.for_source(&entry.source_id);
        let prior = store.get(&entry.source_id).cloned();
        let context = FetchContext {
            etag: prior.as_ref().and_then(|cp| cp.etag.clone()),
            last_modified: prior.as_ref().and_then(|cp| cp.last_modified.clone()),
            timeout: rule.timeout(),
        };

        let mut attempts = 0u32;
        let mut last_error: Option<String> = None;
        let mut last_status: Option<u16> = None;

        // max_retries counts retries: attempt indices run 0..=max_retries.
        for attempt in 0..=rule.max_retries {
            attempts += 1;
            let retryable_failure = match self.fetcher.fetch(entry, &context).await {
                Err(err) => {
                    last_error = Some(err.to_string());
                    true
                }
                Ok(result) => match result.http_status {
                    304 => {
                        store.update_with(&entry.source_id, |checkpoint| {
                            checkpoint.last_http_status = Some(304);
                            checkpoint.last_success_at = Some(chrono::Utc::now());
                        });
                        return SourceIngestRecord {
                            source_id: entry.source_id.clone(),
                            outcome: IngestOutcome::NotModified,
                            http_status: Some(304),
                            policy_reason: None,
                            error: None,
                            attempts,
                        };
                    }
                    status @ 200..=299 => {
                        let payload = result.payload.unwrap_or_default();
                        let checksum = format!("{:x}", Sha256::digest(&payload));
                        let unchanged = prior
                            .as_ref()
                            .and_then(|cp| cp.checksum_sha256.as_deref())
                            .map(|previous| previous == checksum)
                            .unwrap_or(false);
                        store.upsert(
                            &entry.source_id,
                            Checkpoint {
                                etag: result.etag.clone(),
                                last_modified: result.last_modified.clone(),
                                checksum_sha256: Some(checksum),
                                last_http_status: Some(status),
                                last_success_at: Some(chrono::Utc::now()),
                            },
                        );
                        let outcome = if unchanged {
                            IngestOutcome::UnchangedBody
                        } else {
                            IngestOutcome::Updated
                        };
                        return SourceIngestRecord {
                            source_id: entry.source_id.clone(),
                            outcome,
                            http_status: Some(status),
                            policy_reason: None,
                            error: None,
                            attempts,
                        };
                    }
                    status @ 500..=599 => {
                        last_error = Some(format!("HTTP {status}"));
                        last_status = Some(status);
                        true
                    }
                    status => {
                        // Client errors are deterministic; retrying will not help.
                        last_error = Some(format!("HTTP {status}"));
                        last_status = Some(status);
                        false
                    }
                },
            };

            if !retryable_failure {
                break;
            }
            if attempt < rule.max_retries {
                let backoff = rule.backoff_for_attempt(attempt);
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        warn!(
            source_id = entry.source_id.as_str(),
            attempts,
            error = last_error.as_deref().unwrap_or("unknown"),
            "source ingestion failed"
        );

        // Failures record the observed HTTP status and nothing else.
        if let Some(status) = last_status {
            store.update_with(&entry.source_id, |checkpoint| {
                checkpoint.last_http_status = Some(status);
            });
        }

        SourceIngestRecord {
            source_id: entry.source_id.clone(),
            outcome: IngestOutcome::Failed,
            http_status: last_status,
            policy_reason: None,
            error: last_error,
            attempts,
        }
    }
}
