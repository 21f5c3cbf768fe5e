// =============================================================================
// transparency.rs - the public source-transparency snapshot
// =============================================================================
//
// Users and reviewers can see exactly which sources the assistant draws on
// and how fresh each one is. The payload joins three things: the registry
// (what we ingest), the policy (what answers may cite), and the checkpoint
// file (when each source last succeeded). Freshness is derived on the fly
// and never stored.
//
// The checkpoint file is re-read on every call. Saves replace it atomically,
// so readers always see a complete document.
// =============================================================================

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ingestion::checkpoint::{classify_freshness, CheckpointStore};
use crate::models::SourceFreshnessStatus;
use crate::sources::registry::{SourceRegistry, SourceType, UpdateCadence};
use crate::sources::source_policy::{SourceClass, SourcePolicy};

pub const SUPPORTED_COURTS: &[&str] = &["SCC", "FC", "FCA"];

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointDescriptor {
    pub path: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceTransparencyItem {
    pub source_id: String,
    pub source_type: SourceType,
    pub instrument: String,
    pub url: String,
    pub update_cadence: UpdateCadence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_class: Option<SourceClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_citation_allowed: Option<bool>,
    pub freshness_status: SourceFreshnessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseLawSourceItem {
    pub source_id: String,
    pub court: String,
    pub url: String,
    pub freshness_status: SourceFreshnessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_http_status: Option<u16>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceTransparencyResponse {
    pub jurisdiction: String,
    pub registry_version: String,
    pub supported_courts: Vec<String>,
    pub checkpoint: CheckpointDescriptor,
    pub sources: Vec<SourceTransparencyItem>,
    pub case_law_sources: Vec<CaseLawSourceItem>,
}

fn court_for_source(source_id: &str) -> Option<&'static str> {
    match source_id {
        "SCC_DECISIONS" => Some("SCC"),
        "FC_DECISIONS" => Some("FC"),
        "FCA_DECISIONS" => Some("FCA"),
        _ => None,
    }
}

/// Assemble the transparency payload from the registry, policy, and the
/// current checkpoint file.
pub fn build_source_transparency_payload(
    registry: &SourceRegistry,
    policy: &SourcePolicy,
    checkpoint_state_path: &Path,
) -> SourceTransparencyResponse {
    let store = CheckpointStore::load(checkpoint_state_path);
    let now = Utc::now();

    let sources: Vec<SourceTransparencyItem> = registry
        .sources
        .iter()
        .map(|entry| {
            let checkpoint = store.get(&entry.source_id);
            let policy_entry = policy.get_source(&entry.source_id);
            SourceTransparencyItem {
                source_id: entry.source_id.clone(),
                source_type: entry.source_type,
                instrument: entry.instrument.clone(),
                url: entry.url.clone(),
                update_cadence: entry.update_cadence,
                source_class: policy_entry.map(|p| p.source_class),
                answer_citation_allowed: policy_entry.map(|p| p.answer_citation_allowed),
                freshness_status: classify_freshness(checkpoint, entry.update_cadence, now),
                last_http_status: checkpoint.and_then(|cp| cp.last_http_status),
                last_success_at: checkpoint.and_then(|cp| cp.last_success_at),
            }
        })
        .collect();

    let case_law_sources: Vec<CaseLawSourceItem> = registry
        .sources
        .iter()
        .filter_map(|entry| {
            let court = court_for_source(&entry.source_id)?;
            let checkpoint = store.get(&entry.source_id);
            Some(CaseLawSourceItem {
                source_id: entry.source_id.clone(),
                court: court.to_string(),
                url: entry.url.clone(),
                freshness_status: classify_freshness(checkpoint, entry.update_cadence, now),
                last_http_status: checkpoint.and_then(|cp| cp.last_http_status),
            })
        })
        .collect();

    SourceTransparencyResponse {
        jurisdiction: registry.jurisdiction.to_lowercase(),
        registry_version: registry.version.clone(),
        supported_courts: SUPPORTED_COURTS.iter().map(|c| c.to_string()).collect(),
        checkpoint: CheckpointDescriptor {
            path: checkpoint_state_path.display().to_string(),
            exists: checkpoint_state_path.exists(),
            updated_at: store.updated_at(),
        },
        sources,
        case_law_sources,
    }
}
