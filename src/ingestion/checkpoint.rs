// =============================================================================
// checkpoint.rs - persisted conditional-fetch state
// =============================================================================
//
// One JSON document holds everything ingestion knows about past fetches:
// per-source ETag, Last-Modified, payload checksum, last HTTP status, and the
// last success timestamp. The document enables conditional requests on the
// next run and drives the freshness column on the transparency endpoint.
//
// Persistence rules:
//   - saves are atomic: write <path>.tmp, fsync, rename over the original
//   - a corrupt file is logged and treated as empty, never deleted
//   - updated_at is monotonic non-decreasing across saves
// =============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::SourceFreshnessStatus;
use crate::sources::registry::UpdateCadence;

pub const CHECKPOINT_DOCUMENT_VERSION: u32 = 1;

/// Conditional-fetch state for one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub checksum_sha256: Option<String>,
    #[serde(default)]
    pub last_http_status: Option<u16>,
    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointDocument {
    version: u32,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    checkpoints: BTreeMap<String, Checkpoint>,
}

impl Default for CheckpointDocument {
    fn default() -> Self {
        Self {
            version: CHECKPOINT_DOCUMENT_VERSION,
            updated_at: None,
            checkpoints: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to persist checkpoint state: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize checkpoint state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// File-backed checkpoint map. Single writer (the ingestion run); readers get
/// rename-consistent snapshots.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    document: CheckpointDocument,
}

impl CheckpointStore {
    /// Open the store at `path`. Missing and corrupt files both start empty;
    /// corruption is logged and the file is left in place for inspection.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let document = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<CheckpointDocument>(&raw) {
                Ok(document) => document,
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "checkpoint state is corrupt; starting from empty state"
                    );
                    CheckpointDocument::default()
                }
            },
            Err(_) => CheckpointDocument::default(),
        };
        debug!(
            path = %path.display(),
            sources = document.checkpoints.len(),
            "checkpoint store loaded"
        );
        Self { path, document }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.document.updated_at
    }

    pub fn get(&self, source_id: &str) -> Option<&Checkpoint> {
        self.document.checkpoints.get(source_id)
    }

    pub fn len(&self) -> usize {
        self.document.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.document.checkpoints.is_empty()
    }

    /// Replace the checkpoint for a source in memory. Durable only after save().
    pub fn upsert(&mut self, source_id: &str, checkpoint: Checkpoint) {
        self.document
            .checkpoints
            .insert(source_id.to_string(), checkpoint);
    }

    /// Mutate the checkpoint for a source in place, creating it when absent.
    pub fn update_with(&mut self, source_id: &str, mutate: impl FnOnce(&mut Checkpoint)) {
        let entry = self
            .document
            .checkpoints
            .entry(source_id.to_string())
            .or_default();
        mutate(entry);
    }

    /// Persist the full document atomically: temp file, fsync, rename.
    pub fn save(&mut self) -> Result<(), CheckpointError> {
        let now = Utc::now();
        self.document.updated_at = Some(match self.document.updated_at {
            Some(previous) if previous > now => previous,
            _ => now,
        });

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let serialized = serde_json::to_string_pretty(&self.document)?;
        let temp_path = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(serialized.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;

        debug!(
            path = %self.path.display(),
            sources = self.document.checkpoints.len(),
            "checkpoint state persisted"
        );
        Ok(())
    }
}

/// Derive freshness for a source from its checkpoint and cadence. Never stored.
pub fn classify_freshness(
    checkpoint: Option<&Checkpoint>,
    cadence: UpdateCadence,
    now: DateTime<Utc>,
) -> SourceFreshnessStatus {
    let Some(last_success_at) = checkpoint.and_then(|cp| cp.last_success_at) else {
        return SourceFreshnessStatus::Missing;
    };
    if now - last_success_at <= cadence.freshness_window() {
        SourceFreshnessStatus::Fresh
    } else {
        SourceFreshnessStatus::Stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn checkpoint_with_success(age: Duration) -> Checkpoint {
        Checkpoint {
            etag: Some("\"etag\"".into()),
            last_modified: None,
            checksum_sha256: Some("abc123".into()),
            last_http_status: Some(200),
            last_success_at: Some(Utc::now() - age),
        }
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");

        let mut store = CheckpointStore::load(&path);
        assert!(store.is_empty());
        store.upsert("IRCC_PDI", checkpoint_with_success(Duration::hours(1)));
        store.save().unwrap();

        let reloaded = CheckpointStore::load(&path);
        assert_eq!(reloaded.len(), 1);
        let checkpoint = reloaded.get("IRCC_PDI").unwrap();
        assert_eq!(checkpoint.last_http_status, Some(200));
        assert_eq!(checkpoint.checksum_sha256.as_deref(), Some("abc123"));
        assert!(reloaded.updated_at().is_some());
    }

    #[test]
    fn corrupt_file_is_treated_as_empty_and_not_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");
        fs::write(&path, b"{definitely not json").unwrap();

        let store = CheckpointStore::load(&path);
        assert!(store.is_empty());
        // The corrupt file is still on disk for inspection.
        assert!(path.exists());
        assert_eq!(fs::read(&path).unwrap(), b"{definitely not json");
    }

    #[test]
    fn save_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/cache/checkpoints.json");
        let mut store = CheckpointStore::load(&path);
        store.upsert("IRPA", Checkpoint::default());
        store.save().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn updated_at_is_monotonic_across_saves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");
        let mut store = CheckpointStore::load(&path);
        store.save().unwrap();
        let first = store.updated_at().unwrap();
        store.save().unwrap();
        let second = store.updated_at().unwrap();
        assert!(second >= first);
    }

    #[test]
    fn freshness_classification_tracks_cadence_windows() {
        let now = Utc::now();
        assert_eq!(
            classify_freshness(None, UpdateCadence::Daily, now),
            SourceFreshnessStatus::Missing
        );
        assert_eq!(
            classify_freshness(
                Some(&checkpoint_with_success(Duration::hours(1))),
                UpdateCadence::Daily,
                now
            ),
            SourceFreshnessStatus::Fresh
        );
        assert_eq!(
            classify_freshness(
                Some(&checkpoint_with_success(Duration::days(3))),
                UpdateCadence::Daily,
                now
            ),
            SourceFreshnessStatus::Stale
        );
        assert_eq!(
            classify_freshness(
                Some(&checkpoint_with_success(Duration::days(3))),
                UpdateCadence::Weekly,
                now
            ),
            SourceFreshnessStatus::Fresh
        );
    }

    #[test]
    fn checkpoint_without_success_timestamp_is_missing() {
        let checkpoint = Checkpoint {
            last_http_status: Some(500),
            ..Default::default()
        };
        assert_eq!(
            classify_freshness(Some(&checkpoint), UpdateCadence::Daily, Utc::now()),
            SourceFreshnessStatus::Missing
        );
    }

    #[test]
    fn wire_layout_matches_the_documented_shape() {
        let raw = r#"{
            "version": 1,
            "updated_at": "2026-02-24T00:00:00Z",
            "checkpoints": {
                "FC_DECISIONS": {
                    "etag": "etag-fc",
                    "last_modified": null,
                    "checksum_sha256": "abc123",
                    "last_http_status": 200,
                    "last_success_at": "2026-02-23T23:00:00Z"
                }
            }
        }"#;
        let document: CheckpointDocument = serde_json::from_str(raw).unwrap();
        assert_eq!(document.version, 1);
        let checkpoint = document.checkpoints.get("FC_DECISIONS").unwrap();
        assert_eq!(checkpoint.etag.as_deref(), Some("etag-fc"));
        assert_eq!(checkpoint.last_http_status, Some(200));
    }
}
