// =============================================================================
// ingestion - cadence-scheduled conditional fetch of the source catalog
// =============================================================================

pub mod checkpoint;
pub mod engine;
pub mod fetch_policy;

pub use checkpoint::{classify_freshness, Checkpoint, CheckpointStore};
pub use engine::{
    build_ingestion_plan, FetchContext, FetchError, FetchResult, HttpSourceFetcher,
    IngestOutcome, IngestionEngine, IngestionPlan, IngestionReport, SourceFetcher,
    SourceIngestRecord,
};
pub use fetch_policy::{load_fetch_policy, FetchPolicyRule, SourceFetchPolicy};
