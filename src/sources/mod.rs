// =============================================================================
// sources - the catalog of authoritative legal sources and its clients
// =============================================================================

pub mod canada_courts;
pub mod canlii_client;
pub mod official_client;
pub mod registry;
pub mod source_policy;

pub use canada_courts::{
    derive_decision_document_url, is_neutral_citation, parse_decisia_rss_feed,
    parse_fca_decisions_html_feed, parse_scc_json_feed, validate_court_source_payload, CourtCode,
    CourtDecisionRecord, CourtSourceValidation,
};
pub use canlii_client::{CanLIIClient, CanLIIUsageLimits, InMemoryCanLIIUsageLimiter};
pub use official_client::{CourtFeedFetcher, HttpCourtFeedFetcher, OfficialCaseLawClient};
pub use registry::{
    load_source_registry, SourceRegistry, SourceRegistryEntry, SourceType, UpdateCadence,
};
pub use source_policy::{
    is_source_export_allowed, is_source_ingest_allowed, load_source_policy, SourceClass,
    SourcePolicy, SourcePolicyEntry,
};
