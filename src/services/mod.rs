// =============================================================================
// services - the request-facing composition layer
// =============================================================================

pub mod case_query_validation;
pub mod case_search;
pub mod chat_service;
pub mod export_policy;
pub mod grounding;
pub mod lawyer_research;
pub mod transparency;

pub use case_query_validation::is_specific_case_query;
pub use case_search::CaseSearchService;
pub use chat_service::ChatService;
pub use export_policy::{
    allowed_hosts_for_source, is_url_allowed_for_source, resolve_pdf_status,
    ExportApprovalSigner, ExportAuthorization, ExportPolicyGate,
};
pub use grounding::{
    baseline_citation, map_retrieved_documents_to_citations, official_grounding_catalog,
    ChatRetriever, GroundingAdapter, KeywordGroundingAdapter, NullChatRetriever,
    RetrievedDocument, RetrieverGroundingAdapter, StaticGroundingAdapter,
};
pub use lawyer_research::{
    build_research_queries, extract_matter_profile, LawyerCaseResearchService,
};
pub use transparency::{build_source_transparency_payload, SourceTransparencyResponse};
