// =============================================================================
// lawyer_research.rs - matter profiling and precedent research
// =============================================================================
//
// The planner reads a lawyer's matter summary and pulls out the load-bearing
// structure: issue tags (fixed ordered pattern list), the target court, the
// procedural posture, and up to twelve fact keywords. The original query is
// then expanded into at most five candidate queries, each angled differently
// (issues, court, posture, facts).
//
// The research service runs those queries official-first with the licensed
// fallback, merges and deduplicates the hits, resolves whether each decision
// document is fetchable from a trusted host, and reports how confident the
// pass is and how complete the intake was.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::errors::{ApiError, ErrorCode};
use crate::models::{
    CaseSearchRequest, CaseSearchResult, Confidence, LawyerCaseResearchRequest,
    LawyerCaseResearchResponse, LawyerCaseSupport, MatterProfile, SourceStatus,
};
use crate::services::case_query_validation::is_specific_case_query;
use crate::services::export_policy::resolve_pdf_status;
use crate::sources::canada_courts::derive_decision_document_url;
use crate::sources::canlii_client::CanLIIClient;
use crate::sources::official_client::OfficialCaseLawClient;

const MAX_FACT_KEYWORDS: usize = 12;
const MAX_RESEARCH_QUERIES: usize = 5;

static STOPWORDS: &[&str] = &[
    "about",
    "against",
    "appeal",
    "before",
    "between",
    "court",
    "decision",
    "federal",
    "finding",
    "findings",
    "immigration",
    "legal",
    "matter",
    "regarding",
    "review",
    "support",
    "under",
    "with",
];

static ISSUE_TAG_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("procedural_fairness", r"procedural fairness|natural justice"),
        ("inadmissibility", r"inadmiss"),
        ("admissibility", r"admissib"),
        ("credibility", r"credib"),
        ("refugee_protection", r"refugee|asylum"),
        ("humanitarian_compassionate", r"humanitarian|compassionate|h&c"),
        ("judicial_review", r"judicial review"),
        ("removal_order", r"removal order|deport|exclusion order"),
        ("residency_obligation", r"residency obligation|pr card|permanent resident"),
    ]
    .iter()
    .map(|(tag, pattern)| (*tag, Regex::new(pattern).expect("issue pattern is valid")))
    .collect()
});

static WORD_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z0-9]+").unwrap());
static COURT_FCA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bfca\b|\bcaf\b|federal court of appeal").unwrap());
static COURT_SCC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bscc\b|supreme court").unwrap());
static COURT_FC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bfc\b|\bfct\b|federal court").unwrap());
static CITATION_COURT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(SCC|FCA|CAF|FC)\b").unwrap());

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn dedupe_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ordered = Vec::new();
    for item in items {
        let trimmed = item.trim().to_string();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_lowercase()) {
            ordered.push(trimmed);
        }
    }
    ordered
}

fn extract_target_court(normalized: &str) -> Option<String> {
    // FCA first: "federal court of appeal" also matches the FC pattern.
    if COURT_FCA.is_match(normalized) {
        return Some("fca".to_string());
    }
    if COURT_SCC.is_match(normalized) {
        return Some("scc".to_string());
    }
    if COURT_FC.is_match(normalized) {
        return Some("fc".to_string());
    }
    None
}

/// Pull the structured profile out of a free-text matter summary.
pub fn extract_matter_profile(matter_summary: &str) -> MatterProfile {
    let normalized = normalize(matter_summary);

    let issue_tags = ISSUE_TAG_PATTERNS
        .iter()
        .filter(|(_, pattern)| pattern.is_match(&normalized))
        .map(|(tag, _)| tag.to_string())
        .collect();

    let procedural_posture = if normalized.contains("appeal") {
        Some("appeal".to_string())
    } else if normalized.contains("judicial review") {
        Some("judicial_review".to_string())
    } else {
        None
    };

    let fact_keywords = dedupe_preserving_order(
        WORD_TOKEN
            .find_iter(&normalized)
            .map(|token| token.as_str().to_string())
            .filter(|token| token.len() >= 5 && !STOPWORDS.contains(&token.as_str()))
            .collect(),
    )
    .into_iter()
    .take(MAX_FACT_KEYWORDS)
    .collect();

    MatterProfile {
        issue_tags,
        target_court: extract_target_court(&normalized),
        procedural_posture,
        fact_keywords,
    }
}

/// Expand the matter summary into at most five deduplicated queries.
pub fn build_research_queries(matter_summary: &str, court: Option<&str>) -> Vec<String> {
    let normalized_summary = matter_summary.split_whitespace().collect::<Vec<_>>().join(" ");
    let profile = extract_matter_profile(&normalized_summary);
    let target_court = court
        .map(|value| value.trim().to_lowercase())
        .filter(|value| !value.is_empty())
        .or_else(|| profile.target_court.clone());

    let mut queries = vec![normalized_summary.clone()];

    if !profile.issue_tags.is_empty() {
        let issue_fragment = profile.issue_tags[..profile.issue_tags.len().min(2)]
            .join(" ")
            .replace('_', " ");
        queries.push(format!("{normalized_summary} {issue_fragment}"));
    }

    if let Some(court) = &target_court {
        queries.push(format!("{normalized_summary} {court} precedent"));
    }

    if let Some(posture) = &profile.procedural_posture {
        queries.push(format!(
            "{normalized_summary} {} immigration",
            posture.replace('_', " ")
        ));
    }

    if !profile.fact_keywords.is_empty() {
        queries.push(format!(
            "{} immigration precedent",
            profile.fact_keywords[..profile.fact_keywords.len().min(6)].join(" ")
        ));
    }

    dedupe_preserving_order(queries)
        .into_iter()
        .take(MAX_RESEARCH_QUERIES)
        .collect()
}

fn court_from_citation(citation: &str) -> Option<String> {
    CITATION_COURT.captures(citation).map(|captures| {
        let code = &captures[1];
        if code == "CAF" {
            "FCA".to_string()
        } else {
            code.to_string()
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientStatus {
    NotUsed,
    Ok,
    Unavailable,
}

impl ClientStatus {
    fn label(self, ok: &'static str) -> String {
        match self {
            ClientStatus::NotUsed => "not_used".to_string(),
            ClientStatus::Ok => ok.to_string(),
            ClientStatus::Unavailable => "unavailable".to_string(),
        }
    }
}

pub struct LawyerCaseResearchService {
    official: Option<Arc<OfficialCaseLawClient>>,
    canlii: Option<Arc<CanLIIClient>>,
}

impl LawyerCaseResearchService {
    pub fn new(
        official: Option<Arc<OfficialCaseLawClient>>,
        canlii: Option<Arc<CanLIIClient>>,
    ) -> Self {
        Self { official, canlii }
    }

    pub async fn research(
        &self,
        request: &LawyerCaseResearchRequest,
    ) -> Result<LawyerCaseResearchResponse, ApiError> {
        request.validate()?;

        if !is_specific_case_query(&request.matter_summary) {
            return Err(ApiError::validation(
                "Case-law query is too broad. Please include specific terms such as \
                 program, issue, court, or citation.",
            )
            .with_policy_reason("case_search_query_too_broad"));
        }

        let profile = extract_matter_profile(&request.matter_summary);
        let intake = request.intake.clone().unwrap_or_default();
        let target_court = intake
            .target_court
            .clone()
            .or_else(|| profile.target_court.clone());

        let queries =
            build_research_queries(&request.matter_summary, target_court.as_deref());

        let mut official_status = ClientStatus::NotUsed;
        let mut canlii_status = ClientStatus::NotUsed;
        let mut collected: Vec<CaseSearchResult> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for query in &queries {
            if collected.len() >= request.limit {
                break;
            }
            let search_request = CaseSearchRequest {
                query: query.clone(),
                jurisdiction: request.jurisdiction.clone(),
                court: target_court.clone(),
                limit: request.limit,
            };

            let mut results: Option<Vec<CaseSearchResult>> = None;
            if let Some(official) = &self.official {
                match official.search_cases(&search_request).await {
                    Ok(response) => {
                        official_status = ClientStatus::Ok;
                        results = Some(response.results);
                    }
                    Err(err) if err.code == ErrorCode::SourceUnavailable => {
                        official_status = ClientStatus::Unavailable;
                        warn!(query = query.as_str(), "official sources unavailable for research query");
                    }
                    Err(err) => return Err(err),
                }
            }

            if results.is_none() {
                if let Some(canlii) = &self.canlii {
                    match canlii.search_cases(&search_request).await {
                        Ok(response) => {
                            canlii_status = ClientStatus::Ok;
                            results = Some(response.results);
                        }
                        Err(err) if err.code == ErrorCode::SourceUnavailable => {
                            canlii_status = ClientStatus::Unavailable;
                        }
                        Err(err) => return Err(err),
                    }
                }
            }

            for result in results.unwrap_or_default() {
                let key = if result.citation.is_empty() {
                    result.case_id.clone()
                } else {
                    result.citation.to_lowercase()
                };
                if !seen.insert(key) {
                    continue;
                }
                collected.push(result);
                if collected.len() >= request.limit {
                    break;
                }
            }
        }

        let any_source_worked =
            official_status == ClientStatus::Ok || canlii_status == ClientStatus::Ok;
        if collected.is_empty() && !any_source_worked {
            if official_status == ClientStatus::Unavailable
                || canlii_status == ClientStatus::Unavailable
            {
                return Err(ApiError::source_unavailable(
                    "Case-law research sources are currently unavailable. Please retry later.",
                ));
            }
            return Err(ApiError::source_unavailable(
                "Case-law sources are unavailable. Please retry later.",
            ));
        }

        let anchors: Vec<String> = intake
            .anchor_citations
            .iter()
            .map(|anchor| normalize(anchor))
            .collect();

        let cases: Vec<LawyerCaseSupport> = collected
            .into_iter()
            .map(|result| {
                let document_url = derive_decision_document_url(&result.url);
                let (pdf_status, _) = resolve_pdf_status(document_url.as_deref(), &result.url);
                let anchor_matched = anchors.contains(&normalize(&result.citation));
                let relevance_reason = if anchor_matched {
                    format!("Anchors the requested citation {}", result.citation)
                } else if !profile.issue_tags.is_empty() {
                    format!(
                        "Aligned with issue focus: {}",
                        profile
                            .issue_tags
                            .iter()
                            .map(|tag| tag.replace('_', " "))
                            .collect::<Vec<_>>()
                            .join(", ")
                    )
                } else {
                    "Matched the expanded research queries".to_string()
                };
                LawyerCaseSupport {
                    case_id: result.case_id,
                    title: result.title,
                    citation: result.citation.clone(),
                    court: court_from_citation(&result.citation)
                        .or_else(|| target_court.as_ref().map(|court| court.to_uppercase()))
                        .unwrap_or_else(|| "FC".to_string()),
                    decision_date: result.decision_date,
                    url: result.url,
                    document_url,
                    pdf_status,
                    relevance_reason,
                    summary: None,
                }
            })
            .collect();

        let anchor_matched = cases
            .iter()
            .any(|case| anchors.contains(&normalize(&case.citation)));

        let mut confidence_reasons = Vec::new();
        let research_confidence = if anchor_matched {
            confidence_reasons.push("Citation anchor matched at least one result.".to_string());
            Confidence::High
        } else if official_status == ClientStatus::Ok && cases.len() >= 3 {
            confidence_reasons
                .push("Official court sources returned aligned precedent results.".to_string());
            Confidence::High
        } else if !cases.is_empty() {
            confidence_reasons.push("Some supporting precedent was found.".to_string());
            Confidence::Medium
        } else {
            confidence_reasons.push("No matching precedent was found.".to_string());
            Confidence::Low
        };
        if canlii_status == ClientStatus::Ok {
            confidence_reasons
                .push("Licensed fallback supplied part of the result set.".to_string());
        }

        let provided_fields = [
            intake.objective.is_some(),
            intake.target_court.is_some(),
            intake.procedural_posture.is_some(),
            !intake.issue_tags.is_empty(),
            !intake.anchor_citations.is_empty(),
            !intake.fact_keywords.is_empty(),
        ]
        .iter()
        .filter(|provided| **provided)
        .count();
        let intake_completeness = match provided_fields {
            0..=1 => "low",
            2..=3 => "medium",
            _ => "high",
        };
        let mut intake_hints = Vec::new();
        if intake.target_court.is_none() && profile.target_court.is_none() {
            intake_hints.push("Name a target court (fc, fca, scc) to narrow the search.".to_string());
        }
        if intake.anchor_citations.is_empty() {
            intake_hints
                .push("Anchor citations sharpen ranking and confidence scoring.".to_string());
        }
        if intake.issue_tags.is_empty() && profile.issue_tags.is_empty() {
            intake_hints.push("Describe the legal issues in play for better tagging.".to_string());
        }

        Ok(LawyerCaseResearchResponse {
            matter_profile: profile,
            cases,
            source_status: SourceStatus {
                official: official_status.label("ok"),
                canlii: canlii_status.label("ok"),
            },
            research_confidence,
            confidence_reasons,
            intake_completeness: intake_completeness.to_string(),
            intake_hints,
        })
    }
}
