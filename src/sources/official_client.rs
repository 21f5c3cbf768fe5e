// =============================================================================
// official_client.rs - fan-out over the official court decision feeds
// =============================================================================
//
// One search request fans out to up to three sources (SCC, FC, FCA) fetched
// concurrently, each with its own timeout. Per-source failures are collected
// rather than propagated: a response is produced whenever at least one source
// yielded records, and only a complete wipeout surfaces as source-unavailable.
//
// Ranking is deterministic: token hits against title+citation+case_id, a flat
// bonus when the whole compacted query appears as a substring, ties broken by
// decision date (newest first) and then insertion order.
// =============================================================================

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use crate::errors::ApiError;
use crate::models::{CaseSearchRequest, CaseSearchResponse, CaseSearchResult};
use crate::sources::canada_courts::{
    parse_decisia_rss_feed, parse_fca_decisions_html_feed, parse_scc_json_feed, CourtCode,
    CourtDecisionRecord,
};
use crate::sources::registry::{SourceRegistry, SourceRegistryEntry};

static QUERY_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z0-9]+").unwrap());

const DEFAULT_SOURCE_IDS: [&str; 3] = ["SCC_DECISIONS", "FC_DECISIONS", "FCA_DECISIONS"];

/// Capability to fetch a raw feed payload for one registry source. The HTTP
/// implementation is used in production; tests inject canned payloads.
#[async_trait]
pub trait CourtFeedFetcher: Send + Sync {
    async fn fetch(&self, source: &SourceRegistryEntry) -> Result<Vec<u8>, String>;
}

pub struct HttpCourtFeedFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpCourtFeedFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("immcad-api/0.1 (case-law-search)")
            .build()?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl CourtFeedFetcher for HttpCourtFeedFetcher {
    async fn fetch(&self, source: &SourceRegistryEntry) -> Result<Vec<u8>, String> {
        let response = self
            .client
            .get(&source.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| format!("{}: request failed: {err}", source.source_id))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("{}: HTTP {status}", source.source_id));
        }
        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|err| format!("{}: body read failed: {err}", source.source_id))
    }
}

pub struct OfficialCaseLawClient {
    registry: Arc<SourceRegistry>,
    fetcher: Arc<dyn CourtFeedFetcher>,
}

impl OfficialCaseLawClient {
    pub fn new(registry: Arc<SourceRegistry>, fetcher: Arc<dyn CourtFeedFetcher>) -> Self {
        Self { registry, fetcher }
    }

    /// Search the official feeds. Succeeds when any source yields records.
    pub async fn search_cases(
        &self,
        request: &CaseSearchRequest,
    ) -> Result<CaseSearchResponse, ApiError> {
        let source_ids = resolve_source_ids(request.court.as_deref());

        let fetches = source_ids.iter().filter_map(|source_id| {
            let source = self.registry.get_source(source_id)?;
            let fetcher = Arc::clone(&self.fetcher);
            Some(async move {
                let payload = fetcher.fetch(source).await;
                (source.source_id.clone(), payload)
            })
        });

        let mut records: Vec<CourtDecisionRecord> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        for (source_id, outcome) in futures::future::join_all(fetches).await {
            match outcome {
                Ok(payload) => match parse_source_payload(&source_id, &payload) {
                    Ok(mut parsed) => {
                        debug!(
                            source_id = source_id.as_str(),
                            records = parsed.len(),
                            "official feed parsed"
                        );
                        records.append(&mut parsed);
                    }
                    Err(err) => {
                        warn!(source_id = source_id.as_str(), error = %err, "official feed parse failed");
                        errors.push(format!("{source_id}: {err}"));
                    }
                },
                Err(err) => {
                    warn!(source_id = source_id.as_str(), error = %err, "official feed fetch failed");
                    errors.push(err);
                }
            }
        }

        let had_records = !records.is_empty();
        let ranked = rank_records(records, &request.query);
        if !ranked.is_empty() {
            return Ok(CaseSearchResponse {
                results: ranked
                    .into_iter()
                    .take(request.limit)
                    .map(to_search_result)
                    .collect(),
            });
        }

        // Sources answered but nothing matched the query.
        if had_records {
            return Ok(CaseSearchResponse { results: Vec::new() });
        }

        if !errors.is_empty() {
            return Err(ApiError::source_unavailable(
                "Official court case-law sources are currently unavailable. Please retry later.",
            ));
        }

        Ok(CaseSearchResponse { results: Vec::new() })
    }
}

/// Map a court parameter onto feed source ids. Unknown values fan out to all
/// three sources.
pub fn resolve_source_ids(court: Option<&str>) -> Vec<&'static str> {
    let Some(court) = court else {
        return DEFAULT_SOURCE_IDS.to_vec();
    };
    match court.trim().to_lowercase().as_str() {
        "scc" | "scc_decisions" => vec!["SCC_DECISIONS"],
        "fc" | "fct" | "fc-cf" | "fc_decisions" => vec!["FC_DECISIONS"],
        "fca" | "caf" | "fca-caf" | "fca_decisions" => vec!["FCA_DECISIONS"],
        _ => DEFAULT_SOURCE_IDS.to_vec(),
    }
}

fn parse_source_payload(
    source_id: &str,
    payload: &[u8],
) -> Result<Vec<CourtDecisionRecord>, String> {
    match source_id {
        "SCC_DECISIONS" => parse_scc_json_feed(payload).map_err(|err| err.to_string()),
        "FC_DECISIONS" => {
            parse_decisia_rss_feed(payload, source_id, CourtCode::Fc).map_err(|err| err.to_string())
        }
        "FCA_DECISIONS" => {
            // The FCA feed is flaky; fall back to the HTML listing when the
            // RSS is malformed or empty.
            match parse_decisia_rss_feed(payload, source_id, CourtCode::Fca) {
                Ok(records) if !records.is_empty() => Ok(records),
                Ok(_) | Err(_) => Ok(parse_fca_decisions_html_feed(payload)),
            }
        }
        other => Err(format!("no parser registered for source '{other}'")),
    }
}

/// Score and order records for a query. Exposed for the research service,
/// which ranks merged result sets the same way.
pub fn rank_records(records: Vec<CourtDecisionRecord>, query: &str) -> Vec<CourtDecisionRecord> {
    let lowered = query.to_lowercase();
    let tokens: Vec<&str> = QUERY_TOKEN.find_iter(&lowered).map(|m| m.as_str()).collect();

    if tokens.is_empty() {
        let mut ordered = records;
        ordered.sort_by(|a, b| {
            b.decision_date
                .cmp(&a.decision_date)
                .then_with(|| a.case_id.cmp(&b.case_id))
        });
        return ordered;
    }

    let compact_query = tokens.join(" ");
    let mut scored: Vec<(i64, CourtDecisionRecord, usize)> = Vec::new();
    for (index, record) in records.into_iter().enumerate() {
        let haystack = format!("{} {} {}", record.title, record.citation, record.case_id)
            .to_lowercase();
        let token_hits = tokens
            .iter()
            .filter(|token| haystack.contains(*token))
            .count() as i64;
        if token_hits == 0 {
            continue;
        }
        let mut score = token_hits;
        if haystack.contains(&compact_query) {
            score += 5;
        }
        scored.push((score, record, index));
    }

    scored.sort_by(|(score_a, record_a, index_a), (score_b, record_b, index_b)| {
        score_b
            .cmp(score_a)
            .then_with(|| record_b.decision_date.cmp(&record_a.decision_date))
            .then_with(|| index_a.cmp(index_b))
    });
    scored.into_iter().map(|(_, record, _)| record).collect()
}

fn to_search_result(record: CourtDecisionRecord) -> CaseSearchResult {
    CaseSearchResult {
        case_id: record.case_id,
        title: record.title,
        citation: record.citation,
        decision_date: record.decision_date,
        url: record.decision_url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::registry::{SourceType, UpdateCadence};
    use chrono::NaiveDate;
    use std::collections::HashMap;

    fn court_registry() -> Arc<SourceRegistry> {
        let sources = [
            ("SCC_DECISIONS", "https://decisions.scc-csc.ca/scc-csc/en/rss.do"),
            ("FC_DECISIONS", "https://decisions.fct-cf.gc.ca/fc-cf/en/rss.do"),
            ("FCA_DECISIONS", "https://decisions.fca-caf.gc.ca/fca-caf/en/rss.do"),
        ]
        .into_iter()
        .map(|(source_id, url)| SourceRegistryEntry {
            source_id: source_id.into(),
            source_type: SourceType::CaseLaw,
            instrument: format!("{source_id} feed"),
            url: url.into(),
            update_cadence: UpdateCadence::Daily,
        })
        .collect();
        Arc::new(SourceRegistry {
            version: "test".into(),
            jurisdiction: "ca".into(),
            sources,
        })
    }

    struct FakeFetcher {
        payloads: HashMap<&'static str, Result<Vec<u8>, String>>,
    }

    #[async_trait]
    impl CourtFeedFetcher for FakeFetcher {
        async fn fetch(&self, source: &SourceRegistryEntry) -> Result<Vec<u8>, String> {
            self.payloads
                .get(source.source_id.as_str())
                .cloned()
                .unwrap_or_else(|| Err(format!("{}: HTTP 500", source.source_id)))
        }
    }

    fn fc_rss(title: &str) -> Vec<u8> {
        format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><item>
<title>{title}</title>
<link>https://decisions.fct-cf.gc.ca/fc-cf/decisions/en/item/42/index.do</link>
<pubDate>Mon, 19 Feb 2024 09:00:00 GMT</pubDate>
</item></channel></rss>"#
        )
        .into_bytes()
    }

    fn record(title: &str, citation: &str, case_id: &str, date: (i32, u32, u32)) -> CourtDecisionRecord {
        CourtDecisionRecord {
            source_id: "FC_DECISIONS".into(),
            court_code: CourtCode::Fc,
            case_id: case_id.into(),
            title: title.into(),
            citation: citation.into(),
            decision_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            decision_url: format!("https://decisions.fct-cf.gc.ca/item/{case_id}/index.do"),
            pdf_url: None,
        }
    }

    #[tokio::test]
    async fn fan_out_survives_partial_source_failures() {
        let client = OfficialCaseLawClient::new(
            court_registry(),
            Arc::new(FakeFetcher {
                payloads: HashMap::from([
                    ("FC_DECISIONS", Ok(fc_rss("Doe v Canada, 2024 FC 10"))),
                    ("SCC_DECISIONS", Err("SCC_DECISIONS: HTTP 500".to_string())),
                    ("FCA_DECISIONS", Err("FCA_DECISIONS: HTTP 503".to_string())),
                ]),
            }),
        );

        let response = client
            .search_cases(&CaseSearchRequest {
                query: "procedural fairness Doe".into(),
                jurisdiction: "ca".into(),
                court: None,
                limit: 10,
            })
            .await
            .unwrap();

        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].citation, "2024 FC 10");
    }

    #[tokio::test]
    async fn all_sources_failing_is_source_unavailable() {
        let client = OfficialCaseLawClient::new(
            court_registry(),
            Arc::new(FakeFetcher {
                payloads: HashMap::new(),
            }),
        );

        let err = client
            .search_cases(&CaseSearchRequest {
                query: "anything".into(),
                jurisdiction: "ca".into(),
                court: None,
                limit: 10,
            })
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 503);
    }

    #[tokio::test]
    async fn court_parameter_narrows_the_fan_out() {
        // Only the FC feed is wired up; a court=fc search must not touch the
        // failing SCC/FCA entries.
        let client = OfficialCaseLawClient::new(
            court_registry(),
            Arc::new(FakeFetcher {
                payloads: HashMap::from([(
                    "FC_DECISIONS",
                    Ok(fc_rss("Singh v Canada, 2024 FC 88")),
                )]),
            }),
        );

        let response = client
            .search_cases(&CaseSearchRequest {
                query: "singh".into(),
                jurisdiction: "ca".into(),
                court: Some("fc".into()),
                limit: 5,
            })
            .await
            .unwrap();
        assert_eq!(response.results.len(), 1);
    }

    #[test]
    fn court_aliases_resolve_to_source_ids() {
        assert_eq!(resolve_source_ids(Some("scc")), vec!["SCC_DECISIONS"]);
        assert_eq!(resolve_source_ids(Some("FCT")), vec!["FC_DECISIONS"]);
        assert_eq!(resolve_source_ids(Some("fca-caf")), vec!["FCA_DECISIONS"]);
        assert_eq!(resolve_source_ids(Some("tax court")).len(), 3);
        assert_eq!(resolve_source_ids(None).len(), 3);
    }

    #[test]
    fn ranking_prefers_token_hits_then_recency_then_insertion() {
        let records = vec![
            record("Old fairness case", "2020 FC 1", "1", (2020, 1, 10)),
            record("Recent fairness case", "2024 FC 2", "2", (2024, 3, 1)),
            record("Unrelated matter", "2024 FC 3", "3", (2024, 3, 2)),
        ];
        let ranked = rank_records(records, "fairness");
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].case_id, "2");
        assert_eq!(ranked[1].case_id, "1");
    }

    #[test]
    fn compact_query_substring_earns_the_bonus() {
        let records = vec![
            record("Doe v Canada, 2024 FC 10", "2024 FC 10", "10", (2024, 1, 1)),
            record("Doe mentions 2024 elsewhere FC", "2024 FC 99", "99", (2024, 6, 1)),
        ];
        // "2024 fc 10" appears verbatim in the first haystack only.
        let ranked = rank_records(records, "2024 FC 10");
        assert_eq!(ranked[0].case_id, "10");
    }

    #[test]
    fn empty_query_sorts_by_date_then_case_id() {
        let records = vec![
            record("B", "2024 FC 2", "b", (2024, 1, 1)),
            record("A", "2024 FC 1", "a", (2024, 1, 1)),
            record("C", "2024 FC 3", "c", (2024, 5, 1)),
        ];
        let ranked = rank_records(records, "   ");
        let ids: Vec<_> = ranked.iter().map(|r| r.case_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
