// =============================================================================
// canada_courts.rs - official court decision feed parsers
// =============================================================================
//
// Three feeds, three dialects:
//
//   SCC_DECISIONS  - JSON wrapping an RSS-shaped document
//                    {rss: {channel: {item: [...]}}}
//   FC_DECISIONS   - Decisia RSS 2.0 (XML) from the Federal Court
//   FCA_DECISIONS  - Decisia RSS 2.0 from the Federal Court of Appeal, with
//                    a lenient HTML list fallback when the feed is broken
//
// Each parser normalizes into CourtDecisionRecord. A record needs a neutral
// citation in the title, a parseable publication date, a non-empty title,
// and a decision link; anything else is invalid and the per-source validator
// reports it without aborting the batch.
// =============================================================================

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canadian neutral citation inside an SCC title: "2024 SCC 3".
static SCC_CITATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{4}\s+SCC\s+\d+\b").unwrap());

/// Federal Courts neutral citation, English or French form: "2024 FC 10",
/// "2024 FCA 11", "2024 CAF 11".
static DECISIA_CITATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{4}\s+(?:FC|FCA|CAF)\s+\d+\b").unwrap());

/// Strict form used to validate stored citations.
static NEUTRAL_CITATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}\s+(?:SCC|FC|FCA|CAF)\s+\d+$").unwrap());

/// Decisia item pages look like .../en/item/<id>/index.do.
static ITEM_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/item/(\d+)/").unwrap());

/// Rewrites an item page link to the canonical document URL.
static ITEM_INDEX_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"item/(\d+)/index\.do").unwrap());

static HTML_ANCHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)<a[^>]+href="([^"]+)"[^>]*>(.*?)</a>"#).unwrap());
static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static ISO_DATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CourtCode {
    #[serde(rename = "SCC")]
    Scc,
    #[serde(rename = "FC")]
    Fc,
    #[serde(rename = "FCA")]
    Fca,
}

impl std::fmt::Display for CourtCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CourtCode::Scc => write!(f, "SCC"),
            CourtCode::Fc => write!(f, "FC"),
            CourtCode::Fca => write!(f, "FCA"),
        }
    }
}

/// A decision extracted from an official feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourtDecisionRecord {
    pub source_id: String,
    pub court_code: CourtCode,
    pub case_id: String,
    pub title: String,
    pub citation: String,
    pub decision_date: NaiveDate,
    pub decision_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum CourtFeedError {
    #[error("payload is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("JSON feed parse failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("RSS feed parse failed: {0}")]
    Xml(String),
}

/// Why an individual feed item failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordIssue {
    MissingCitation,
    EmptyTitle,
    InvalidDate,
    MissingLink,
}

impl std::fmt::Display for RecordIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordIssue::MissingCitation => write!(f, "missing_citation"),
            RecordIssue::EmptyTitle => write!(f, "empty_title"),
            RecordIssue::InvalidDate => write!(f, "invalid_date"),
            RecordIssue::MissingLink => write!(f, "missing_link"),
        }
    }
}

/// Feed item before validation, shared across dialects.
#[derive(Debug, Clone, Default)]
struct RawFeedItem {
    id_hint: Option<String>,
    title: Option<String>,
    link: Option<String>,
    pub_date: Option<String>,
}

/// Strict validator for stored citation strings.
pub fn is_neutral_citation(value: &str) -> bool {
    NEUTRAL_CITATION.is_match(value.trim())
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Item page -> canonical document URL, when the link follows the Decisia
/// /item/<id>/index.do shape.
pub fn derive_decision_document_url(link: &str) -> Option<String> {
    if !ITEM_INDEX_SEGMENT.is_match(link) {
        return None;
    }
    Some(
        ITEM_INDEX_SEGMENT
            .replace(link, "$1/1/document.do")
            .into_owned(),
    )
}

fn parse_feed_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(parsed) = DateTime::parse_from_rfc2822(raw.trim()) {
        return Some(parsed.date_naive());
    }
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

fn build_record(
    raw: &RawFeedItem,
    source_id: &str,
    court_code: CourtCode,
    citation_pattern: &Regex,
) -> Result<CourtDecisionRecord, RecordIssue> {
    let title = raw
        .title
        .as_deref()
        .map(collapse_whitespace)
        .unwrap_or_default();
    if title.is_empty() {
        return Err(RecordIssue::EmptyTitle);
    }

    let citation = citation_pattern
        .find(&title)
        .map(|found| collapse_whitespace(found.as_str()))
        .ok_or(RecordIssue::MissingCitation)?;

    let decision_date = raw
        .pub_date
        .as_deref()
        .and_then(parse_feed_date)
        .ok_or(RecordIssue::InvalidDate)?;

    let link = raw
        .link
        .as_deref()
        .map(str::trim)
        .filter(|link| !link.is_empty())
        .ok_or(RecordIssue::MissingLink)?;

    let case_id = raw
        .id_hint
        .clone()
        .or_else(|| {
            ITEM_ID
                .captures(link)
                .map(|captures| captures[1].to_string())
        })
        .unwrap_or_else(|| citation.replace(' ', "-"));

    Ok(CourtDecisionRecord {
        source_id: source_id.to_string(),
        court_code,
        case_id,
        title,
        citation,
        decision_date,
        decision_url: link.to_string(),
        pdf_url: derive_decision_document_url(link),
    })
}

// =============================================================================
// SCC JSON feed
// =============================================================================

#[derive(Debug, Deserialize)]
struct SccFeed {
    rss: SccRss,
}

#[derive(Debug, Deserialize)]
struct SccRss {
    channel: SccChannel,
}

#[derive(Debug, Deserialize)]
struct SccChannel {
    #[serde(default)]
    item: Vec<SccFeedItem>,
}

#[derive(Debug, Deserialize)]
struct SccFeedItem {
    /// Numeric or string id; coerced to string either way.
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default, rename = "pubDate")]
    pub_date: Option<String>,
}

fn coerce_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(text) if !text.trim().is_empty() => {
            Some(text.trim().to_string())
        }
        serde_json::Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn scc_raw_items(payload: &[u8]) -> Result<Vec<RawFeedItem>, CourtFeedError> {
    let feed: SccFeed = serde_json::from_slice(payload)?;
    Ok(feed
        .rss
        .channel
        .item
        .into_iter()
        .map(|item| RawFeedItem {
            id_hint: item.id.as_ref().and_then(coerce_id),
            title: item.title,
            link: item.link,
            pub_date: item.pub_date,
        })
        .collect())
}

/// Parse the Supreme Court JSON feed, keeping valid records only.
pub fn parse_scc_json_feed(payload: &[u8]) -> Result<Vec<CourtDecisionRecord>, CourtFeedError> {
    let items = scc_raw_items(payload)?;
    Ok(items
        .iter()
        .filter_map(|raw| build_record(raw, "SCC_DECISIONS", CourtCode::Scc, &SCC_CITATION).ok())
        .collect())
}

// =============================================================================
// Decisia RSS (FC, FCA)
// =============================================================================

#[derive(Debug, Deserialize)]
struct DecisiaRss {
    channel: DecisiaChannel,
}

#[derive(Debug, Deserialize)]
struct DecisiaChannel {
    #[serde(default, rename = "item")]
    items: Vec<DecisiaItem>,
}

#[derive(Debug, Deserialize)]
struct DecisiaItem {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default, rename = "pubDate")]
    pub_date: Option<String>,
}

fn decisia_raw_items(payload: &[u8]) -> Result<Vec<RawFeedItem>, CourtFeedError> {
    let text = std::str::from_utf8(payload)?;
    let feed: DecisiaRss =
        quick_xml::de::from_str(text).map_err(|err| CourtFeedError::Xml(err.to_string()))?;
    Ok(feed
        .channel
        .items
        .into_iter()
        .map(|item| RawFeedItem {
            id_hint: None,
            title: item.title,
            link: item.link,
            pub_date: item.pub_date,
        })
        .collect())
}

/// Parse a Decisia RSS feed for the given court, keeping valid records only.
pub fn parse_decisia_rss_feed(
    payload: &[u8],
    source_id: &str,
    court_code: CourtCode,
) -> Result<Vec<CourtDecisionRecord>, CourtFeedError> {
    let items = decisia_raw_items(payload)?;
    Ok(items
        .iter()
        .filter_map(|raw| build_record(raw, source_id, court_code, &DECISIA_CITATION).ok())
        .collect())
}

// =============================================================================
// FCA HTML fallback
// =============================================================================

fn decode_basic_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

/// Lenient fallback for the FCA decisions listing page. Scans anchors for
/// titles carrying a neutral citation; the decision date is taken from an ISO
/// date inside the anchor text or the 160 bytes following it.
pub fn parse_fca_decisions_html_feed(payload: &[u8]) -> Vec<CourtDecisionRecord> {
    let Ok(html) = std::str::from_utf8(payload) else {
        return Vec::new();
    };

    let mut records = Vec::new();
    for captures in HTML_ANCHOR.captures_iter(html) {
        let href = captures[1].trim().to_string();
        let inner = HTML_TAG.replace_all(&captures[2], " ");
        let title = collapse_whitespace(&decode_basic_entities(&inner));

        if DECISIA_CITATION.find(&title).is_none() {
            continue;
        }

        // Date may sit inside the anchor text or just after the anchor.
        let anchor_end = captures.get(0).map(|m| m.end()).unwrap_or(0);
        let tail_end = html.len().min(anchor_end + 160);
        let tail = html.get(anchor_end..tail_end).unwrap_or("");
        let date_text = ISO_DATE
            .find(&title)
            .map(|m| m.as_str().to_string())
            .or_else(|| ISO_DATE.find(tail).map(|m| m.as_str().to_string()));

        let raw = RawFeedItem {
            id_hint: None,
            title: Some(title),
            link: Some(href),
            pub_date: date_text,
        };
        if let Ok(record) = build_record(&raw, "FCA_DECISIONS", CourtCode::Fca, &DECISIA_CITATION) {
            records.push(record);
        }
    }
    records
}

// =============================================================================
// Per-source payload validation
// =============================================================================

/// Conformance summary for one fetched payload.
#[derive(Debug, Clone, Serialize)]
pub struct CourtSourceValidation {
    pub source_id: String,
    pub records_total: usize,
    pub records_valid: usize,
    pub records_invalid: usize,
    pub errors: Vec<String>,
}

fn validate_items(
    source_id: &str,
    court_code: CourtCode,
    citation_pattern: &Regex,
    items: Result<Vec<RawFeedItem>, CourtFeedError>,
) -> CourtSourceValidation {
    let items = match items {
        Ok(items) => items,
        Err(err) => {
            return CourtSourceValidation {
                source_id: source_id.to_string(),
                records_total: 1,
                records_valid: 0,
                records_invalid: 1,
                errors: vec![format!("payload_parse_error: {err}")],
            }
        }
    };

    let mut valid = 0usize;
    let mut invalid = 0usize;
    let mut errors = Vec::new();
    for (index, raw) in items.iter().enumerate() {
        match build_record(raw, source_id, court_code, citation_pattern) {
            Ok(_) => valid += 1,
            Err(issue) => {
                invalid += 1;
                errors.push(format!("{source_id} item {index}: {issue}"));
            }
        }
    }

    CourtSourceValidation {
        source_id: source_id.to_string(),
        records_total: items.len(),
        records_valid: valid,
        records_invalid: invalid,
        errors,
    }
}

/// Validate a fetched payload for one of the three court sources. Returns
/// None for source ids without a registered validator.
pub fn validate_court_source_payload(
    source_id: &str,
    payload: &[u8],
) -> Option<CourtSourceValidation> {
    match source_id {
        "SCC_DECISIONS" => Some(validate_items(
            source_id,
            CourtCode::Scc,
            &SCC_CITATION,
            scc_raw_items(payload),
        )),
        "FC_DECISIONS" => Some(validate_items(
            source_id,
            CourtCode::Fc,
            &DECISIA_CITATION,
            decisia_raw_items(payload),
        )),
        "FCA_DECISIONS" => Some(validate_items(
            source_id,
            CourtCode::Fca,
            &DECISIA_CITATION,
            decisia_raw_items(payload),
        )),
        _ => None,
    }
}
