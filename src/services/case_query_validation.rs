// =============================================================================
// case_query_validation.rs - specificity predicate for case-law queries
// =============================================================================
//
// Research against the court feeds is expensive, so overly broad matter
// summaries are rejected before anything is fetched. A query is specific when
// it is a docket number outright, or when at least one meaningful token
// survives stopword filtering and carries a letter.
//
// The short-token allowlist keeps court and program acronyms (fc, scc, pr,
// ee) meaningful even though they are under three characters, which is what
// lets a bare neutral citation like "2026 FC 101" through.
// =============================================================================

use std::sync::LazyLock;

use regex::Regex;

static QUERY_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z0-9]+").unwrap());

/// Federal Court docket shapes: "A-1234-23", "imm-52-24", spaces tolerated
/// around the hyphens.
static DOCKET_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"^[a-z]{1,5}-\d{1,8}-\d{2,4}$").unwrap(),
        Regex::new(r"^[a-z]{1,5}\s*-\s*\d{1,8}\s*-\s*\d{2,4}$").unwrap(),
    ]
});

const QUERY_STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "be", "by", "for", "from", "how", "in", "is", "it", "of", "on", "or",
    "the", "to", "was", "what", "when", "where", "who", "why", "with",
];

const SHORT_TOKEN_ALLOWLIST: &[&str] = &["fc", "fca", "scc", "irpa", "irpr", "pr", "ee", "pnp"];

/// True when the query is specific enough to run against the case-law
/// sources.
pub fn is_specific_case_query(query: &str) -> bool {
    let normalized = query
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if DOCKET_PATTERNS
        .iter()
        .any(|pattern| pattern.is_match(&normalized))
    {
        return true;
    }

    let lowered = query.to_lowercase();
    let tokens: Vec<&str> = QUERY_TOKEN.find_iter(&lowered).map(|m| m.as_str()).collect();
    if tokens.is_empty() {
        return false;
    }

    let meaningful: Vec<&str> = tokens
        .into_iter()
        .filter(|token| {
            !QUERY_STOPWORDS.contains(token)
                && (token.len() >= 3 || SHORT_TOKEN_ALLOWLIST.contains(token))
        })
        .collect();
    if meaningful.is_empty() {
        return false;
    }
    meaningful
        .iter()
        .any(|token| token.chars().any(|c| c.is_ascii_alphabetic()))
}
