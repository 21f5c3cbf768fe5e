// =============================================================================
// policy.rs - refusal gate and citation enforcement
// =============================================================================
//
// Two safety rails live here.
//
// The refusal gate classifies messages that solicit legal representation,
// substitutive filing, personalized strategy, or outcome guarantees. The
// pattern list is fixed and ordered; adding a pattern requires adding both a
// positive and a negative test case below.
//
// Citation enforcement runs after the provider: an answer without at least
// one grounding citation never leaves the system as-is. It is replaced by a
// safe constrained response at low confidence.
// =============================================================================

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{Citation, Confidence};

pub const DISCLAIMER_TEXT: &str = "IMMCAD is an informational tool and not legal advice. \
     Consult a licensed Canadian immigration lawyer or RCIC for advice on your case.";

pub const POLICY_REFUSAL_TEXT: &str = "I can provide general informational guidance only. \
     I cannot provide personalized legal advice or represent you in legal proceedings.";

pub const SAFE_CONSTRAINED_RESPONSE: &str =
    "I do not have enough grounded legal context to answer safely. \
     Please refine your question or provide more details.";

/// Default trusted hosts for citation URLs in hardened mode. Operators can
/// replace the list via CITATION_TRUSTED_DOMAINS.
pub const DEFAULT_TRUSTED_CITATION_DOMAINS: &[&str] = &[
    "canada.ca",
    "gc.ca",
    "justice.gc.ca",
    "laws-lois.justice.gc.ca",
    "irb-cisr.gc.ca",
    "scc-csc.ca",
    "fct-cf.gc.ca",
    "fca-caf.gc.ca",
    "canlii.org",
];

/// Fixed, ordered refusal patterns. Matched against a whitespace-normalized,
/// lowercased message.
static BLOCKED_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\brepresent (?:me|my case)\b",
        r"\bbe my (?:representative|lawyer|counsel)\b",
        r"\bspeak for me\b",
        r"\b(?:appear|argue)(?: [a-z]+){0,6} for me\b",
        r"\b(?:handle|take over)(?: [a-z]+){0,6} my (?:case|appeal|hearing)\b",
        r"\bfile my(?: [a-z]+)* application\b",
        r"\b(?:submit|prepare)(?: [a-z]+){0,6} my (?:forms|documents|paperwork) for me\b",
        r"\b(?:fill out|complete|draft)(?: [a-z]+){0,6} my (?:forms|application|paperwork)\b",
        r"\b(?:file|submit|prepare)(?: [a-z]+){0,6} on my behalf\b",
        r"\bact as my (?:lawyer|counsel)\b",
        r"\b(?:personalized|personalised|tailored|custom)(?: [a-z]+){0,6} (?:strategy|plan|advice)\b",
        r"\b(?:strategy|plan)(?: [a-z]+){0,6} for my (?:case|situation|application)\b",
        r"\bguarantee(?: that i will get)?(?: [a-z]+){0,6} (?:visa|pr|permanent residence|citizenship|approval|success)\b",
        r"\b(?:promise|assure)(?: [a-z]+){0,6} (?:visa|pr|permanent residence|citizenship|approval|success)\b",
        r"\b(?:guarantee|promise|assure)(?: [a-z]+){0,8} (?:i(?:'ll| will) (?:be )?(?:approved|accepted)|approval)\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("refusal pattern is valid"))
    .collect()
});

/// Trigger substrings for the refusal prefilter. Every pattern above requires
/// at least one of these, so a miss here is a guaranteed non-match.
const REFUSAL_TRIGGERS: &[&str] = &[
    "represent",
    "lawyer",
    "counsel",
    "speak for",
    "appear",
    "argue",
    "handle",
    "take over",
    "file my",
    "submit",
    "prepare",
    "fill out",
    "complete",
    "draft",
    "behalf",
    "personal",
    "tailored",
    "custom",
    "strategy",
    "plan",
    "guarantee",
    "promise",
    "assure",
];

/// Collapse whitespace runs and lowercase, matching how the patterns were
/// authored.
fn normalize_message(message: &str) -> String {
    message
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// True when the message solicits representation, substitutive filing,
/// personalized strategy, or an outcome guarantee.
pub fn should_refuse_for_policy(message: &str) -> bool {
    let normalized = normalize_message(message);
    let bytes = normalized.as_bytes();

    // Byte-level prefilter before the regex pass.
    let has_trigger = REFUSAL_TRIGGERS
        .iter()
        .any(|trigger| memchr::memmem::find(bytes, trigger.as_bytes()).is_some());
    if !has_trigger {
        return false;
    }

    BLOCKED_PATTERNS
        .iter()
        .any(|pattern| pattern.is_match(&normalized))
}

/// Enforce grounding on the final answer. A grounded answer passes through at
/// medium confidence; an ungrounded one is replaced by the safe constrained
/// response at low confidence.
pub fn enforce_citation_requirement(
    answer: String,
    citations: Vec<Citation>,
) -> (String, Vec<Citation>, Confidence) {
    if citations.is_empty() {
        (SAFE_CONSTRAINED_RESPONSE.to_string(), Vec::new(), Confidence::Low)
    } else {
        (answer, citations, Confidence::Medium)
    }
}

/// Normalize a configured trusted-domain list: trim, lowercase, strip leading
/// dots, drop empties, dedupe preserving order.
pub fn normalize_trusted_domains(domains: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut normalized = Vec::new();
    for domain in domains {
        let cleaned = domain.trim().trim_start_matches('.').to_lowercase();
        if cleaned.is_empty() || !seen.insert(cleaned.clone()) {
            continue;
        }
        normalized.push(cleaned);
    }
    normalized
}

fn host_is_trusted(host: &str, trusted_domains: &[String]) -> bool {
    trusted_domains
        .iter()
        .any(|domain| host == domain || host.ends_with(&format!(".{domain}")))
}

/// Hardened-mode filter: drop citations whose URL host is not under a trusted
/// domain. An empty domain list disables the filter.
pub fn filter_citations_to_trusted_domains(
    citations: Vec<Citation>,
    trusted_domains: &[String],
) -> Vec<Citation> {
    if trusted_domains.is_empty() {
        return citations;
    }
    citations
        .into_iter()
        .filter(|citation| {
            url::Url::parse(&citation.url)
                .ok()
                .and_then(|parsed| parsed.host_str().map(|host| host.to_lowercase()))
                .map(|host| host_is_trusted(&host, trusted_domains))
                .unwrap_or(false)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn citation(url: &str) -> Citation {
        Citation {
            source_id: "IRPA".into(),
            title: "Immigration and Refugee Protection Act".into(),
            url: url.into(),
            pin: "s. 11".into(),
            snippet: "An officer shall issue a visa if...".into(),
        }
    }

    #[test]
    fn refuses_representation_requests() {
        assert!(should_refuse_for_policy("Please represent me before the IRB."));
        assert!(should_refuse_for_policy("Can you be my lawyer for the appeal?"));
        assert!(should_refuse_for_policy("Will you speak for me at the hearing?"));
    }

    #[test]
    fn refuses_substitutive_filing_requests() {
        assert!(should_refuse_for_policy("file my spousal sponsorship application"));
        assert!(should_refuse_for_policy("Could you submit the forms on my behalf?"));
        assert!(should_refuse_for_policy("fill out all of my forms please"));
    }

    #[test]
    fn refuses_personalized_strategy_and_guarantees() {
        assert!(should_refuse_for_policy("Give me a personalized strategy for approval"));
        assert!(should_refuse_for_policy("Build a winning plan for my case"));
        assert!(should_refuse_for_policy("Can you guarantee I will get PR?"));
        assert!(should_refuse_for_policy("promise me the visa will be approved"));
    }

    #[test]
    fn normalization_handles_case_and_whitespace() {
        assert!(should_refuse_for_policy("  REPRESENT   ME \n in federal court "));
    }

    #[test]
    fn allows_informational_questions() {
        assert!(!should_refuse_for_policy("What does IRPA section 11 say about visas?"));
        assert!(!should_refuse_for_policy("How long does Express Entry processing take?"));
        assert!(!should_refuse_for_policy("What documents are part of a PR card renewal?"));
        // "plan" alone, without the personalized framing, is informational.
        assert!(!should_refuse_for_policy("What is the Provincial Nominee Program plan?"));
    }

    #[test]
    fn grounded_answers_pass_at_medium_confidence() {
        let (answer, citations, confidence) = enforce_citation_requirement(
            "Informational answer.".into(),
            vec![citation("https://laws-lois.justice.gc.ca/eng/acts/i-2.5/")],
        );
        assert_eq!(answer, "Informational answer.");
        assert_eq!(citations.len(), 1);
        assert_eq!(confidence, Confidence::Medium);
    }

    #[test]
    fn ungrounded_answers_are_replaced() {
        let (answer, citations, confidence) =
            enforce_citation_requirement("Confident but unsourced claim.".into(), vec![]);
        assert_eq!(answer, SAFE_CONSTRAINED_RESPONSE);
        assert!(citations.is_empty());
        assert_eq!(confidence, Confidence::Low);
    }

    #[test]
    fn trusted_domain_filter_checks_host_suffixes() {
        let trusted = normalize_trusted_domains(&["canada.ca".into(), " .Justice.gc.ca ".into()]);
        let kept = filter_citations_to_trusted_domains(
            vec![
                citation("https://www.canada.ca/en/immigration-refugees-citizenship.html"),
                citation("https://laws-lois.justice.gc.ca/eng/acts/i-2.5/"),
                citation("https://evil.example/fake-irpa"),
                citation("not a url"),
            ],
            &trusted,
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn empty_trusted_domain_list_disables_the_filter() {
        let kept = filter_citations_to_trusted_domains(vec![citation("https://anywhere.example/")], &[]);
        assert_eq!(kept.len(), 1);
    }
}
