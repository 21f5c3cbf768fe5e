// =============================================================================
// grounding.rs - citation candidate selection
// =============================================================================
//
// Grounding adapters map (message, locale, mode) onto an ordered list of
// candidate citations before the provider runs. Three implementations:
//
//   Static    the IRPA baseline, always. The floor every deployment has.
//   Keyword   an Aho-Corasick catalog of topic bundles; each automaton scans
//             the message once and contributes its citation bundle on a hit.
//             The baseline is always included first.
//   Retriever delegates to an external retrieval adapter and fills in the
//             gaps (portal URL, "n/a" pin) for fields the retriever omits.
// =============================================================================

use std::sync::Arc;

use aho_corasick::AhoCorasick;

use crate::models::{ChatLocale, ChatMode, Citation};

pub const FALLBACK_CITATION_URL: &str =
    "https://www.canada.ca/en/immigration-refugees-citizenship.html";
pub const FALLBACK_CITATION_PIN: &str = "n/a";

/// Capability: produce ordered citation candidates for a message.
pub trait GroundingAdapter: Send + Sync {
    fn citation_candidates(
        &self,
        message: &str,
        locale: ChatLocale,
        mode: ChatMode,
    ) -> Vec<Citation>;
}

/// The citation every grounded answer can fall back on.
pub fn baseline_citation() -> Citation {
    Citation {
        source_id: "IRPA".into(),
        title: "Immigration and Refugee Protection Act".into(),
        url: "https://laws-lois.justice.gc.ca/eng/acts/i-2.5/".into(),
        pin: "s. 11".into(),
        snippet: "An officer may issue a visa or other document where the foreign national \
                  is not inadmissible and meets the requirements of this Act."
            .into(),
    }
}

// =============================================================================
// Static adapter
// =============================================================================

pub struct StaticGroundingAdapter;

impl GroundingAdapter for StaticGroundingAdapter {
    fn citation_candidates(
        &self,
        _message: &str,
        _locale: ChatLocale,
        _mode: ChatMode,
    ) -> Vec<Citation> {
        vec![baseline_citation()]
    }
}

// =============================================================================
// Keyword adapter
// =============================================================================

/// One topic: a keyword automaton plus the citations it vouches for.
pub struct KeywordBundle {
    pub name: &'static str,
    automaton: AhoCorasick,
    citations: Vec<Citation>,
}

impl KeywordBundle {
    fn new(name: &'static str, keywords: &[&str], citations: Vec<Citation>) -> Self {
        let automaton = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(keywords)
            .expect("keyword bundle patterns are valid");
        Self {
            name,
            automaton,
            citations,
        }
    }

    fn matches(&self, message: &str) -> bool {
        self.automaton.find(message).is_some()
    }
}

fn citation(source_id: &str, title: &str, url: &str, pin: &str, snippet: &str) -> Citation {
    Citation {
        source_id: source_id.into(),
        title: title.into(),
        url: url.into(),
        pin: pin.into(),
        snippet: snippet.into(),
    }
}

/// The curated catalog for federal immigration and citizenship topics.
/// Catalog order is answer order; first match wins on ties.
pub fn official_grounding_catalog() -> Vec<KeywordBundle> {
    vec![
        KeywordBundle::new(
            "pr_card_residency",
            &[
                "pr card",
                "permanent resident card",
                "residency obligation",
                "renew my pr",
                "permanent residence card",
            ],
            vec![
                citation(
                    "IRPA",
                    "Immigration and Refugee Protection Act",
                    "https://laws-lois.justice.gc.ca/eng/acts/i-2.5/section-28.html",
                    "s. 28",
                    "A permanent resident must comply with a residency obligation with \
                     respect to every five-year period.",
                ),
                citation(
                    "IRCC_PDI",
                    "Permanent resident card: renewal guidance",
                    "https://www.canada.ca/en/immigration-refugees-citizenship/services/new-immigrants/pr-card/apply-renew-replace.html",
                    "PR card renewal guide",
                    "How to apply for, renew or replace a permanent resident card, \
                     including processing from outside Canada.",
                ),
            ],
        ),
        KeywordBundle::new(
            "express_entry",
            &[
                "express entry",
                "comprehensive ranking",
                "crs score",
                "invitation to apply",
                "ministerial instructions",
            ],
            vec![citation(
                "EE_MI_CURRENT",
                "Express Entry ministerial instructions",
                "https://www.canada.ca/en/immigration-refugees-citizenship/services/immigrate-canada/express-entry/submit-profile/rounds-invitations.html",
                "Current rounds of invitations",
                "Ministerial instructions govern Express Entry rounds of invitations and \
                 comprehensive ranking system cut-offs.",
            )],
        ),
        KeywordBundle::new(
            "citizenship",
            &[
                "citizenship",
                "naturalization",
                "naturalisation",
                "citizenship test",
                "oath of citizenship",
            ],
            vec![citation(
                "CIT_ACT",
                "Citizenship Act",
                "https://laws-lois.justice.gc.ca/eng/acts/c-29/section-5.html",
                "s. 5",
                "The Minister shall grant citizenship to any person who meets the residence \
                 and knowledge requirements of section 5.",
            )],
        ),
        KeywordBundle::new(
            "refugee_protection",
            &["refugee", "asylum", "persecution", "rpd", "refugee appeal"],
            vec![
                citation(
                    "IRPA",
                    "Immigration and Refugee Protection Act",
                    "https://laws-lois.justice.gc.ca/eng/acts/i-2.5/section-96.html",
                    "s. 96",
                    "A Convention refugee is a person who, by reason of a well-founded fear \
                     of persecution, is outside their country of nationality.",
                ),
                citation(
                    "IRB_RPD_RULES",
                    "Refugee Protection Division Rules",
                    "https://irb-cisr.gc.ca/en/legal-policy/act-rules-regulations/Pages/RpdSpr.aspx",
                    "RPD Rules",
                    "Procedural rules governing claims before the Refugee Protection Division.",
                ),
            ],
        ),
        KeywordBundle::new(
            "humanitarian_compassionate",
            &["humanitarian", "compassionate", "h&c"],
            vec![citation(
                "IRPA",
                "Immigration and Refugee Protection Act",
                "https://laws-lois.justice.gc.ca/eng/acts/i-2.5/section-25.html",
                "s. 25",
                "The Minister may grant relief on humanitarian and compassionate grounds, \
                 taking into account the best interests of a child directly affected.",
            )],
        ),
        KeywordBundle::new(
            "permits",
            &["work permit", "study permit", "lmia", "labour market impact"],
            vec![citation(
                "IRPR",
                "Immigration and Refugee Protection Regulations",
                "https://laws-lois.justice.gc.ca/eng/regulations/sor-2002-227/section-200.html",
                "s. 200",
                "An officer shall issue a work permit to a foreign national who meets the \
                 requirements of section 200 of the Regulations.",
            )],
        ),
    ]
}

pub struct KeywordGroundingAdapter {
    catalog: Vec<KeywordBundle>,
    max_citations: usize,
}

impl KeywordGroundingAdapter {
    pub fn new(catalog: Vec<KeywordBundle>, max_citations: usize) -> Self {
        Self {
            catalog,
            max_citations: max_citations.max(1),
        }
    }
}

impl GroundingAdapter for KeywordGroundingAdapter {
    fn citation_candidates(
        &self,
        message: &str,
        _locale: ChatLocale,
        _mode: ChatMode,
    ) -> Vec<Citation> {
        let mut citations = vec![baseline_citation()];
        let mut seen: Vec<(String, String)> = citations
            .iter()
            .map(|c| (c.source_id.clone(), c.pin.clone()))
            .collect();

        for bundle in &self.catalog {
            if citations.len() >= self.max_citations {
                break;
            }
            if !bundle.matches(message) {
                continue;
            }
            for candidate in &bundle.citations {
                if citations.len() >= self.max_citations {
                    break;
                }
                let key = (candidate.source_id.clone(), candidate.pin.clone());
                if seen.contains(&key) {
                    continue;
                }
                seen.push(key);
                citations.push(candidate.clone());
            }
        }
        citations
    }
}

// =============================================================================
// Retriever adapter
// =============================================================================

/// A snippet handed back by an external retrieval adapter.
#[derive(Debug, Clone)]
pub struct RetrievedDocument {
    pub text_snippet: String,
    pub source_id: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub pin: Option<String>,
}

/// Capability boundary to the external retrieval system.
pub trait ChatRetriever: Send + Sync {
    fn retrieve(&self, query: &str, locale: ChatLocale, top_k: usize) -> Vec<RetrievedDocument>;
}

/// No-op retriever preserving ungrounded behavior.
pub struct NullChatRetriever;

impl ChatRetriever for NullChatRetriever {
    fn retrieve(&self, _query: &str, _locale: ChatLocale, _top_k: usize) -> Vec<RetrievedDocument> {
        Vec::new()
    }
}

/// Fill retriever gaps with safe fallbacks and produce citations.
pub fn map_retrieved_documents_to_citations(documents: &[RetrievedDocument]) -> Vec<Citation> {
    documents
        .iter()
        .map(|document| Citation {
            source_id: document.source_id.clone(),
            title: document
                .title
                .clone()
                .unwrap_or_else(|| format!("Source: {}", document.source_id)),
            url: document
                .url
                .clone()
                .unwrap_or_else(|| FALLBACK_CITATION_URL.to_string()),
            pin: document
                .pin
                .clone()
                .unwrap_or_else(|| FALLBACK_CITATION_PIN.to_string()),
            snippet: document.text_snippet.clone(),
        })
        .collect()
}

pub struct RetrieverGroundingAdapter {
    retriever: Arc<dyn ChatRetriever>,
    max_citations: usize,
}

impl RetrieverGroundingAdapter {
    pub fn new(retriever: Arc<dyn ChatRetriever>, max_citations: usize) -> Self {
        Self {
            retriever,
            max_citations: max_citations.max(1),
        }
    }
}

impl GroundingAdapter for RetrieverGroundingAdapter {
    fn citation_candidates(
        &self,
        message: &str,
        locale: ChatLocale,
        _mode: ChatMode,
    ) -> Vec<Citation> {
        let documents = self.retriever.retrieve(message, locale, self.max_citations);
        let mut citations = map_retrieved_documents_to_citations(&documents);
        citations.truncate(self.max_citations);
        citations
    }
}
