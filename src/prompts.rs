// =============================================================================
// prompts.rs - provider prompt templates
// =============================================================================
//
// The system prompt sets jurisdiction scope and the refusal rules; the QA
// template structures the answer around the grounding citations. Both are
// fixed texts; the runtime builder only interpolates the message, locale, and
// at most eight formatted citations.
// =============================================================================

use crate::models::Citation;

pub const SYSTEM_PROMPT: &str = "\
You are IMMCAD, an informational assistant for Canadian immigration and citizenship topics.

Purpose:
  Provide clear, source-grounded informational guidance.
  You are not a lawyer and do not provide legal advice or representation.

Jurisdiction scope:
  Canada only, with priority on federal immigration/citizenship sources:
  - Immigration and Refugee Protection Act (IRPA)
  - Immigration and Refugee Protection Regulations (IRPR)
  - Citizenship Act and related regulations
  - IRCC official operational guidance and ministerial instructions
  - Relevant Canadian case law when available

Rules:
  1. If a request asks for legal advice/representation, refuse and provide safe next steps.
  2. If context is insufficient, state limitations and ask a focused follow-up question.
  3. Prefer plain-language explanations, then cite the controlling source.
  4. Avoid speculation and avoid non-Canadian legal framing.
  5. Include escalation guidance to licensed counsel/RCIC for high-stakes decisions.";

pub const QA_PROMPT_HEADER: &str = "\
Answer the question using only the provided context.

Required response structure:
  1. Plain-language summary (2-5 bullets).
  2. Applicable rule(s): cite instrument + section/article when present.
  3. Practical next steps and document/process implications.
  4. Confidence level + when to consult licensed counsel/RCIC.

Guardrails:
  - If no reliable grounding exists in context, return a safe refusal.
  - Do not invent citations.
  - Do not output legal representation advice.";

const MAX_PROMPT_CITATIONS: usize = 8;

/// Render citations as context lines: `- [SOURCE_ID] Title (pin) url Excerpt: "..."`.
fn format_prompt_citations(citations: &[Citation]) -> String {
    if citations.is_empty() {
        return "- No grounded citations were provided.".to_string();
    }

    citations
        .iter()
        .take(MAX_PROMPT_CITATIONS)
        .map(|citation| {
            let source_id = non_empty_or(&citation.source_id, "SOURCE");
            let title = non_empty_or(&citation.title, "Untitled citation");
            let pin = non_empty_or(&citation.pin, "n/a");
            let mut line = format!("- [{source_id}] {title} ({pin})");
            let url = citation.url.trim();
            if !url.is_empty() {
                line.push(' ');
                line.push_str(url);
            }
            let snippet = citation.snippet.trim();
            if !snippet.is_empty() {
                line.push_str(&format!(" Excerpt: \"{snippet}\""));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback
    } else {
        trimmed
    }
}

/// Build the (system, user) prompt pair for a provider call.
pub fn build_runtime_prompts(
    message: &str,
    citations: &[Citation],
    locale: &str,
) -> (String, String) {
    let context = format!(
        "User locale: {locale}\nGrounded citations:\n{}",
        format_prompt_citations(citations)
    );
    let user_prompt = format!(
        "{QA_PROMPT_HEADER}\n\nQuestion: {}\n\nRelevant Context:\n{context}",
        message.trim()
    );
    (SYSTEM_PROMPT.to_string(), user_prompt)
}

/// Single-string variant for providers without a distinct system role.
pub fn build_combined_runtime_prompt(message: &str, citations: &[Citation], locale: &str) -> String {
    let (system_prompt, user_prompt) = build_runtime_prompts(message, citations, locale);
    format!("{system_prompt}\n\n{user_prompt}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn citation(id: &str) -> Citation {
        Citation {
            source_id: id.into(),
            title: format!("Title for {id}"),
            url: format!("https://laws-lois.justice.gc.ca/{id}"),
            pin: "s. 1".into(),
            snippet: "snippet text".into(),
        }
    }

    #[test]
    fn prompt_contains_question_locale_and_citations() {
        let (system_prompt, user_prompt) = build_runtime_prompts(
            "  What is section 11?  ",
            &[citation("IRPA")],
            "en-CA",
        );
        assert!(system_prompt.contains("Canadian immigration"));
        assert!(user_prompt.contains("Question: What is section 11?"));
        assert!(user_prompt.contains("User locale: en-CA"));
        assert!(user_prompt.contains("[IRPA] Title for IRPA (s. 1)"));
        assert!(user_prompt.contains("Excerpt: \"snippet text\""));
    }

    #[test]
    fn citation_formatting_caps_at_eight() {
        let citations: Vec<Citation> = (0..12).map(|i| citation(&format!("SRC{i}"))).collect();
        let formatted = format_prompt_citations(&citations);
        assert_eq!(formatted.lines().count(), 8);
    }

    #[test]
    fn empty_citation_list_notes_the_absence() {
        let formatted = format_prompt_citations(&[]);
        assert!(formatted.contains("No grounded citations"));
    }
}
