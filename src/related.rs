//! Related-question generation.
//!
//! A second, smaller LLM call after the answer proposes five categorized
//! follow-ups. It runs on the auxiliary (quick-mode) provider. Any failure
//! here yields an empty list; it never fails the request.

use answer_engine_core::models::{Citation, RelatedQuestion};
use answer_engine_core::text::{parse_related_questions, truncate};

use crate::llm::ChatRequest;
use crate::run::RunContext;

const SYSTEM: &str = "You suggest follow-up search queries. Output only the five requested lines.";

fn prompt(query: &str, answer: &str, citations: &[Citation]) -> String {
    let sources: String = citations
        .iter()
        .take(5)
        .map(|c| format!("- {}\n", c.title))
        .collect();
    format!(
        "You are generating follow-up search queries for a user who just searched about: \"{query}\"\n\n\
         Here's a summary of what they learned:\n{summary}\n\n\
         Sources consulted:\n{sources}\n\
         Generate 5 follow-up questions a curious user would want to explore next. Each must be \
         specific, searchable, and build on what the user just learned.\n\n\
         Categories:\n\
         1. DEEPER: more detail about a specific aspect mentioned\n\
         2. RELATED: a connected topic, person, or concept\n\
         3. BACKGROUND: history, origins, or context\n\
         4. COMPARISON: similar things or alternatives\n\
         5. CURRENT: recent news, updates, or future developments\n\n\
         Format each line exactly as CATEGORY: question",
        summary = truncate(answer, 500),
    )
}

/// Generate related questions; returns `(questions, flat follow-up texts)`.
pub async fn generate(
    ctx: &RunContext,
    query: &str,
    answer: &str,
    citations: &[Citation],
) -> (Vec<RelatedQuestion>, Vec<String>) {
    if answer.trim().is_empty() {
        return (Vec::new(), Vec::new());
    }
    let request = ChatRequest::prompt(SYSTEM, prompt(query, answer, citations))
        .max_tokens(512)
        .temperature(0.6);
    match ctx.complete_aux(request).await {
        Ok(raw) => {
            let questions = parse_related_questions(&raw);
            let follow_ups = questions.iter().map(|q| q.text.clone()).collect();
            (questions, follow_ups)
        }
        Err(e) => {
            tracing::warn!(error = %e, "related question generation failed");
            (Vec::new(), Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_lists_at_most_five_sources() {
        let cites: Vec<Citation> = (1..=7)
            .map(|i| Citation::new(i, format!("https://s{}.com", i), format!("Source {}", i), ""))
            .collect();
        let p = prompt("rust", "Rust is a language.", &cites);
        assert!(p.contains("- Source 5\n"));
        assert!(!p.contains("Source 6"));
        assert!(p.contains("CATEGORY: question"));
    }
}
