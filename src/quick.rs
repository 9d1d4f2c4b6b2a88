//! Quick mode: single-pass retrieval-augmented generation.
//!
//! ```text
//!          ┌─ search(5) → context → answer (stream) ─┐
//! query ──┤                                          ├─ join → related → Response
//!          └─ image search ──────────────────────────┘
//! ```

use std::collections::HashSet;

use answer_engine_core::citation::enhance_citations;
use answer_engine_core::models::{
    Citation, ImageResult, Query, ReasoningStep, Response, SearchResult, Source, StepKind,
};

use crate::error::EngineResult;
use crate::events::StreamEvent;
use crate::llm::{ChatRequest, Message};
use crate::related;
use crate::run::RunContext;
use crate::traits::SearchOptions;

/// Results placed in the answer context.
pub const QUICK_RESULTS: usize = 5;

const SYSTEM: &str = "You are a search assistant. Answer the user's question using the numbered \
sources provided. Write a well-structured answer of several paragraphs, start with a direct \
answer, and cite sources inline as [1], [2] after the sentences they support. If the sources do \
not contain the answer, say so briefly and answer from general knowledge.";

/// Format one numbered context entry.
pub fn context_entry(index: usize, title: &str, text: &str, url: &str) -> String {
    format!("[{}] {}\n{}\nURL: {}", index, title, text, url)
}

/// Keep the first occurrence of each non-empty URL, up to `limit` results.
pub fn dedupe_results(results: Vec<SearchResult>, limit: usize) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| !r.url.is_empty() && seen.insert(r.url.clone()))
        .take(limit)
        .collect()
}

struct AnswerBranch {
    answer: String,
    citations: Vec<Citation>,
    sources: Vec<Source>,
    reasoning: Vec<ReasoningStep>,
}

async fn answer_branch(ctx: &RunContext, query: &Query) -> EngineResult<AnswerBranch> {
    let mut reasoning = Vec::new();
    let response = ctx.search(&query.text, ctx.config.search.results_per_query.max(QUICK_RESULTS)).await?;
    let results = dedupe_results(response.results, QUICK_RESULTS);
    ctx.step(
        &mut reasoning,
        ReasoningStep::new(
            StepKind::Search,
            query.text.clone(),
            format!("{} results", results.len()),
        ),
    )
    .await;

    let mut citations: Vec<Citation> = results
        .iter()
        .enumerate()
        .map(|(i, r)| Citation::new(i + 1, &r.url, &r.title, &r.snippet))
        .collect();
    enhance_citations(&mut citations);

    let sources: Vec<Source> = results.iter().map(Source::from_result).collect();
    for (c, s) in citations.iter().zip(&sources) {
        ctx.sink
            .emit(StreamEvent::Citation {
                citation: c.clone(),
            })
            .await;
        ctx.emit_source(&s.url, &s.title).await;
    }

    let context = results
        .iter()
        .enumerate()
        .map(|(i, r)| context_entry(i + 1, &r.title, &r.snippet, &r.url))
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut messages = vec![Message::system(SYSTEM)];
    messages.extend(ctx.history.iter().cloned());
    messages.push(Message::user(format!(
        "Sources:\n{}\n\nQuestion: {}",
        context, query.text
    )));

    let answer = ctx
        .answer(ChatRequest::new(messages).max_tokens(2048).temperature(0.7))
        .await?;

    Ok(AnswerBranch {
        answer,
        citations,
        sources,
        reasoning,
    })
}

/// Image results for the query. Failures yield an empty list.
async fn image_branch(ctx: &RunContext, text: &str) -> Vec<ImageResult> {
    let limit = ctx.config.search.images_per_query;
    if limit == 0 {
        return Vec::new();
    }
    match ctx
        .guard(
            ctx.services
                .search
                .search_images(text, SearchOptions::limit(limit)),
        )
        .await
    {
        Ok(Ok(images)) => images,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "image search failed");
            Vec::new()
        }
        Err(_) => Vec::new(),
    }
}

pub async fn run(ctx: &RunContext, query: &Query) -> EngineResult<Response> {
    let (branch, images) = tokio::join!(answer_branch(ctx, query), image_branch(ctx, &query.text));
    let branch = branch?;

    let (related_questions, follow_ups) =
        related::generate(ctx, &query.text, &branch.answer, &branch.citations).await;

    Ok(Response {
        answer: branch.answer,
        citations: branch.citations,
        follow_ups,
        related_questions,
        images,
        sources: branch.sources,
        reasoning: branch.reasoning,
        session_id: query.session_id.clone().unwrap_or_default(),
        mode: query.mode,
        usage: ctx.usage(),
        from_cache: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_entry_format() {
        assert_eq!(
            context_entry(2, "Title", "Snippet", "https://a.com"),
            "[2] Title\nSnippet\nURL: https://a.com"
        );
    }

    #[test]
    fn test_dedupe_results() {
        let r = |u: &str| SearchResult {
            url: u.into(),
            title: u.into(),
            snippet: String::new(),
        };
        let out = dedupe_results(vec![r("a"), r("b"), r("a"), r("c")], 2);
        let urls: Vec<&str> = out.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["a", "b"]);

        let out = dedupe_results(vec![r(""), r("a"), r(""), r("b")], 5);
        let urls: Vec<&str> = out.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["a", "b"]);
    }
}
