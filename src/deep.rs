//! Deep mode: decomposition, sub-search, fetch and synthesis.
//!
//! 1. Ask the LLM for 3-5 sub-questions (falls back to the query itself).
//! 2. Search each sub-question. A failed sub-search is skipped.
//! 3. Deduplicate URLs and fetch up to `engine.max_sources` pages.
//! 4. Rank chunks against the original query.
//! 5. Build ≤10 citations and run one large synthesis call.
//!
//! Every step is recorded in the reasoning trace and streamed as a
//! `thinking` event.

use std::collections::{HashMap, HashSet};

use answer_engine_core::citation::enhance_citations;
use answer_engine_core::models::{
    Chunk, Citation, Document, Query, ReasoningStep, Response, SearchResult, Source, StepKind,
};
use answer_engine_core::rank::rank_by_terms;
use answer_engine_core::text::{parse_sub_questions, truncate};
use futures_util::future::join_all;

use crate::error::{EngineError, EngineResult};
use crate::events::StreamEvent;
use crate::llm::{ChatRequest, Message};
use crate::related;
use crate::run::RunContext;

pub const MAX_CITATIONS: usize = 10;
const CONTEXT_CHARS: usize = 500;
const SNIPPET_CHARS: usize = 200;

const DECOMPOSE_SYSTEM: &str = "You break research questions into focused sub-questions.";

const SYNTHESIS_SYSTEM: &str = "You are a research assistant writing a thorough answer from \
numbered sources. Structure the answer with a short summary first, then sections with \
markdown headings covering each important aspect, then a brief conclusion. Cite sources inline \
as [1], [2]. Prefer specific facts, figures and dates from the sources. Note disagreements \
between sources when present.";

/// Ask the LLM to split `query` into sub-questions.
pub async fn decompose_query(ctx: &RunContext, query: &str) -> EngineResult<Vec<String>> {
    let prompt = format!(
        "Break this question into 3-5 specific sub-questions that together cover it fully. \
         Output one sub-question per line, no numbering or commentary.\n\nQuestion: {}",
        query
    );
    let raw = ctx
        .complete(
            ChatRequest::prompt(DECOMPOSE_SYSTEM, prompt)
                .max_tokens(256)
                .temperature(0.5),
        )
        .await?;
    Ok(parse_sub_questions(&raw, query))
}

/// Search every sub-query. Individual failures are skipped; if every
/// search fails the last error is returned.
pub async fn search_all(
    ctx: &RunContext,
    queries: &[String],
    steps: &mut Vec<ReasoningStep>,
) -> EngineResult<Vec<SearchResult>> {
    let limit = ctx.config.search.results_per_query;
    let mut results = Vec::new();
    let mut last_err = None;
    let mut any_ok = false;

    for q in queries {
        match ctx.search(q, limit).await {
            Ok(resp) => {
                any_ok = true;
                ctx.step(
                    steps,
                    ReasoningStep::new(
                        StepKind::Search,
                        q.clone(),
                        format!("{} results", resp.results.len()),
                    ),
                )
                .await;
                results.extend(resp.results);
            }
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => {
                tracing::warn!(query = %q, error = %e, "sub-query search failed, skipping");
                last_err = Some(e);
            }
        }
    }

    match (any_ok, last_err) {
        (false, Some(e)) => Err(e),
        _ => Ok(results),
    }
}

/// Keep the first occurrence of each URL.
pub fn dedupe_by_url(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| !r.url.is_empty() && seen.insert(r.url.clone()))
        .collect()
}

/// Fetch pages concurrently. Failed fetches are dropped.
async fn fetch_pages(
    ctx: &RunContext,
    results: &[SearchResult],
    steps: &mut Vec<ReasoningStep>,
) -> EngineResult<HashMap<String, Document>> {
    let outcomes = join_all(results.iter().map(|r| ctx.fetch(&r.url))).await;
    let mut docs = HashMap::new();
    for (r, outcome) in results.iter().zip(outcomes) {
        match outcome {
            Ok(doc) => {
                ctx.step(
                    steps,
                    ReasoningStep::new(
                        StepKind::Fetch,
                        r.url.clone(),
                        format!("{} chunks", doc.chunks.len()),
                    ),
                )
                .await;
                docs.insert(r.url.clone(), doc);
            }
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => tracing::debug!(error = %e, "dropping source"),
        }
    }
    Ok(docs)
}

/// Relevant chunks from the fetch backend, or term-ranked chunks when the
/// backend has no relevance ranking.
pub async fn relevant_chunks(
    ctx: &RunContext,
    docs: &[Document],
    query: &str,
    limit: usize,
) -> EngineResult<Vec<Chunk>> {
    let ranked = match ctx
        .guard(ctx.services.fetch.relevant_chunks(docs, query, limit))
        .await?
    {
        Ok(chunks) => chunks,
        Err(e) => {
            tracing::debug!(error = %e, "relevance ranking failed");
            Vec::new()
        }
    };
    if !ranked.is_empty() {
        return Ok(ranked);
    }
    let all: Vec<Chunk> = docs.iter().flat_map(|d| d.chunks.iter().cloned()).collect();
    Ok(rank_by_terms(all, query, limit))
}

pub async fn run(ctx: &RunContext, query: &Query) -> EngineResult<Response> {
    let mut reasoning = Vec::new();

    let sub_queries = decompose_query(ctx, &query.text).await?;
    ctx.step(
        &mut reasoning,
        ReasoningStep::new(StepKind::Decompose, query.text.clone(), sub_queries.join("\n")),
    )
    .await;

    let results = search_all(ctx, &sub_queries, &mut reasoning).await?;
    let results: Vec<SearchResult> = dedupe_by_url(results)
        .into_iter()
        .take(ctx.config.engine.max_sources)
        .collect();

    let docs = fetch_pages(ctx, &results, &mut reasoning).await?;
    let doc_list: Vec<Document> = results
        .iter()
        .filter_map(|r| docs.get(&r.url).cloned())
        .collect();
    let chunks = relevant_chunks(ctx, &doc_list, &query.text, MAX_CITATIONS).await?;

    let mut citations = Vec::new();
    let mut sources = Vec::new();
    let mut context = Vec::new();
    for r in results.iter().take(MAX_CITATIONS) {
        let text = chunks
            .iter()
            .find(|c| c.url == r.url)
            .map(|c| c.text.clone())
            .unwrap_or_else(|| r.snippet.clone());
        let index = citations.len() + 1;
        context.push(crate::quick::context_entry(
            index,
            &r.title,
            &truncate(&text, CONTEXT_CHARS),
            &r.url,
        ));
        citations.push(Citation::new(index, &r.url, &r.title, truncate(&text, SNIPPET_CHARS)));
        sources.push(match docs.get(&r.url) {
            Some(doc) => Source::from_document(doc),
            None => Source::from_result(r),
        });
    }
    enhance_citations(&mut citations);
    for (c, s) in citations.iter().zip(&sources) {
        ctx.sink
            .emit(StreamEvent::Citation {
                citation: c.clone(),
            })
            .await;
        ctx.emit_source(&s.url, &s.title).await;
    }

    let mut messages = vec![Message::system(SYNTHESIS_SYSTEM)];
    messages.extend(ctx.history.iter().cloned());
    messages.push(Message::user(format!(
        "Sources:\n{}\n\nQuestion: {}",
        context.join("\n\n"),
        query.text
    )));
    let answer = ctx
        .answer(ChatRequest::new(messages).max_tokens(4096).temperature(0.7))
        .await?;
    ctx.step(
        &mut reasoning,
        ReasoningStep::new(
            StepKind::Synthesize,
            format!("{} sources", citations.len()),
            truncate(&answer, 200),
        ),
    )
    .await;

    let (related_questions, follow_ups) =
        related::generate(ctx, &query.text, &answer, &citations).await;

    Ok(Response {
        answer,
        citations,
        follow_ups,
        related_questions,
        images: Vec::new(),
        sources,
        reasoning,
        session_id: query.session_id.clone().unwrap_or_default(),
        mode: query.mode,
        usage: ctx.usage(),
        from_cache: false,
    })
}
