//! DeepSearch: comprehensive multi-phase report.
//!
//! | Phase | Work | Progress phase |
//! |-------|------|----------------|
//! | 1 | LLM query expansion (5-8 queries) | `expand` |
//! | 2 | search every query, dedupe to `deepsearch.max_sources` | `search` |
//! | 3 | bounded worker-pool fetch, or snippet sources | `fetch` |
//! | 4 | chunk relevance ranking | `analyze` |
//! | 5 | structured report synthesis and parsing | `report` |
//!
//! Phase 3 depends on `deepsearch.fetch_mode`: `fetch` always runs the
//! pool, `snippets` builds single-chunk documents from search snippets,
//! `auto` fetches for blocking calls and uses snippets when streaming.
//! If the pool returns nothing the run continues from snippets.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use answer_engine_core::citation::enhance_citations;
use answer_engine_core::models::{
    Chunk, Citation, DeepSearchReport, DeepSearchResponse, Document, Query, SearchResult, Source,
};
use answer_engine_core::report::{parse_report, SectionTracker};
use answer_engine_core::text::{parse_expanded_queries, truncate};

use crate::config::FetchMode;
use crate::deep::relevant_chunks;
use crate::error::{EngineError, EngineResult};
use crate::events::StreamEvent;
use crate::fetch_pool::{self, PoolOptions};
use crate::llm::ChatRequest;
use crate::related;
use crate::run::RunContext;

const REPORT_CHUNKS: usize = 30;
const REPORT_CHUNK_CHARS: usize = 800;
const SNIPPET_CHARS: usize = 200;

const EXPAND_SYSTEM: &str = "You plan comprehensive web research.";

const REPORT_SYSTEM: &str = "You are an expert research analyst writing a comprehensive report \
from numbered sources. Cite sources inline as [n]. Be specific and factual.";

async fn expand_queries(ctx: &RunContext, query: &str) -> EngineResult<Vec<String>> {
    let prompt = format!(
        "Generate 5-8 diverse search queries to research this topic comprehensively. Cover \
         background and fundamentals, recent developments, expert opinions, comparisons with \
         alternatives, and practical applications. Output one query per line with no numbering \
         or commentary.\n\nTopic: {}",
        query
    );
    let raw = ctx
        .complete(
            ChatRequest::prompt(EXPAND_SYSTEM, prompt)
                .max_tokens(512)
                .temperature(0.5),
        )
        .await?;
    Ok(parse_expanded_queries(&raw, query))
}

/// Run every query, keep the first `max` distinct URLs. Per-query failures
/// are skipped unless all fail.
async fn search_and_dedupe(
    ctx: &RunContext,
    queries: &[String],
    max: usize,
) -> EngineResult<Vec<SearchResult>> {
    let total = queries.len();
    let mut seen = HashSet::new();
    let mut results = Vec::new();
    let mut last_err = None;
    let mut any_ok = false;

    for (i, q) in queries.iter().enumerate() {
        match ctx.search(q, ctx.config.search.results_per_query).await {
            Ok(resp) => {
                any_ok = true;
                for r in resp.results {
                    if results.len() >= max {
                        break;
                    }
                    if !r.url.is_empty() && seen.insert(r.url.clone()) {
                        results.push(r);
                    }
                }
            }
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => {
                tracing::warn!(query = %q, error = %e, "expanded query search failed, skipping");
                last_err = Some(e);
            }
        }
        ctx.sink
            .emit(StreamEvent::progress_count(
                "search",
                format!("Searched {} of {} queries", i + 1, total),
                i + 1,
                total,
            ))
            .await;
    }

    match (any_ok, last_err) {
        (false, Some(e)) => Err(e),
        _ => Ok(results),
    }
}

fn snippet_document(r: &SearchResult) -> Document {
    Document {
        url: r.url.clone(),
        title: r.title.clone(),
        chunks: vec![Chunk {
            url: r.url.clone(),
            text: r.snippet.clone(),
        }],
        fetched_at: chrono::Utc::now(),
    }
}

async fn gather_documents(
    ctx: &RunContext,
    results: &[SearchResult],
) -> EngineResult<Vec<Document>> {
    let cfg = &ctx.config.deepsearch;
    if cfg.fetch_mode.resolve(ctx.streaming()) == FetchMode::Snippets {
        ctx.sink
            .progress("fetch", "Using search snippets as sources")
            .await;
        return Ok(results.iter().map(snippet_document).collect());
    }

    ctx.sink
        .progress("fetch", format!("Fetching {} sources", results.len()))
        .await;
    let urls = results.iter().map(|r| r.url.clone()).collect();
    let docs = fetch_pool::fetch_all(
        ctx.services.fetch.clone(),
        urls,
        PoolOptions {
            workers: cfg.worker_pool,
            fetch_timeout: cfg.fetch_timeout(),
        },
        ctx.cancel.clone(),
        ctx.sink.clone(),
    )
    .await;
    if ctx.cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    tracing::info!(requested = results.len(), fetched = docs.len(), "fetch phase complete");

    if docs.is_empty() {
        tracing::warn!("no sources fetched, continuing from search snippets");
        return Ok(results.iter().map(snippet_document).collect());
    }
    Ok(docs
        .into_iter()
        .filter(|d| !d.chunks.is_empty())
        .collect())
}

/// Citation snippet: best-ranked chunk for the source, else its first chunk.
fn build_citations(sources: &[Source], ranked: &[Chunk]) -> Vec<Citation> {
    let mut citations: Vec<Citation> = sources
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let text = ranked
                .iter()
                .find(|c| c.url == s.url)
                .map(|c| c.text.as_str())
                .or_else(|| s.chunks.first().map(String::as_str))
                .unwrap_or("");
            Citation::new(i + 1, &s.url, &s.title, truncate(text, SNIPPET_CHARS))
        })
        .collect();
    enhance_citations(&mut citations);
    citations
}

fn report_prompt(query: &str, sources: &[Source], ranked: &[Chunk], sections: usize) -> String {
    let index: HashMap<&str, (usize, &str)> = sources
        .iter()
        .enumerate()
        .map(|(i, s)| (s.url.as_str(), (i + 1, s.title.as_str())))
        .collect();

    let excerpts: Vec<String> = ranked
        .iter()
        .filter_map(|c| {
            index.get(c.url.as_str()).map(|(n, title)| {
                format!("[{}] {}\n{}", n, title, truncate(&c.text, REPORT_CHUNK_CHARS))
            })
        })
        .take(REPORT_CHUNKS)
        .collect();

    format!(
        "Research topic: {query}\n\n\
         Source excerpts:\n{excerpts}\n\n\
         Write a comprehensive research report using exactly this structure:\n\n\
         ## Overview\n\
         A 2-3 paragraph executive summary.\n\n\
         ## Key Findings\n\
         - One bullet per key finding, with citations.\n\n\
         ## Detailed Analysis\n\
         At least {sections} subsections, each introduced by a `### ` heading naming the aspect.\n\n\
         ## Methodology\n\
         A short note on the sources consulted and their limitations.",
        excerpts = excerpts.join("\n\n"),
    )
}

pub async fn run(ctx: &RunContext, query: &Query) -> EngineResult<DeepSearchResponse> {
    let started = Instant::now();
    let cfg = &ctx.config.deepsearch;

    // 1. Expansion
    ctx.sink.progress("expand", "Planning research queries").await;
    let queries = expand_queries(ctx, &query.text).await?;
    ctx.sink
        .progress("expand", format!("Generated {} queries", queries.len()))
        .await;

    // 2. Search & dedupe
    let results = search_and_dedupe(ctx, &queries, cfg.max_sources).await?;
    ctx.sink
        .progress("search", format!("Found {} distinct sources", results.len()))
        .await;

    // 3. Fetch
    let docs = gather_documents(ctx, &results).await?;
    let sources: Vec<Source> = docs.iter().map(Source::from_document).collect();
    for s in &sources {
        ctx.emit_source(&s.url, &s.title).await;
    }

    // 4. Rank
    ctx.sink.progress("analyze", "Ranking source passages").await;
    let limit = cfg.analysis_depth.max(1) * docs.len().max(1);
    let ranked = relevant_chunks(ctx, &docs, &query.text, limit).await?;
    ctx.sink
        .progress("analyze", format!("Selected {} passages", ranked.len()))
        .await;

    let citations = build_citations(&sources, &ranked);
    for c in &citations {
        ctx.sink
            .emit(StreamEvent::Citation {
                citation: c.clone(),
            })
            .await;
    }

    // 5. Report
    ctx.sink.progress("report", "Writing report").await;
    let request = ChatRequest::prompt(
        REPORT_SYSTEM,
        report_prompt(&query.text, &sources, &ranked, cfg.report_sections),
    )
    .max_tokens(4096)
    .temperature(0.5);
    let mut tracker = SectionTracker::new();
    let raw = ctx.answer_tracked(request, Some(&mut tracker)).await?;
    let report: DeepSearchReport = parse_report(&raw);
    tracing::debug!(
        sections = report.sections.len(),
        findings = report.key_findings.len(),
        "report parsed"
    );

    let summary = if report.overview.is_empty() {
        raw.as_str()
    } else {
        report.overview.as_str()
    };
    let (related_questions, follow_ups) =
        related::generate(ctx, &query.text, summary, &citations).await;

    Ok(DeepSearchResponse {
        query: query.text.clone(),
        report,
        citations,
        sources,
        related_questions,
        follow_ups,
        session_id: query.session_id.clone().unwrap_or_default(),
        usage: ctx.usage(),
        duration_ms: started.elapsed().as_millis() as u64,
        from_cache: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(url: &str, chunks: &[&str]) -> Source {
        Source {
            url: url.into(),
            title: format!("Title {}", url),
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            fetched_at: chrono::Utc::now(),
        }
    }

    fn chunk(url: &str, text: &str) -> Chunk {
        Chunk {
            url: url.into(),
            text: text.into(),
        }
    }

    #[test]
    fn test_citation_prefers_ranked_chunk() {
        let sources = vec![
            source("https://a.com/x", &["first a"]),
            source("https://b.org/y", &["first b"]),
        ];
        let ranked = vec![chunk("https://a.com/x", "best a")];
        let c = build_citations(&sources, &ranked);
        assert_eq!(c[0].snippet, "best a");
        assert_eq!(c[1].snippet, "first b");
        assert_eq!(c[1].index, 2);
        assert_eq!(c[1].domain, "b.org");
    }

    #[test]
    fn test_report_prompt_numbers_by_source() {
        let sources = vec![source("https://a.com", &[]), source("https://b.com", &[])];
        let ranked = vec![chunk("https://b.com", "beta"), chunk("https://z.com", "orphan")];
        let p = report_prompt("topic", &sources, &ranked, 3);
        assert!(p.contains("[2] Title https://b.com\nbeta"));
        assert!(!p.contains("orphan"));
        assert!(p.contains("At least 3 subsections"));
    }

    #[test]
    fn test_snippet_document_has_one_chunk() {
        let d = snippet_document(&SearchResult {
            url: "https://a.com".into(),
            title: "A".into(),
            snippet: "text".into(),
        });
        assert_eq!(d.chunks.len(), 1);
        assert_eq!(d.chunks[0].url, "https://a.com");
    }
}
