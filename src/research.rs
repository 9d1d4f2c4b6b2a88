//! Research mode.
//!
//! Two strategies, chosen by `engine.research_strategy`:
//!
//! | Strategy | Behaviour |
//! |----------|-----------|
//! | `agentic` | plan, then up to `max_iterations` LLM-chosen actions (search / fetch / note / answer) |
//! | `multi_query` | search three fixed query variants and synthesize directly |
//! | `auto` | `agentic` for blocking calls, `multi_query` for streaming calls |
//!
//! # Agentic loop
//!
//! ```text
//! plan ──▶ ┌─ propose action ─┐
//!          │   search → notes  │  (≤ max_iterations)
//!          │   fetch  → notes  │
//!          │   note   → notes  │
//!          └── answer ─────────┼──▶ citations → related → Response
//!        budget exhausted ─────┴──▶ forced synthesis over notes
//! ```
//!
//! A failed action-proposal call ends the loop early and falls through to
//! forced synthesis. Unparseable actions are no-ops that still consume an
//! iteration.

use std::collections::HashSet;

use answer_engine_core::action::AgentAction;
use answer_engine_core::citation::enhance_citations;
use answer_engine_core::models::{
    Citation, Query, ReasoningStep, Response, SearchResult, Source, StepKind,
};
use answer_engine_core::text::truncate;

use crate::config::ResearchStrategy;
use crate::error::{EngineError, EngineResult};
use crate::events::StreamEvent;
use crate::llm::ChatRequest;
use crate::related;
use crate::run::RunContext;

const NEW_RESULTS_PER_SEARCH: usize = 5;
const FETCH_NOTE_CHARS: usize = 300;
const VARIANT_RESULTS: usize = 3;

const PLAN_SYSTEM: &str = "You are a meticulous research agent planning an investigation.";

const ACTION_SYSTEM: &str = "You are a research agent. Reply with exactly one action on a \
single line, using one of these forms:\n\
search: <web search query>\n\
fetch: <url to read>\n\
note: <observation to remember>\n\
answer: <final, complete answer with [n] citations>\n\
Choose answer only when the notes are sufficient.";

const SYNTHESIS_SYSTEM: &str = "You are a research assistant. Write a comprehensive, well \
structured answer from the research notes. Cite sources inline as [n] using the numbers in the \
notes.";

/// Mutable loop state.
#[derive(Default)]
struct ResearchState {
    notes: Vec<String>,
    seen: HashSet<String>,
    sources: Vec<Source>,
}

impl ResearchState {
    /// Add a result as a source unless its URL was already seen. Returns
    /// the 1-based source number when added.
    fn add_result(&mut self, r: &SearchResult) -> Option<usize> {
        if r.url.is_empty() || !self.seen.insert(r.url.clone()) {
            return None;
        }
        self.sources.push(Source::from_result(r));
        Some(self.sources.len())
    }

    fn context(&self, question: &str, plan: &str) -> String {
        let notes = if self.notes.is_empty() {
            "(none yet)".to_string()
        } else {
            self.notes.join("\n")
        };
        format!("Question: {}\n\nPlan:\n{}\n\nNotes:\n{}", question, plan, notes)
    }
}

fn citations_from_sources(sources: &[Source]) -> Vec<Citation> {
    let mut citations: Vec<Citation> = sources
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let snippet = s.chunks.first().map(|c| truncate(c, 200)).unwrap_or_default();
            Citation::new(i + 1, &s.url, &s.title, snippet)
        })
        .collect();
    enhance_citations(&mut citations);
    citations
}

async fn execute(
    ctx: &RunContext,
    state: &mut ResearchState,
    action: &AgentAction,
) -> EngineResult<String> {
    match action {
        AgentAction::Search(q) => match ctx.search(q, ctx.config.search.results_per_query).await {
            Ok(resp) => {
                let mut added = 0;
                for r in &resp.results {
                    if added >= NEW_RESULTS_PER_SEARCH {
                        break;
                    }
                    if let Some(n) = state.add_result(r) {
                        state.notes.push(format!("[{}] {}: {}", n, r.title, r.snippet));
                        ctx.emit_source(&r.url, &r.title).await;
                        added += 1;
                    }
                }
                Ok(format!("{} new results", added))
            }
            Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
            Err(e) => {
                state.notes.push(format!("Observation: search for '{}' failed", q));
                Ok(e.to_string())
            }
        },
        AgentAction::Fetch(url) => match ctx.fetch(url).await {
            Ok(doc) => {
                let first = doc.chunks.first().map(|c| c.text.as_str()).unwrap_or("");
                let n = if state.seen.insert(doc.url.clone()) {
                    state.sources.push(Source::from_document(&doc));
                    ctx.emit_source(&doc.url, &doc.title).await;
                    state.sources.len()
                } else {
                    state
                        .sources
                        .iter()
                        .position(|s| s.url == doc.url)
                        .map(|p| p + 1)
                        .unwrap_or(0)
                };
                state
                    .notes
                    .push(format!("[{}] {}: {}", n, doc.title, truncate(first, FETCH_NOTE_CHARS)));
                Ok(format!("{} chunks", doc.chunks.len()))
            }
            Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
            Err(e) => {
                state.notes.push(format!("Observation: could not fetch {}", url));
                Ok(e.to_string())
            }
        },
        AgentAction::Note(text) => {
            state.notes.push(format!("Observation: {}", text));
            Ok("noted".to_string())
        }
        AgentAction::Answer(_) => Ok("answering".to_string()),
        AgentAction::Unknown(raw) => {
            tracing::debug!(raw = %truncate(raw, 80), "unrecognised agent action");
            Ok("ignored".to_string())
        }
    }
}

/// Run the agentic loop.
pub async fn run_agentic(ctx: &RunContext, query: &Query) -> EngineResult<Response> {
    let mut reasoning = Vec::new();
    let mut state = ResearchState::default();

    let plan = ctx
        .complete(
            ChatRequest::prompt(
                PLAN_SYSTEM,
                format!(
                    "Question: {}\n\nTools available: search (web search), fetch (read a URL), \
                     note (record an observation), answer (finish).\n\
                     Write a short numbered plan of 3-5 steps to answer the question.",
                    query.text
                ),
            )
            .max_tokens(512)
            .temperature(0.5),
        )
        .await?;
    ctx.step(
        &mut reasoning,
        ReasoningStep::new(StepKind::Plan, query.text.clone(), plan.clone()),
    )
    .await;

    let mut final_answer: Option<String> = None;
    for iteration in 0..ctx.config.engine.max_iterations {
        let request = ChatRequest::prompt(
            ACTION_SYSTEM,
            format!("{}\n\nNext action:", state.context(&query.text, &plan)),
        )
        .max_tokens(256)
        .temperature(0.5);

        let raw = match ctx.complete(request).await {
            Ok(raw) => raw,
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => {
                tracing::warn!(iteration, error = %e, "action proposal failed, synthesizing from notes");
                break;
            }
        };

        let action = AgentAction::parse(&raw);
        let outcome = execute(ctx, &mut state, &action).await?;
        ctx.step(
            &mut reasoning,
            ReasoningStep::new(StepKind::Action, truncate(raw.trim(), 200), outcome),
        )
        .await;

        if let AgentAction::Answer(text) = action {
            final_answer = Some(text);
            break;
        }
    }

    let answer = match final_answer {
        Some(text) => {
            ctx.sink.token(text.clone()).await;
            text
        }
        None => {
            let request = ChatRequest::prompt(
                SYNTHESIS_SYSTEM,
                format!("{}\n\nWrite the final answer.", state.context(&query.text, &plan)),
            )
            .max_tokens(2048)
            .temperature(0.7);
            let answer = ctx.answer(request).await?;
            ctx.step(
                &mut reasoning,
                ReasoningStep::new(
                    StepKind::Synthesize,
                    format!("{} notes", state.notes.len()),
                    truncate(&answer, 200),
                ),
            )
            .await;
            answer
        }
    };

    finish(ctx, query, answer, state.sources, reasoning).await
}

/// Search three fixed query variants and synthesize directly.
pub async fn run_multi_query(ctx: &RunContext, query: &Query) -> EngineResult<Response> {
    let mut reasoning = Vec::new();
    let variants = vec![
        query.text.clone(),
        format!("{} explained", query.text),
        format!("{} overview", query.text),
    ];

    let mut state = ResearchState::default();
    let mut last_err = None;
    for v in &variants {
        match ctx.search(v, ctx.config.search.results_per_query).await {
            Ok(resp) => {
                let mut added = 0;
                for r in resp.results.iter().take(VARIANT_RESULTS) {
                    if let Some(n) = state.add_result(r) {
                        state.notes.push(crate::quick::context_entry(n, &r.title, &r.snippet, &r.url));
                        ctx.emit_source(&r.url, &r.title).await;
                        added += 1;
                    }
                }
                ctx.step(
                    &mut reasoning,
                    ReasoningStep::new(StepKind::Search, v.clone(), format!("{} new results", added)),
                )
                .await;
            }
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => {
                tracing::warn!(query = %v, error = %e, "variant search failed, skipping");
                last_err = Some(e);
            }
        }
    }
    if state.sources.is_empty() {
        if let Some(e) = last_err {
            return Err(e);
        }
    }

    let citations = citations_from_sources(&state.sources);
    for c in &citations {
        ctx.sink
            .emit(StreamEvent::Citation {
                citation: c.clone(),
            })
            .await;
    }

    let request = ChatRequest::prompt(
        SYNTHESIS_SYSTEM,
        format!(
            "Sources:\n{}\n\nQuestion: {}\n\nWrite a comprehensive answer.",
            state.notes.join("\n\n"),
            query.text
        ),
    )
    .max_tokens(2048)
    .temperature(0.7);
    let answer = ctx.answer(request).await?;
    ctx.step(
        &mut reasoning,
        ReasoningStep::new(
            StepKind::Synthesize,
            format!("{} sources", state.sources.len()),
            truncate(&answer, 200),
        ),
    )
    .await;

    finish(ctx, query, answer, state.sources, reasoning).await
}

async fn finish(
    ctx: &RunContext,
    query: &Query,
    answer: String,
    sources: Vec<Source>,
    reasoning: Vec<ReasoningStep>,
) -> EngineResult<Response> {
    let citations = citations_from_sources(&sources);
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

/// Dispatch on the configured strategy.
pub async fn run(ctx: &RunContext, query: &Query) -> EngineResult<Response> {
    match ctx
        .config
        .engine
        .research_strategy
        .resolve(ctx.streaming())
    {
        ResearchStrategy::MultiQuery => run_multi_query(ctx, query).await,
        _ => run_agentic(ctx, query).await,
    }
}
