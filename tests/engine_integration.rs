//! End-to-end tests for the engine with scripted collaborators.
//!
//! Search, fetch and the language model are replaced by in-process mocks;
//! stores are the in-memory implementations. Every pipeline runs through
//! the public [`Engine`] surface exactly as the CLI and HTTP server drive it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use answer_engine::config::{Config, FetchMode, ResearchStrategy};
use answer_engine::engine::Engine;
use answer_engine::error::EngineError;
use answer_engine::events::StreamEvent;
use answer_engine::llm::{
    ChatRequest, ChatResponse, ChunkStream, LlmProvider, RemoteModel, StreamChunk,
};
use answer_engine::memory::{MemoryConversationStore, MemoryLogStore};
use answer_engine::models::{
    Chunk, Document, ImageResult, Mode, Query, SearchResponse, SearchResult, StepKind,
    TokenUsage,
};
use answer_engine::registry::{Capability, ModelInfo, Speed};
use answer_engine::traits::{FetchBackend, LogStatus, SearchBackend, SearchOptions};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;

// ─── Mock LLM ───────────────────────────────────────────────────────

const REPORT: &str = "## Overview\nQuantum computers use qubits [1].\n\
## Key Findings\n- Qubits hold superpositions\n- Error correction is hard\n\
## Detailed Analysis\n### Hardware\nSuperconducting circuits.\n### Algorithms\nShor and Grover.\n\
## Methodology\nSearched the web.";

const RELATED: &str = "DEEPER: How do superconducting qubits stay coherent?\n\
RELATED: What is quantum error correction?\n\
BACKGROUND: Who first proposed quantum computing?\n\
COMPARISON: How do quantum and classical computers differ?\n\
CURRENT: What are the latest quantum computing milestones?";

/// Answers every prompt with `reply`, except the report and related
/// question prompts, which get canned well-formed output.
struct ScriptedLlm {
    reply: String,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn respond(&self, request: &ChatRequest) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt: String = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if prompt.contains("Source excerpts:") {
            REPORT.to_string()
        } else if prompt.contains("follow-up search queries") {
            RELATED.to_string()
        } else {
            self.reply.clone()
        }
    }
}

fn usage() -> TokenUsage {
    TokenUsage {
        input_tokens: 10,
        output_tokens: 5,
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse> {
        Ok(ChatResponse {
            choices: vec![self.respond(&request)],
            usage: usage(),
        })
    }

    async fn chat_completion_stream(&self, request: ChatRequest) -> Result<ChunkStream> {
        let text = self.respond(&request);
        let mid = text
            .char_indices()
            .nth(text.chars().count() / 2)
            .map(|(i, _)| i)
            .unwrap_or(0);
        let chunks = vec![
            Ok(StreamChunk {
                delta: text[..mid].to_string(),
                usage: None,
            }),
            Ok(StreamChunk {
                delta: text[mid..].to_string(),
                usage: Some(usage()),
            }),
        ];
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }

    async fn list_models(&self) -> Result<Vec<RemoteModel>> {
        Ok(vec![RemoteModel {
            id: "scripted-1".into(),
            owned_by: "test".into(),
        }])
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

// ─── Mock search & fetch ────────────────────────────────────────────

/// Returns `count` results per query. Every query yields the same URLs.
struct FixedSearch {
    count: usize,
}

#[async_trait]
impl SearchBackend for FixedSearch {
    async fn search(&self, _query: &str, options: SearchOptions) -> Result<SearchResponse> {
        let results: Vec<SearchResult> = (1..=self.count)
            .take(options.limit)
            .map(|i| SearchResult {
                url: format!("https://site{}.example.com/page", i),
                title: format!("Result {}", i),
                snippet: format!("Quantum computing snippet number {}", i),
            })
            .collect();
        Ok(SearchResponse {
            total_results: results.len() as u64,
            results,
        })
    }

    async fn search_images(
        &self,
        _query: &str,
        _options: SearchOptions,
    ) -> Result<Vec<ImageResult>> {
        Ok(Vec::new())
    }
}

struct FailingSearch;

#[async_trait]
impl SearchBackend for FailingSearch {
    async fn search(&self, _query: &str, _options: SearchOptions) -> Result<SearchResponse> {
        anyhow::bail!("search backend unreachable")
    }

    async fn search_images(
        &self,
        _query: &str,
        _options: SearchOptions,
    ) -> Result<Vec<ImageResult>> {
        anyhow::bail!("search backend unreachable")
    }
}

/// Never answers. Flags when a search starts and when its future is dropped.
#[derive(Default)]
struct HangingSearch {
    started: tokio::sync::Notify,
    dropped: Arc<AtomicBool>,
}

struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SearchBackend for HangingSearch {
    async fn search(&self, _query: &str, _options: SearchOptions) -> Result<SearchResponse> {
        let _flag = SetOnDrop(self.dropped.clone());
        self.started.notify_one();
        std::future::pending::<Result<SearchResponse>>().await
    }

    async fn search_images(
        &self,
        _query: &str,
        _options: SearchOptions,
    ) -> Result<Vec<ImageResult>> {
        std::future::pending::<Result<Vec<ImageResult>>>().await
    }
}

struct StaticFetch;

#[async_trait]
impl FetchBackend for StaticFetch {
    async fn fetch(&self, url: &str) -> Result<Document> {
        Ok(Document {
            url: url.to_string(),
            title: format!("Page at {}", url),
            chunks: vec![Chunk {
                url: url.to_string(),
                text: "Quantum computing uses qubits that can be in superposition.".into(),
            }],
            fetched_at: Utc::now(),
        })
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

struct Harness {
    engine: Engine,
    llm: Arc<ScriptedLlm>,
    conversations: Arc<MemoryConversationStore>,
    log: Arc<MemoryLogStore>,
}

fn harness_with(config: Config, reply: &str, search: Arc<dyn SearchBackend>) -> Harness {
    let llm = ScriptedLlm::new(reply);
    let conversations = Arc::new(MemoryConversationStore::new());
    let log = Arc::new(MemoryLogStore::new());
    let engine = Engine::builder(config)
        .provider(Mode::Quick, llm.clone())
        .search(search)
        .fetch(Arc::new(StaticFetch))
        .conversations(conversations.clone())
        .log_store(log.clone())
        .build()
        .unwrap();
    Harness {
        engine,
        llm,
        conversations,
        log,
    }
}

fn harness(results: usize) -> Harness {
    harness_with(
        Config::default(),
        "Quantum computing uses qubits [1].",
        Arc::new(FixedSearch { count: results }),
    )
}

async fn collect(stream: impl futures_util::Stream<Item = StreamEvent>) -> Vec<StreamEvent> {
    stream.collect().await
}

fn assert_well_formed(events: &[StreamEvent]) {
    assert!(
        matches!(events.first(), Some(StreamEvent::Start { .. })),
        "stream must open with start: {:?}",
        events.first()
    );
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1, "exactly one terminal event");
    assert!(events.last().map(|e| e.is_terminal()).unwrap_or(false));
}

// ─── Quick mode ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_quick_answer_end_to_end() {
    let h = harness(2);
    let response = h
        .engine
        .process(Query::new("what is quantum computing", Mode::Quick))
        .await
        .unwrap();

    assert_eq!(response.mode, Mode::Quick);
    assert!(!response.answer.is_empty());
    assert_eq!(response.citations.len(), 2);
    assert_eq!(response.sources.len(), 2);
    assert!(!response.from_cache);
    assert!(!response.session_id.is_empty());
    assert_eq!(response.follow_ups.len(), 5);
    assert!(response.usage.total() > 0);

    let stored = h.conversations.messages(&response.session_id);
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].content, response.answer);
    assert_eq!(stored[1].citations.len(), 2);
}

#[tokio::test]
async fn test_quick_caps_citations_at_five() {
    let h = harness(8);
    let response = h
        .engine
        .process(Query::new("what is quantum computing", Mode::Quick))
        .await
        .unwrap();

    let indices: Vec<usize> = response.citations.iter().map(|c| c.index).collect();
    assert_eq!(indices, vec![1, 2, 3, 4, 5]);
    for c in &response.citations {
        assert!(c.domain.ends_with("example.com"));
    }
}

#[tokio::test]
async fn test_session_continues_across_queries() {
    let h = harness(2);
    let first = h
        .engine
        .process(Query::new("what is quantum computing", Mode::Quick))
        .await
        .unwrap();
    let second = h
        .engine
        .process(
            Query::new("who builds quantum computers", Mode::Quick)
                .with_session(first.session_id.clone()),
        )
        .await
        .unwrap();

    assert_eq!(second.session_id, first.session_id);
    assert_eq!(h.conversations.messages(&first.session_id).len(), 4);
}

// ─── Cache & accounting ─────────────────────────────────────────────

#[tokio::test]
async fn test_cache_hit_replays_answer() {
    let h = harness(3);
    let query = Query::new("what is quantum computing", Mode::Quick);

    let first = h.engine.process(query.clone()).await.unwrap();
    h.engine.flush().await;
    let calls = h.llm.calls();

    let second = h.engine.process(query).await.unwrap();
    h.engine.flush().await;

    assert!(second.from_cache);
    assert_eq!(second.answer, first.answer);
    assert_eq!(second.citations.len(), first.citations.len());
    assert_eq!(h.llm.calls(), calls, "cache hit must not call the model");

    let statuses: Vec<LogStatus> = h.log.entries().iter().map(|e| e.status).collect();
    assert_eq!(statuses, vec![LogStatus::Success, LogStatus::Cached]);
}

#[tokio::test]
async fn test_failed_request_is_logged() {
    let h = harness_with(Config::default(), "unused", Arc::new(FailingSearch));
    let err = h
        .engine
        .process(Query::new("what is quantum computing", Mode::Quick))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SearchFailed(_)));

    h.engine.flush().await;
    let entries = h.log.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, LogStatus::Error);
    assert!(entries[0].error.is_some());
}

// ─── Routing errors ─────────────────────────────────────────────────

#[tokio::test]
async fn test_no_provider_is_fatal() {
    let engine = Engine::builder(Config::default())
        .search(Arc::new(FixedSearch { count: 1 }))
        .fetch(Arc::new(StaticFetch))
        .build()
        .unwrap();
    let err = engine
        .process(Query::new("anything", Mode::Deep))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NoProviderAvailable { mode: Mode::Deep }));
    assert!(engine
        .process_stream(Query::new("anything", Mode::Quick))
        .is_err());
}

#[tokio::test]
async fn test_empty_query_rejected() {
    let h = harness(1);
    let err = h
        .engine
        .process(Query::new("   ", Mode::Quick))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_explicit_model_is_served_by_its_provider() {
    let vision = ScriptedLlm::new("A photo of a cat.");
    let info = ModelInfo {
        id: "vision-1".into(),
        provider: "scripted".into(),
        name: "vision-1".into(),
        description: String::new(),
        capabilities: vec![Capability::Text, Capability::Vision],
        context_size: 8192,
        speed: Speed::Balanced,
        available: true,
        is_default: false,
    };
    let h = harness(1);
    let engine = Engine::builder(Config::default())
        .provider(Mode::Quick, h.llm.clone())
        .model(info, vision.clone())
        .search(Arc::new(FixedSearch { count: 1 }))
        .fetch(Arc::new(StaticFetch))
        .build()
        .unwrap();

    let mut query = Query::new("what is in this picture", Mode::Quick);
    query.model_id = Some("vision-1".into());
    let response = engine.process(query).await.unwrap();

    assert_eq!(response.answer, "A photo of a cat.");
    assert_eq!(vision.calls(), 1);
    // Related questions run on the quick-mode provider.
    assert_eq!(h.llm.calls(), 1);
}

// ─── Streaming ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_stream_event_order() {
    let h = harness(3);
    let events = collect(
        h.engine
            .process_stream(Query::new("what is quantum computing", Mode::Quick))
            .unwrap(),
    )
    .await;

    assert_well_formed(&events);
    let tokens: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Token { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(tokens, "Quantum computing uses qubits [1].");

    let citations = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Citation { .. }))
        .count();
    assert_eq!(citations, 3);

    match events.last() {
        Some(StreamEvent::Done { summary }) => {
            assert_eq!(summary.citations.len(), 3);
            assert_eq!(summary.mode, Mode::Quick);
            assert!(!summary.session_id.is_empty());
        }
        other => panic!("expected done, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stream_ends_with_error_event() {
    let h = harness_with(Config::default(), "unused", Arc::new(FailingSearch));
    let events = collect(
        h.engine
            .process_stream(Query::new("what is quantum computing", Mode::Quick))
            .unwrap(),
    )
    .await;

    assert_well_formed(&events);
    assert!(matches!(events.last(), Some(StreamEvent::Error { .. })));
}

#[tokio::test]
async fn test_dropping_stream_cancels_request() {
    let search = Arc::new(HangingSearch::default());
    let h = harness_with(Config::default(), "unused", search.clone());
    let mut events = h
        .engine
        .process_stream(Query::new("what is quantum computing", Mode::Quick))
        .unwrap();

    assert!(matches!(events.next().await, Some(StreamEvent::Start { .. })));
    tokio::time::timeout(std::time::Duration::from_secs(5), search.started.notified())
        .await
        .expect("search never started");
    drop(events);

    let entry = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            h.engine.flush().await;
            if let Some(entry) = h.log.entries().into_iter().next() {
                return entry;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("cancelled request was never logged");

    assert_eq!(entry.status, LogStatus::Error);
    assert_eq!(entry.error.as_deref(), Some("request cancelled"));
    assert!(search.dropped.load(Ordering::SeqCst));
    assert_eq!(h.llm.calls(), 0);
}

// ─── Deep & research ────────────────────────────────────────────────

#[tokio::test]
async fn test_deep_mode_fetches_pages() {
    let h = harness(4);
    let response = h
        .engine
        .process(Query::new("what is quantum computing", Mode::Deep))
        .await
        .unwrap();

    assert_eq!(response.mode, Mode::Deep);
    assert_eq!(response.citations.len(), 4);
    assert!(response
        .sources
        .iter()
        .all(|s| s.title.starts_with("Page at")));
    assert!(response
        .reasoning
        .iter()
        .any(|s| s.kind == StepKind::Decompose));
}

#[tokio::test]
async fn test_agentic_research_hits_iteration_limit() {
    let mut config = Config::default();
    config.engine.research_strategy = ResearchStrategy::Agentic;
    config.engine.max_iterations = 4;
    let h = harness_with(config, "note: still thinking", Arc::new(FixedSearch { count: 2 }));

    let response = h
        .engine
        .process(Query::new("what is quantum computing", Mode::Research))
        .await
        .unwrap();

    let actions = response
        .reasoning
        .iter()
        .filter(|s| s.kind == StepKind::Action)
        .count();
    assert_eq!(actions, 4);
    assert_eq!(response.reasoning[0].kind, StepKind::Plan);
    assert_eq!(
        response.reasoning.last().map(|s| s.kind),
        Some(StepKind::Synthesize)
    );
    assert!(!response.answer.is_empty());
}

#[tokio::test]
async fn test_agentic_research_answers_early() {
    let mut config = Config::default();
    config.engine.research_strategy = ResearchStrategy::Agentic;
    let h = harness_with(
        config,
        "answer: Qubits exploit superposition.",
        Arc::new(FixedSearch { count: 2 }),
    );

    let response = h
        .engine
        .process(Query::new("what is quantum computing", Mode::Research))
        .await
        .unwrap();

    assert_eq!(response.answer, "Qubits exploit superposition.");
    let actions = response
        .reasoning
        .iter()
        .filter(|s| s.kind == StepKind::Action)
        .count();
    assert_eq!(actions, 1);
}

#[tokio::test]
async fn test_streamed_research_uses_query_variants() {
    let h = harness(2);
    let events = collect(
        h.engine
            .process_stream(Query::new("what is quantum computing", Mode::Research))
            .unwrap(),
    )
    .await;

    assert_well_formed(&events);
    let searches: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Search { query, .. } => Some(query.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(searches.len(), 3);
    assert!(searches.contains(&"what is quantum computing overview"));
}

// ─── DeepSearch ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_deepsearch_report_from_snippets() {
    let mut config = Config::default();
    config.deepsearch.fetch_mode = FetchMode::Snippets;
    let h = harness_with(config, "quantum hardware\nquantum algorithms", Arc::new(FixedSearch { count: 3 }));

    let report = h
        .engine
        .process_deep_search(Query::new("quantum computing", Mode::Quick))
        .await
        .unwrap();

    assert_eq!(report.query, "quantum computing");
    assert_eq!(report.sources.len(), 3);
    assert_eq!(report.citations.len(), 3);
    assert_eq!(report.report.key_findings.len(), 2);
    let titles: Vec<&str> = report
        .report
        .sections
        .iter()
        .map(|s| s.title.as_str())
        .collect();
    assert_eq!(titles, vec!["Hardware", "Algorithms"]);
    assert!(report.report.overview.contains("qubits"));
    assert!(!report.session_id.is_empty());
}

#[tokio::test]
async fn test_deepsearch_fetches_through_pool() {
    let mut config = Config::default();
    config.deepsearch.fetch_mode = FetchMode::Fetch;
    config.deepsearch.worker_pool = 2;
    let h = harness_with(config, "quantum hardware", Arc::new(FixedSearch { count: 4 }));

    let report = h
        .engine
        .process_deep_search(Query::new("quantum computing", Mode::DeepSearch))
        .await
        .unwrap();

    assert_eq!(report.sources.len(), 4);
    assert!(report.sources.iter().all(|s| s.title.starts_with("Page at")));
    assert_eq!(report.report.sections.len(), 2);
}

#[tokio::test]
async fn test_deepsearch_stream_reports_sections() {
    let h = harness(2);
    let events = collect(
        h.engine
            .process_deep_search_stream(Query::new("quantum computing", Mode::Quick))
            .unwrap(),
    )
    .await;

    assert_well_formed(&events);
    let sections: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Section { title } => Some(title.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(
        sections,
        vec!["Overview", "Key Findings", "Detailed Analysis", "Methodology"]
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::Progress { phase, .. } if phase == "report")));

    match events.last() {
        Some(StreamEvent::Done { summary }) => {
            assert_eq!(summary.mode, Mode::DeepSearch);
            let report = summary.report.as_ref().expect("report in summary");
            assert_eq!(report.sections.len(), 2);
        }
        other => panic!("expected done, got {:?}", other),
    }
}

#[tokio::test]
async fn test_deepsearch_cache_hit_keeps_sections() {
    let mut config = Config::default();
    config.deepsearch.fetch_mode = FetchMode::Snippets;
    let h = harness_with(config, "quantum hardware", Arc::new(FixedSearch { count: 2 }));
    let query = Query::new("quantum computing", Mode::DeepSearch);

    let first = h.engine.process_deep_search(query.clone()).await.unwrap();
    h.engine.flush().await;
    let second = h.engine.process_deep_search(query).await.unwrap();

    assert!(second.from_cache);
    assert_eq!(second.report.sections.len(), first.report.sections.len());
    assert_eq!(second.report.key_findings, first.report.key_findings);
}
